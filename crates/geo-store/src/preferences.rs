use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::store::LocalStore;

/// Key to JSON value settings. Writing an existing key replaces its value.
pub struct Preferences<'a> {
    store: &'a LocalStore,
}

impl<'a> Preferences<'a> {
    pub(crate) fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let db = self.store.writable().await?;
        let key = key.to_owned();
        db.write(move |tx| upsert_preference(tx, &key, &value))
            .await
    }

    /// `None` for an unknown key.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(db) = self.store.readable().await? else {
            return Ok(None);
        };
        let key = key.to_owned();
        db.read(move |tx| {
            let raw: Option<String> = tx
                .query_row(
                    "SELECT value FROM preferences WHERE key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(Into::into)
        })
        .await
    }

    pub async fn list_all(&self) -> Result<BTreeMap<String, Value>> {
        let Some(db) = self.store.readable().await? else {
            return Ok(BTreeMap::new());
        };
        db.read(|tx| select_all(tx)).await
    }
}

pub(crate) fn upsert_preference(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    conn.execute(
        r#"
        INSERT INTO preferences (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, encoded],
    )?;
    debug!(key, "preference saved");
    Ok(())
}

pub(crate) fn select_all(conn: &Connection) -> Result<BTreeMap<String, Value>> {
    let mut stmt = conn.prepare("SELECT key, value FROM preferences ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut prefs = BTreeMap::new();
    for row in rows {
        let (key, raw) = row?;
        prefs.insert(key, serde_json::from_str(&raw)?);
    }
    Ok(prefs)
}
