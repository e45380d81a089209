//! Ancillary key/value state that is not a record store: the cached device
//! identifier, the remembered API endpoint. Erased together with the stores.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::store::LocalStore;

pub(crate) const ANONYMOUS_ID_KEY: &str = "geo_anonymous_id";
pub(crate) const API_ENDPOINT_KEY: &str = "geo_api_endpoint";

pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO meta (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}

impl LocalStore {
    /// Remember the question-answering endpoint the user last pointed at.
    pub async fn remember_endpoint(&self, url: &str) -> Result<()> {
        let db = self.writable().await?;
        let url = url.trim().to_owned();
        db.write(move |tx| set_meta(tx, API_ENDPOINT_KEY, &url)).await
    }

    pub async fn endpoint(&self) -> Result<Option<String>> {
        let Some(db) = self.readable().await? else {
            return Ok(None);
        };
        db.read(|tx| get_meta(tx, API_ENDPOINT_KEY)).await
    }
}
