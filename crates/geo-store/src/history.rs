use geo_schema::HistoryEntry;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::Result;
use crate::store::{now_ms, LocalStore};

/// Append-only search history.
pub struct History<'a> {
    store: &'a LocalStore,
}

impl<'a> History<'a> {
    pub(crate) fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    /// Record a query and its answer, returning the assigned id.
    pub async fn add(&self, query: &str, answer: &str) -> Result<i64> {
        let db = self.store.writable().await?;
        let query = query.to_owned();
        let answer = answer.to_owned();
        let id = db
            .write(move |tx| insert_entry(tx, &query, &answer, now_ms()))
            .await?;
        debug!(id, "history entry saved");
        Ok(id)
    }

    /// Most recent entries first. `None` uses the configured page size.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let limit = limit.unwrap_or(self.store.config().history_list_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(db) = self.store.readable().await? else {
            return Ok(Vec::new());
        };
        db.read(move |tx| select_recent(tx, limit)).await
    }

    pub async fn clear(&self) -> Result<()> {
        let Some(db) = self.store.readable().await? else {
            return Ok(());
        };
        let removed = db
            .write(|tx| Ok(tx.execute("DELETE FROM history", [])?))
            .await?;
        debug!(removed, "history cleared");
        Ok(())
    }
}

pub(crate) fn insert_entry(
    conn: &Connection,
    query: &str,
    answer: &str,
    timestamp: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO history (query, answer, timestamp) VALUES (?1, ?2, ?3)",
        params![query, answer, timestamp],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn select_recent(conn: &Connection, limit: usize) -> Result<Vec<HistoryEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        r#"
        SELECT id, query, answer, timestamp
        FROM history
        ORDER BY timestamp DESC, id DESC
        LIMIT ?1
        "#,
    )?;
    let rows = stmt.query_map([limit], |row| {
        Ok(HistoryEntry {
            id: row.get(0)?,
            query: row.get(1)?,
            answer: row.get(2)?,
            timestamp: row.get(3)?,
        })
    })?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}
