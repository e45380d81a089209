use std::collections::HashSet;

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

type Migration = (i64, &'static str);

// Migrations are additive only: never drop or rewrite an existing table.
fn migrations() -> Vec<Migration> {
    vec![
        (
            1,
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                messages TEXT NOT NULL,
                facts TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_timestamp ON conversations(timestamp DESC);

            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                answer TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history(timestamp DESC);
            "#,
        ),
        (
            2,
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        ),
    ]
}

/// Highest schema version this build knows how to create.
pub fn latest_version() -> i64 {
    migrations()
        .iter()
        .map(|(version, _)| *version)
        .max()
        .unwrap_or(0)
}

/// Bring the schema up to [`latest_version`], returning the versions applied.
pub fn run_migrations(conn: &Connection) -> Result<Vec<i64>> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS __schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    let mut stmt = conn.prepare("SELECT version FROM __schema_version")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut applied = HashSet::new();
    for row in rows {
        applied.insert(row?);
    }

    let supported = latest_version();
    if let Some(found) = applied.iter().copied().max() {
        if found > supported {
            return Err(StoreError::SchemaTooNew { found, supported });
        }
    }

    let mut newly_applied = Vec::new();
    for (version, sql) in migrations() {
        if applied.contains(&version) {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO __schema_version(version, applied_at) VALUES (?1, datetime('now'))",
            [version],
        )?;
        tx.commit()?;
        info!(version, "applied schema migration");
        newly_applied.push(version);
    }

    Ok(newly_applied)
}

/// Current persisted schema version, 0 for an empty database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM __schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn fresh_database_gets_every_store_and_index() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = run_migrations(&conn).unwrap();
        assert_eq!(applied, vec![1, 2]);

        for name in [
            "conversations",
            "preferences",
            "history",
            "meta",
            "idx_conversations_timestamp",
            "idx_history_timestamp",
        ] {
            assert!(table_exists(&conn, name), "{name} missing");
        }
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn rerunning_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let applied = run_migrations(&conn).unwrap();
        assert!(applied.is_empty());
    }

    #[test]
    fn upgrade_keeps_existing_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE __schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT INTO __schema_version(version) VALUES (1);
            CREATE TABLE preferences (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            INSERT INTO preferences(key, value) VALUES ('theme', '"dark"');
            "#,
        )
        .unwrap();

        let applied = run_migrations(&conn).unwrap();
        assert_eq!(applied, vec![2]);
        assert!(table_exists(&conn, "meta"));

        let value: String = conn
            .query_row("SELECT value FROM preferences WHERE key = 'theme'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(value, "\"dark\"");
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute("INSERT INTO __schema_version(version) VALUES (99)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SchemaTooNew { found: 99, .. }
        ));
    }
}
