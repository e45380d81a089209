use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tokio::task;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::migrations::{current_version, run_migrations};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_READERS: usize = 4;

/// Shared handle to the embedded database.
///
/// Writes are serialized through a single connection and run inside
/// `IMMEDIATE` transactions. File-backed databases run in WAL mode and serve
/// reads from a small pool of read-only connections, so readers never wait on
/// each other or on the writer. In-memory databases only have the writer.
#[derive(Clone)]
pub struct Db {
    writer: Arc<Mutex<Connection>>,
    readers: Option<Arc<ReaderPool>>,
}

struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn checkout(&self) -> Result<Connection> {
        let pooled = self
            .idle
            .lock()
            .map_err(|_| StoreError::Internal("failed to lock reader pool".into()))?
            .pop();
        if let Some(conn) = pooled {
            return Ok(conn);
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(path = %self.path.display(), "opened reader connection");
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }
    }
}

fn lock_failed<T>(_: T) -> StoreError {
    StoreError::Internal("failed to lock sqlite connection".into())
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        run_migrations(&conn)?;
        info!(
            path = %path.display(),
            schema_version = current_version(&conn)?,
            "local store opened"
        );

        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: Some(Arc::new(ReaderPool {
                path: path.to_path_buf(),
                idle: Mutex::new(Vec::new()),
            })),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        debug!("in-memory local store opened");
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: None,
        })
    }

    /// Run `f` inside a write transaction. Returning an error rolls it back.
    pub async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let writer = Arc::clone(&self.writer);
        task::spawn_blocking(move || {
            let mut conn = writer.lock().map_err(lock_failed)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }

    /// Run `f` inside a read transaction, which sees the database as of its
    /// first statement.
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.readers {
            Some(pool) => {
                let pool = Arc::clone(pool);
                task::spawn_blocking(move || {
                    let mut conn = pool.checkout()?;
                    let out = {
                        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
                        let out = f(&tx)?;
                        tx.commit()?;
                        out
                    };
                    pool.checkin(conn);
                    Ok(out)
                })
                .await?
            }
            None => {
                let writer = Arc::clone(&self.writer);
                task::spawn_blocking(move || {
                    let mut conn = writer.lock().map_err(lock_failed)?;
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
                    let out = f(&tx)?;
                    tx.commit()?;
                    Ok(out)
                })
                .await?
            }
        }
    }

    /// Close the writer connection if this is the last handle to it.
    pub fn close(self) -> Result<()> {
        if let Some(pool) = self.readers {
            if let Ok(mut idle) = pool.idle.lock() {
                idle.clear();
            }
        }
        match Arc::try_unwrap(self.writer) {
            Ok(mutex) => {
                let conn = mutex.into_inner().map_err(lock_failed)?;
                conn.close().map_err(|(_, err)| StoreError::Database(err))?;
                info!("local store closed");
            }
            Err(_) => debug!("local store still shared, leaving connection open"),
        }
        Ok(())
    }
}
