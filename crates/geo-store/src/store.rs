use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::{StoreConfig, StoreLocation};
use crate::conversations::Conversations;
use crate::db::Db;
use crate::error::{Result, StoreError};
use crate::history::History;
use crate::preferences::Preferences;

/// Tables emptied by [`LocalStore::clear_all`]; `meta` holds the device id
/// and other ancillary state.
const ERASABLE_TABLES: [&str; 4] = ["conversations", "preferences", "history", "meta"];

type InitOutcome = std::result::Result<Db, Arc<StoreError>>;

/// Facade over the local database.
///
/// Construct one per process and clone it freely. The connection is opened on
/// first use; concurrent first callers share a single open attempt and all see
/// the same outcome.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: StoreConfig,
    location: StoreLocation,
    db: OnceCell<InitOutcome>,
}

impl LocalStore {
    pub fn new(config: StoreConfig) -> Self {
        let location = config.location();
        Self {
            inner: Arc::new(Inner {
                config,
                location,
                db: OnceCell::new(),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StoreConfig::in_memory())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    /// Open the database and apply pending migrations. Safe to call from many
    /// tasks at once; only the first call does any work.
    pub async fn initialize(&self) -> Result<()> {
        self.db().await.map(|_| ())
    }

    async fn db(&self) -> Result<Db> {
        let outcome = self
            .inner
            .db
            .get_or_init(|| open(self.inner.location.clone()))
            .await;
        match outcome {
            Ok(db) => Ok(db.clone()),
            Err(err) => Err(shared_failure(err)),
        }
    }

    /// Database for read paths; `None` when storage is unavailable so reads
    /// can fall back to empty results.
    pub(crate) async fn readable(&self) -> Result<Option<Db>> {
        match self.db().await {
            Ok(db) => Ok(Some(db)),
            Err(StoreError::Unavailable(reason)) => {
                debug!(%reason, "storage unavailable, serving empty read");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Database for write paths; unavailability is an error here.
    pub(crate) async fn writable(&self) -> Result<Db> {
        self.db().await
    }

    pub fn conversations(&self) -> Conversations<'_> {
        Conversations::new(self)
    }

    pub fn preferences(&self) -> Preferences<'_> {
        Preferences::new(self)
    }

    pub fn history(&self) -> History<'_> {
        History::new(self)
    }

    /// Erase every store and all ancillary state in one transaction, then
    /// recount each table once the deletion has committed.
    pub async fn clear_all(&self) -> Result<()> {
        let Some(db) = self.readable().await? else {
            return Ok(());
        };

        db.write(|tx| {
            for table in ERASABLE_TABLES {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            Ok(())
        })
        .await?;

        let remaining = db
            .read(|tx| {
                let mut remaining = Vec::new();
                for table in ERASABLE_TABLES {
                    let count: i64 =
                        tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                            row.get(0)
                        })?;
                    if count > 0 {
                        remaining.push(table.to_owned());
                    }
                }
                Ok(remaining)
            })
            .await?;

        if !remaining.is_empty() {
            warn!(?remaining, "bulk erase left records behind");
            return Err(StoreError::PartialErase { remaining });
        }
        info!("all local data erased");
        Ok(())
    }

    /// Close the connection. Other clones of this handle keep it open until
    /// they are dropped.
    pub async fn close(self) -> Result<()> {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(_) => {
                debug!("local store handle still shared, close deferred to last owner");
                return Ok(());
            }
        };
        match inner.db.into_inner() {
            Some(Ok(db)) => task::spawn_blocking(move || db.close()).await?,
            _ => Ok(()),
        }
    }
}

async fn open(location: StoreLocation) -> InitOutcome {
    let result = match location {
        StoreLocation::Unavailable(reason) => {
            warn!(%reason, "local storage unavailable, writes will not persist");
            Err(StoreError::Unavailable(reason))
        }
        StoreLocation::Memory => Db::open_in_memory(),
        StoreLocation::File(path) => match task::spawn_blocking(move || Db::open(&path)).await {
            Ok(result) => result,
            Err(err) => Err(StoreError::from(err)),
        },
    };
    result.map_err(Arc::new)
}

fn shared_failure(err: &Arc<StoreError>) -> StoreError {
    match err.as_ref() {
        StoreError::Unavailable(reason) => StoreError::Unavailable(reason.clone()),
        _ => StoreError::Initialization(Arc::clone(err)),
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
