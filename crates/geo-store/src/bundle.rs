//! Export of every store into a portable [`Bundle`] and replay of a bundle
//! back into the stores.
//!
//! Import validates the whole document before the first write. Conversations
//! and history entries are replayed through the normal add path, oldest
//! first, so they receive fresh ids and timestamps while keeping their
//! relative order; preferences are upserted.

use chrono::{SecondsFormat, Utc};
use geo_schema::{Bundle, Fact, ImportSummary, Message, BUNDLE_VERSION};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ImportMode;
use crate::conversations::{insert_conversation, new_conversation, UNBOUNDED};
use crate::error::{Result, StoreError};
use crate::history::insert_entry;
use crate::preferences::upsert_preference;
use crate::store::{now_ms, LocalStore};

#[derive(Debug, Deserialize)]
struct ConversationDraft {
    #[serde(default)]
    timestamp: Option<i64>,
    messages: Vec<Message>,
    #[serde(default)]
    facts: Vec<Fact>,
}

#[derive(Debug, Deserialize)]
struct HistoryDraft {
    #[serde(default)]
    timestamp: Option<i64>,
    query: String,
    answer: String,
}

#[derive(Debug)]
enum ImportOp {
    Conversation {
        messages: Vec<Message>,
        facts: Vec<Fact>,
    },
    Preference {
        key: String,
        value: Value,
    },
    History {
        query: String,
        answer: String,
    },
}

impl ImportOp {
    fn apply(self, conn: &Connection) -> Result<()> {
        match self {
            ImportOp::Conversation { messages, facts } => {
                insert_conversation(conn, &new_conversation(messages, facts))
            }
            ImportOp::Preference { key, value } => upsert_preference(conn, &key, &value),
            ImportOp::History { query, answer } => {
                insert_entry(conn, &query, &answer, now_ms()).map(|_| ())
            }
        }
    }
}

fn malformed(reason: impl Into<String>) -> StoreError {
    StoreError::MalformedBundle(reason.into())
}

fn parse_entries<T: DeserializeOwned>(items: &[Value], what: &str) -> Result<Vec<T>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            T::deserialize(item).map_err(|e| malformed(format!("{what} entry {i}: {e}")))
        })
        .collect()
}

/// Validate the document and turn it into an ordered list of writes.
fn plan_import(document: &Value) -> Result<(Vec<ImportOp>, ImportSummary)> {
    let root = document
        .as_object()
        .ok_or_else(|| malformed("document is not a JSON object"))?;

    let conversations = match root.get("conversations") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(malformed("`conversations` must be an array")),
        None => return Err(malformed("missing `conversations`")),
    };
    let preferences = match root.get("preferences") {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(malformed("`preferences` must be an object")),
        None => return Err(malformed("missing `preferences`")),
    };
    let history = match root.get("history") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(malformed("`history` must be an array")),
    };

    let mut conversations: Vec<ConversationDraft> = parse_entries(conversations, "conversation")?;
    let mut history: Vec<HistoryDraft> = parse_entries(history, "history")?;
    // Exports list newest first; replay oldest first, ties included.
    conversations.reverse();
    history.reverse();
    conversations.sort_by_key(|c| c.timestamp.unwrap_or(i64::MIN));
    history.sort_by_key(|h| h.timestamp.unwrap_or(i64::MIN));

    let summary = ImportSummary {
        conversations: conversations.len(),
        preferences: preferences.len(),
        history: history.len(),
    };

    let mut ops = Vec::with_capacity(summary.total());
    ops.extend(
        conversations
            .into_iter()
            .map(|c| ImportOp::Conversation {
                messages: c.messages,
                facts: c.facts,
            }),
    );
    ops.extend(preferences.iter().map(|(key, value)| ImportOp::Preference {
        key: key.clone(),
        value: value.clone(),
    }));
    ops.extend(history.into_iter().map(|h| ImportOp::History {
        query: h.query,
        answer: h.answer,
    }));

    Ok((ops, summary))
}

impl LocalStore {
    /// Snapshot every store into a bundle. Each store is read in its own read
    /// transaction; writers are not held up while the bundle is assembled.
    pub async fn export_bundle(&self) -> Result<Bundle> {
        let conversations = self.conversations().list(Some(UNBOUNDED)).await?;
        let preferences = self.preferences().list_all().await?;
        let history = self.history().list(Some(UNBOUNDED)).await?;

        info!(
            conversations = conversations.len(),
            preferences = preferences.len(),
            history = history.len(),
            "export bundle assembled"
        );

        Ok(Bundle {
            conversations,
            preferences,
            history,
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            version: BUNDLE_VERSION.to_owned(),
        })
    }

    /// Import a bundle from its JSON text.
    pub async fn import_json(&self, text: &str) -> Result<ImportSummary> {
        let document: Value =
            serde_json::from_str(text).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
        self.import_bundle(&document).await
    }

    /// Replay a bundle document into the stores.
    ///
    /// Nothing is written unless the whole document validates. How a failure
    /// during writing is handled depends on [`ImportMode`].
    pub async fn import_bundle(&self, document: &Value) -> Result<ImportSummary> {
        let (ops, summary) = plan_import(document)?;
        if let Some(version) = document.get("version").and_then(Value::as_str) {
            if version != BUNDLE_VERSION {
                warn!(version, "importing bundle with unknown version");
            }
        }

        let db = self.writable().await?;
        let attempted = ops.len();

        match self.config().import_mode {
            ImportMode::Atomic => {
                let outcome = db
                    .write(move |tx| ops.into_iter().try_for_each(|op| op.apply(tx)))
                    .await;
                if let Err(source) = outcome {
                    warn!(attempted, "import rolled back");
                    return Err(StoreError::ImportPartialFailure {
                        committed: 0,
                        attempted,
                        source: Box::new(source),
                    });
                }
            }
            ImportMode::Incremental => {
                let mut committed = 0;
                for op in ops {
                    if let Err(source) = db.write(move |tx| op.apply(tx)).await {
                        warn!(committed, attempted, "import aborted part way");
                        return Err(StoreError::ImportPartialFailure {
                            committed,
                            attempted,
                            source: Box::new(source),
                        });
                    }
                    committed += 1;
                }
            }
        }

        info!(
            conversations = summary.conversations,
            preferences = summary.preferences,
            history = summary.history,
            "bundle imported"
        );
        Ok(summary)
    }
}
