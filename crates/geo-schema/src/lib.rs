use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Version tag written into every export bundle.
pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Snapshot of a cited fact, embedded in the conversation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    /// Citation ordinal, unique within its answer
    pub idx: u32,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub source_url: Option<String>,
    pub trust_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub query: String,
    pub answer: String,
    pub timestamp: i64,
}

/// Portable export/import document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    pub conversations: Vec<Conversation>,
    pub preferences: BTreeMap<String, serde_json::Value>,
    pub history: Vec<HistoryEntry>,
    #[serde(rename = "exportDate")]
    pub export_date: String,
    pub version: String,
}

impl Bundle {
    /// Two-space indented JSON, the layout of downloaded export files.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// File name used when delivering an export, e.g. `geo-data-export-1700000000000.json`.
    pub fn file_name(now_ms: i64) -> String {
        format!("geo-data-export-{now_ms}.json")
    }
}

/// Approximate per-store footprint in bytes of serialized JSON.
///
/// This measures the encoded text, not the database file, so it is an
/// estimate of how much room the data takes rather than true disk usage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageUsage {
    pub conversations: u64,
    pub preferences: u64,
    pub history: u64,
    pub total: u64,
}

impl StorageUsage {
    pub fn new(conversations: u64, preferences: u64, history: u64) -> Self {
        Self {
            conversations,
            preferences,
            history,
            total: conversations + preferences + history,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn format_bytes(bytes: u64) -> String {
        if bytes < 1024 {
            format!("{bytes} B")
        } else if bytes < 1024 * 1024 {
            format!("{:.2} KB", bytes as f64 / 1024.0)
        } else {
            format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
        }
    }
}

/// Record counts written by a bundle import.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub conversations: usize,
    pub preferences: usize,
    pub history: usize,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.conversations + self.preferences + self.history
    }
}
