use geo_schema::StorageUsage;
use serde::Serialize;

use crate::conversations::UNBOUNDED;
use crate::error::Result;
use crate::store::LocalStore;

/// Length of the compact JSON encoding, 0 for an empty collection.
fn encoded_len<T: Serialize>(records: &T, is_empty: bool) -> Result<u64> {
    if is_empty {
        return Ok(0);
    }
    Ok(serde_json::to_string(records)?.len() as u64)
}

impl LocalStore {
    /// Estimate of the space each store occupies, measured as the size of its
    /// serialized JSON. This is not the database file size.
    pub async fn usage(&self) -> Result<StorageUsage> {
        let conversations = self.conversations().list(Some(UNBOUNDED)).await?;
        let preferences = self.preferences().list_all().await?;
        let history = self.history().list(Some(UNBOUNDED)).await?;

        Ok(StorageUsage::new(
            encoded_len(&conversations, conversations.is_empty())?,
            encoded_len(&preferences, preferences.is_empty())?,
            encoded_len(&history, history.is_empty())?,
        ))
    }
}
