//! Anonymous device identifier for continuity without accounts.
//!
//! The identifier is derived locally from a handful of device
//! characteristics plus a random per-installation nonce, hashed, and cached
//! in the `meta` table. It is never sent anywhere. Erasing all data drops the
//! cached value, so the next call derives a fresh one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::meta::{get_meta, set_meta, ANONYMOUS_ID_KEY};
use crate::store::LocalStore;

/// Returned where no device characteristics or no storage exist.
pub const PLACEHOLDER_ID: &str = "headless-placeholder";

const ID_LEN: usize = 16;

/// Characteristics the identifier is derived from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Display dimensions as `WIDTHxHEIGHT`
    pub screen: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub platform: String,
}

impl DeviceProfile {
    /// Probe the process environment. `None` in headless contexts where none
    /// of screen, timezone or language can be determined.
    pub fn detect() -> Option<Self> {
        let tz_file = std::fs::read_to_string("/etc/timezone").ok();
        Self::from_parts(|key| std::env::var(key).ok(), tz_file)
    }

    fn from_parts(env: impl Fn(&str) -> Option<String>, tz_file: Option<String>) -> Option<Self> {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let dimension = |key: &str| non_empty(key).and_then(|v| v.trim().parse::<u32>().ok());
        let screen = match (dimension("COLUMNS"), dimension("LINES")) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        };
        let timezone = non_empty("TZ").or_else(|| {
            tz_file
                .map(|raw| raw.trim().to_owned())
                .filter(|tz| !tz.is_empty())
        });
        let language = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .into_iter()
            .find_map(|key| non_empty(key));

        if screen.is_none() && timezone.is_none() && language.is_none() {
            return None;
        }

        Some(Self {
            screen,
            timezone,
            language,
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        })
    }

    /// Compact printable identifier for this profile and nonce.
    pub fn fingerprint(&self, nonce: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.screen.as_deref().unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(self.timezone.as_deref().unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(self.language.as_deref().unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(&self.platform);
        hasher.update([0u8]);
        hasher.update(nonce);
        let mut id = hex::encode(hasher.finalize());
        id.truncate(ID_LEN);
        id
    }
}

impl LocalStore {
    fn device_profile(&self) -> Option<DeviceProfile> {
        self.config().device.clone().or_else(DeviceProfile::detect)
    }

    /// Cached anonymous identifier, derived and stored on first use.
    pub async fn anonymous_id(&self) -> Result<String> {
        let Some(profile) = self.device_profile() else {
            return Ok(PLACEHOLDER_ID.to_owned());
        };
        let Some(db) = self.readable().await? else {
            return Ok(PLACEHOLDER_ID.to_owned());
        };

        if let Some(id) = db.read(|tx| get_meta(tx, ANONYMOUS_ID_KEY)).await? {
            return Ok(id);
        }

        // Re-checked under the write lock: a concurrent caller may have won.
        db.write(move |tx| {
            if let Some(id) = get_meta(tx, ANONYMOUS_ID_KEY)? {
                return Ok(id);
            }
            let id = profile.fingerprint(&Uuid::new_v4().to_string());
            set_meta(tx, ANONYMOUS_ID_KEY, &id)?;
            info!("derived new anonymous device id");
            Ok(id)
        })
        .await
    }
}
