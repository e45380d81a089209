pub mod bundle;
pub mod config;
pub mod conversations;
pub mod db;
pub mod device;
pub mod error;
pub mod history;
pub mod meta;
pub mod migrations;
pub mod preferences;
pub mod store;
pub mod usage;

pub use config::*;
pub use conversations::{Conversations, UNBOUNDED};
pub use device::{DeviceProfile, PLACEHOLDER_ID};
pub use error::{Result, StoreError};
pub use history::History;
pub use preferences::Preferences;
pub use store::LocalStore;

pub use geo_schema::*;
