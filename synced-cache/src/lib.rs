//! Background-synchronized in-memory copies of remote datasets.
//!
//! A [`SyncedCache`] owns one [`Snapshot`] of a remote object at a time. It is
//! loaded once at startup and then refreshed by a background worker whenever
//! the object's [`Version`] marker changes in its [`RemoteStore`].

pub mod cache;
pub mod config;
pub mod metrics_defs;
pub mod store;

pub use cache::{CacheError, ParseError, Parser, Snapshot, SyncOutcome, SyncSettings, SyncedCache};
pub use store::{FilesystemStore, HttpStore, RemoteStore, StoreError, Version};

use config::RemoteStoreConfig;
use std::sync::Arc;
use std::time::Duration;

/// Builds the remote store described by `config`.
pub fn get_store(config: &RemoteStoreConfig) -> Result<Arc<dyn RemoteStore>, StoreError> {
    let store: Arc<dyn RemoteStore> = match config {
        RemoteStoreConfig::Filesystem { base_dir } => Arc::new(FilesystemStore::new(base_dir)),
        RemoteStoreConfig::Http {
            base_url,
            request_timeout_secs,
        } => Arc::new(HttpStore::new(
            base_url.clone(),
            Duration::from_secs(*request_timeout_secs),
        )?),
    };
    Ok(store)
}
