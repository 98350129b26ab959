//! Remote stores hold the datasets that synced caches keep warm in memory.
//! A store only needs to answer two questions: which revision of an object is
//! current (cheap), and what the bytes of that object are (expensive).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, LAST_MODIFIED};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use url::Url;

/// Opaque marker identifying one revision of a remote object.
///
/// Markers are only ever compared for equality. Upstream data may be
/// corrected out of order, so no ordering is implied between two markers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn new<S: Into<String>>(marker: S) -> Self {
        Version(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transient store error: {0}")]
    Transient(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the version marker of the object without fetching its contents.
    async fn get_metadata(&self, key: &str) -> Result<Version, StoreError>;

    /// Fetches the full contents of the object.
    async fn get_object(&self, key: &str) -> Result<Bytes, StoreError>;
}

pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        FilesystemStore {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let escapes_base = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes_base {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }
}

fn io_error(key: &str, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
        _ => StoreError::Transient(format!("{key}: {err}")),
    }
}

#[async_trait]
impl RemoteStore for FilesystemStore {
    async fn get_metadata(&self, key: &str) -> Result<Version, StoreError> {
        let path = self.path_for(key)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(key, e))?;

        let modified = metadata
            .modified()
            .map_err(|e| io_error(key, e))?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        // Length is part of the marker so rewrites within the mtime resolution are still seen.
        Ok(Version::new(format!("{modified}-{}", metadata.len())))
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path_for(key)?;
        let data = tokio::fs::read(&path).await.map_err(|e| io_error(key, e))?;
        Ok(Bytes::from(data))
    }
}

/// Store backed by a plain HTTP server or bucket endpoint.
///
/// The version marker comes from a `HEAD` request (`ETag`, falling back to
/// `Last-Modified`), the contents from a `GET`.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpStore {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Transient(format!("failed to build client: {e}")))?;

        Ok(HttpStore { client, base_url })
    }

    fn url_for(&self, key: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(key)
            .map_err(|e| StoreError::Transient(format!("invalid key {key}: {e}")))
    }

    fn check_status(key: &str, status: StatusCode) -> Result<(), StoreError> {
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::Transient(format!("HTTP {status} for {key}")));
        }
        Ok(())
    }

    fn version_from_headers(key: &str, headers: &HeaderMap) -> Result<Version, StoreError> {
        headers
            .get(ETAG)
            .or_else(|| headers.get(LAST_MODIFIED))
            .and_then(|value| value.to_str().ok())
            .map(Version::new)
            .ok_or_else(|| StoreError::Transient(format!("no version header for {key}")))
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn get_metadata(&self, key: &str) -> Result<Version, StoreError> {
        let url = self.url_for(key)?;
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        Self::check_status(key, response.status())?;
        Self::version_from_headers(key, response.headers())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StoreError> {
        let url = self.url_for(key)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        Self::check_status(key, response.status())?;
        response
            .bytes()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))
    }
}
