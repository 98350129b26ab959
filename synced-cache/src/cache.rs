use crate::metrics_defs::{CACHE_SYNC_DURATION, CACHE_SYNC_ERRORS, CACHE_SYNC_OUTCOME};
use crate::store::{RemoteStore, StoreError, Version};
use parking_lot::{Mutex, RwLock};
use shared::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Error returned by a snapshot parser.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct ParseError(String);

impl ParseError {
    pub fn new<D: fmt::Display>(msg: D) -> Self {
        ParseError(msg.to_string())
    }
}

/// Turns the raw bytes of a remote object into the in-memory representation
/// a provider reads on the request path.
pub trait Parser<T>: Send + Sync + 'static {
    fn parse(&self, bytes: &[u8]) -> Result<T, ParseError>;
}

impl<T, F> Parser<T> for F
where
    F: Fn(&[u8]) -> Result<T, ParseError> + Send + Sync + 'static,
{
    fn parse(&self, bytes: &[u8]) -> Result<T, ParseError> {
        self(bytes)
    }
}

/// One complete, immutable revision of the cached data.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub data: T,
    pub version: Version,
    pub fetched_at: SystemTime,
}

#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// Key of the object in the remote store.
    pub key: String,
    /// Time between two metadata checks.
    pub cron_interval: Duration,
    /// How long shutdown waits for an in-flight refresh before aborting it.
    pub shutdown_grace: Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("cache is already initialized")]
    AlreadyInitialized,

    #[error("cache background worker is not running")]
    NotRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The version marker did not change; nothing was fetched.
    Unchanged,
    /// A new snapshot was fetched, parsed and swapped in.
    Updated,
    /// Another refresh was already in flight.
    Skipped,
}

impl SyncOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug)]
enum Command {
    // Check the store now instead of waiting for the next tick.
    // The worker replies once the attempt finishes.
    Refresh(oneshot::Sender<Result<SyncOutcome, CacheError>>),
    Shutdown,
}

struct Worker {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

struct CacheInner<T> {
    name: String,
    settings: SyncSettings,
    store: Arc<dyn RemoteStore>,
    parser: Box<dyn Parser<T>>,
    current: RwLock<Option<Arc<Snapshot<T>>>>,
    // Single-flight guard: at most one refresh per cache at any time.
    update_lock: Semaphore,
    ready: AtomicBool,
}

/// Keeps a parsed copy of a remote object warm in memory.
///
/// `initialize` performs the first fetch and starts a background worker that
/// polls the store's version marker every `cron_interval`. The full object is
/// only downloaded when the marker changes, and the new snapshot replaces the
/// old one wholesale. Readers call `get`, which never waits on the network.
pub struct SyncedCache<T> {
    inner: Arc<CacheInner<T>>,
    worker: Mutex<Option<Worker>>,
}

impl<T> SyncedCache<T>
where
    T: Send + Sync + 'static,
{
    pub fn new<P>(
        name: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        parser: P,
        settings: SyncSettings,
    ) -> Self
    where
        P: Parser<T>,
    {
        SyncedCache {
            inner: Arc::new(CacheInner {
                name: name.into(),
                settings,
                store,
                parser: Box::new(parser),
                current: RwLock::new(None),
                update_lock: Semaphore::new(1),
                ready: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the current snapshot, if one has been loaded.
    pub fn get(&self) -> Option<Arc<Snapshot<T>>> {
        self.inner.current.read().clone()
    }

    pub fn version(&self) -> Option<Version> {
        self.get().map(|snapshot| snapshot.version.clone())
    }

    /// True once any snapshot has been loaded.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Loads the first snapshot and starts the background refresh worker.
    ///
    /// The worker is started even when the first load fails so the cache
    /// becomes ready as soon as the store recovers. The load error is
    /// returned so the owner can decide whether to continue without data.
    pub async fn initialize(&self) -> Result<(), CacheError> {
        if self.worker.lock().is_some() {
            return Err(CacheError::AlreadyInitialized);
        }

        let initial = self.inner.sync_once().await;

        let (tx, rx) = mpsc::channel::<Command>(16);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            inner.run_worker(rx).await;
        });

        let mut worker = self.worker.lock();
        if worker.is_some() {
            handle.abort();
            return Err(CacheError::AlreadyInitialized);
        }
        *worker = Some(Worker { tx, handle });
        drop(worker);

        if let Err(e) = &initial {
            tracing::error!(cache = %self.inner.name, error = %e, "initial cache load failed");
        }
        initial.map(|_| ())
    }

    /// Runs a single metadata check (and fetch, if needed) on the caller's task.
    pub async fn sync_once(&self) -> Result<SyncOutcome, CacheError> {
        self.inner.sync_once().await
    }

    /// Asks the background worker to check the store now.
    pub async fn refresh(&self) -> Result<SyncOutcome, CacheError> {
        let tx = match self.worker.lock().as_ref() {
            Some(worker) => worker.tx.clone(),
            None => return Err(CacheError::NotRunning),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Refresh(reply_tx))
            .await
            .map_err(|_| CacheError::NotRunning)?;
        reply_rx.await.map_err(|_| CacheError::NotRunning)?
    }

    /// Stops the background worker. A refresh that is in flight gets
    /// `shutdown_grace` to finish before it is aborted. The last snapshot
    /// stays readable.
    pub async fn shutdown(&self) {
        let Some(Worker { tx, mut handle }) = self.worker.lock().take() else {
            return;
        };

        // The worker may be mid-refresh; a full channel must not block shutdown.
        let _ = tx.try_send(Command::Shutdown);
        drop(tx);

        match tokio::time::timeout(self.inner.settings.shutdown_grace, &mut handle).await {
            Ok(_) => tracing::info!(cache = %self.inner.name, "cache worker stopped"),
            Err(_) => {
                tracing::warn!(
                    cache = %self.inner.name,
                    "cache worker did not stop within the grace period, aborting"
                );
                handle.abort();
            }
        }
    }
}

impl<T> Drop for SyncedCache<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.handle.abort();
        }
    }
}

impl<T> CacheInner<T>
where
    T: Send + Sync + 'static,
{
    async fn run_worker(&self, mut rx: mpsc::Receiver<Command>) {
        let interval = self.settings.cron_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        // A refresh that overruns the interval must not cause a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        tracing::warn!(
                            cache = %self.name,
                            error = %e,
                            "scheduled cache refresh failed, keeping previous snapshot"
                        );
                    }
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Refresh(reply)) => {
                        let _ = reply.send(self.sync_once().await);
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }
    }

    async fn sync_once(&self) -> Result<SyncOutcome, CacheError> {
        let Ok(_permit) = self.update_lock.try_acquire() else {
            tracing::debug!(cache = %self.name, "refresh already in flight, skipping");
            self.record_outcome(SyncOutcome::Skipped);
            return Ok(SyncOutcome::Skipped);
        };

        let start = Instant::now();
        let result = self.fetch_if_changed().await;
        histogram!(CACHE_SYNC_DURATION, "cache" => self.name.clone())
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => self.record_outcome(*outcome),
            Err(_) => counter!(CACHE_SYNC_ERRORS, "cache" => self.name.clone()).increment(1),
        }
        result
    }

    async fn fetch_if_changed(&self) -> Result<SyncOutcome, CacheError> {
        let key = &self.settings.key;
        let version = self.store.get_metadata(key).await?;

        let current_version = self
            .current
            .read()
            .as_ref()
            .map(|snapshot| snapshot.version.clone());
        if current_version.as_ref() == Some(&version) {
            tracing::debug!(cache = %self.name, %version, "version unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        let bytes = self.store.get_object(key).await?;
        let data = self.parser.parse(&bytes)?;

        let snapshot = Arc::new(Snapshot {
            data,
            version: version.clone(),
            fetched_at: SystemTime::now(),
        });

        // The write guard is held only for the pointer swap.
        *self.current.write() = Some(snapshot);
        self.ready.store(true, Ordering::Release);

        tracing::info!(
            cache = %self.name,
            previous = ?current_version.as_ref().map(Version::as_str),
            %version,
            bytes = bytes.len(),
            "cache snapshot replaced"
        );
        Ok(SyncOutcome::Updated)
    }

    fn record_outcome(&self, outcome: SyncOutcome) {
        counter!(
            CACHE_SYNC_OUTCOME,
            "cache" => self.name.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }
}
