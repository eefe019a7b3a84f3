//! Continuous location sampling.
//!
//! [`PositionSampler::start`] subscribes to the [`LocationProvider`] and
//! calls the caller's callbacks for every sample or error until the returned
//! [`WatchHandle`] is stopped. Each sample is also pushed to the collector in
//! a spawned task when a [`PositionForwarder`] is configured. Pushes are best
//! effort: failures are logged and never reach the callbacks.
//!
//! Callbacks run on a tokio worker and must not block.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::Position;
use crate::services::location_provider::{LocationProvider, PermissionState, PositionStream};
use crate::services::uplink::UplinkError;

/// Why a sample could not be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position")]
    Timeout,
    #[error("geolocation is not supported on this device")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    pub high_accuracy: bool,
    /// Maximum wait for a sample; 0 waits forever
    pub timeout_ms: u64,
    /// Maximum age of a cached sample accepted by `get_once`
    pub max_age_ms: u64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 15_000,
            max_age_ms: 10_000,
        }
    }
}

impl SamplerOptions {
    fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Receiver of best-effort position pushes
pub trait PositionForwarder: Send + Sync + 'static {
    fn update_position(&self, worker_id: String, position: Position)
        -> BoxFuture<Result<(), UplinkError>>;
}

struct Forwarding {
    forwarder: Arc<dyn PositionForwarder>,
    worker_id: String,
}

impl Forwarding {
    fn forward(&self, position: Position) {
        let push = self
            .forwarder
            .update_position(self.worker_id.clone(), position);
        tokio::spawn(async move {
            if let Err(e) = push.await {
                log::warn!("Position push failed: {}", e);
            }
        });
    }
}

type UpdateCallback = Box<dyn FnMut(Position) + Send>;
type ErrorCallback = Box<dyn FnMut(SamplerError) + Send>;

struct Callbacks {
    on_update: UpdateCallback,
    on_error: ErrorCallback,
}

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Watch whose callback is running on this thread
    static ACTIVE_WATCH: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Marks a watch as running its callback on this thread until dropped
struct ActiveWatchGuard {
    previous: Option<u64>,
}

impl ActiveWatchGuard {
    fn enter(id: u64) -> Self {
        Self {
            previous: ACTIVE_WATCH.with(|active| active.replace(Some(id))),
        }
    }
}

impl Drop for ActiveWatchGuard {
    fn drop(&mut self) {
        ACTIVE_WATCH.with(|active| active.set(self.previous));
    }
}

struct WatchInner {
    id: u64,
    stopped: AtomicBool,
    callbacks: Mutex<Option<Callbacks>>,
    task: Mutex<Option<JoinHandle<()>>>,
    finished: watch::Sender<bool>,
}

impl WatchInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn dispatch(&self, event: Result<Position, SamplerError>) {
        let Ok(mut guard) = self.callbacks.lock() else {
            return;
        };
        if self.is_stopped() {
            return;
        }
        let Some(callbacks) = guard.as_mut() else {
            return;
        };

        let active = ActiveWatchGuard::enter(self.id);
        match event {
            Ok(position) => (callbacks.on_update)(position),
            Err(error) => (callbacks.on_error)(error),
        }
        drop(active);

        // stopped from inside the callback
        if self.is_stopped() {
            *guard = None;
        }
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }

        let inside_callback = ACTIVE_WATCH.with(|active| active.get() == Some(self.id));
        if !inside_callback {
            // Blocks until a callback running on another thread returns
            if let Ok(mut callbacks) = self.callbacks.lock() {
                *callbacks = None;
            }
        }

        self.finished.send_replace(true);
        log::debug!("Stopped location watch {}", self.id);
    }
}

/// Handle to a running watch; clones refer to the same watch
#[derive(Clone)]
pub struct WatchHandle {
    inner: Arc<WatchInner>,
}

impl WatchHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Stops the watch. Idempotent; no callback runs after this returns, and
    /// it may be called from inside a callback of the same watch.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Resolves once the watch is stopped or the provider stream has ended
    pub async fn finished(&self) {
        let mut rx = self.inner.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

pub struct PositionSampler {
    provider: Arc<dyn LocationProvider>,
    forwarding: Option<Arc<Forwarding>>,
    last_known: Arc<Mutex<Option<Position>>>,
}

impl PositionSampler {
    pub fn new(provider: impl LocationProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            forwarding: None,
            last_known: Arc::default(),
        }
    }

    /// Pushes every sample of every watch to `forwarder` on behalf of `worker_id`
    pub fn with_forwarder(
        mut self,
        worker_id: impl Into<String>,
        forwarder: Arc<dyn PositionForwarder>,
    ) -> Self {
        self.forwarding = Some(Arc::new(Forwarding {
            forwarder,
            worker_id: worker_id.into(),
        }));
        self
    }

    /// Most recent sample seen by any watch or `get_once`
    pub fn last_known(&self) -> Option<Position> {
        self.last_known.lock().ok().and_then(|p| p.clone())
    }

    /// Begins continuous sampling. Must be called within a tokio runtime.
    ///
    /// A denied or unsupported permission is reported through `on_error` and
    /// the returned handle is already stopped.
    pub fn start<U, E>(&self, options: SamplerOptions, on_update: U, on_error: E) -> WatchHandle
    where
        U: FnMut(Position) + Send + 'static,
        E: FnMut(SamplerError) + Send + 'static,
    {
        let (finished, _) = watch::channel(false);
        let inner = Arc::new(WatchInner {
            id: NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed),
            stopped: AtomicBool::new(false),
            callbacks: Mutex::new(Some(Callbacks {
                on_update: Box::new(on_update),
                on_error: Box::new(on_error),
            })),
            task: Mutex::new(None),
            finished,
        });
        let handle = WatchHandle {
            inner: inner.clone(),
        };

        if let Err(e) = check_permission(self.provider.permission()) {
            log::warn!("Cannot start location watch: {}", e);
            inner.dispatch(Err(e));
            inner.stop();
            return handle;
        }

        log::info!(
            "Starting location watch {} (high accuracy: {}, timeout: {} ms)",
            inner.id,
            options.high_accuracy,
            options.timeout_ms
        );

        let stream = self.provider.watch(&options);
        let task = tokio::spawn(run_watch(
            inner.clone(),
            stream,
            options.timeout(),
            self.last_known.clone(),
            self.forwarding.clone(),
        ));
        if let Ok(mut slot) = inner.task.lock() {
            *slot = Some(task);
        }

        handle
    }

    /// Same as [`WatchHandle::stop`]
    pub fn stop(&self, handle: &WatchHandle) {
        handle.stop();
    }

    /// Single bounded capture, typically used to geotag a photo.
    ///
    /// Returns the last known sample if it is no older than `max_age_ms`,
    /// otherwise waits up to `timeout_ms` for a fresh one.
    pub async fn get_once(&self, options: &SamplerOptions) -> Result<Position, SamplerError> {
        check_permission(self.provider.permission())?;

        if options.max_age_ms > 0 {
            if let Some(cached) = self.last_known() {
                if cached.age_millis(Utc::now()) <= options.max_age_ms {
                    log::debug!("Using cached position for single capture");
                    return Ok(cached);
                }
            }
        }

        let mut stream = self.provider.watch(options);
        let next = match options.timeout() {
            Some(limit) => tokio::time::timeout(limit, stream.recv())
                .await
                .map_err(|_| SamplerError::Timeout)?,
            None => stream.recv().await,
        };

        let position = next.ok_or(SamplerError::PositionUnavailable)??;
        remember(&self.last_known, &position);
        Ok(position)
    }
}

fn check_permission(state: PermissionState) -> Result<(), SamplerError> {
    match state {
        PermissionState::Granted | PermissionState::Prompt => Ok(()),
        PermissionState::Denied => Err(SamplerError::PermissionDenied),
        PermissionState::Unsupported => Err(SamplerError::Unsupported),
    }
}

/// Ends the watch when its task is dropped: stream end, abort, or a
/// panicking callback
struct FinishOnDrop(Arc<WatchInner>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
        self.0.finished.send_replace(true);
    }
}

fn remember(last_known: &Mutex<Option<Position>>, position: &Position) {
    if let Ok(mut slot) = last_known.lock() {
        *slot = Some(position.clone());
    }
}

async fn run_watch(
    inner: Arc<WatchInner>,
    mut stream: PositionStream,
    timeout: Option<Duration>,
    last_known: Arc<Mutex<Option<Position>>>,
    forwarding: Option<Arc<Forwarding>>,
) {
    let _finish = FinishOnDrop(inner.clone());

    while !inner.is_stopped() {
        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    inner.dispatch(Err(SamplerError::Timeout));
                    continue;
                }
            },
            None => stream.recv().await,
        };

        match next {
            Some(Ok(position)) => {
                if inner.is_stopped() {
                    break;
                }
                remember(&last_known, &position);
                if let Some(forwarding) = &forwarding {
                    forwarding.forward(position.clone());
                }
                inner.dispatch(Ok(position));
            }
            Some(Err(error)) => {
                log::debug!("Location watch {} error: {}", inner.id, error);
                inner.dispatch(Err(error));
            }
            None => {
                log::info!("Location stream for watch {} ended", inner.id);
                break;
            }
        }
    }
}
