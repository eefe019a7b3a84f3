use crate::models::DrainReport;
use crate::services::capture_service::{CaptureService, PhotoDelivery};
use crate::services::upload_queue::QueueError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Default pause between two drains
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);
/// Pause after the queue itself could not be read or written
const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// What the sync loop is doing right now
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncProgress {
    #[default]
    Idle,
    Draining {
        pending: usize,
    },
    Finished(DrainReport),
    Failed(String),
}

/// Stop flag and wake-up signal of a single loop run
#[derive(Default)]
struct RunControl {
    stopped: AtomicBool,
    wake: Notify,
}

struct Shared {
    running: AtomicBool,
    progress: watch::Sender<SyncProgress>,
}

impl Shared {
    async fn run_cycle<D: PhotoDelivery>(
        &self,
        service: &CaptureService<D>,
    ) -> Result<DrainReport, QueueError> {
        let result = match service.queue().size().await {
            Ok(pending) => {
                self.progress
                    .send_replace(SyncProgress::Draining { pending });
                service.retry_pending().await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                self.progress.send_replace(SyncProgress::Finished(*report));
            }
            Err(e) => {
                self.progress.send_replace(SyncProgress::Failed(e.to_string()));
            }
        }
        result
    }
}

/// Periodic drain of the retry queue.
///
/// The loop drains once right away, then again after every interval or
/// whenever [`BackgroundSync::trigger`] is called (reconnect, resume, manual
/// retry). Every `start` gets its own [`RunControl`], so a loop that is still
/// finishing after `stop` never picks up the signals of a later run.
pub struct BackgroundSync {
    shared: Arc<Shared>,
    control: Mutex<Option<Arc<RunControl>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for BackgroundSync {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundSync {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(SyncProgress::Idle);
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                progress,
            }),
            control: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.shared.progress.subscribe()
    }

    /// Starts the background loop on the current tokio runtime
    pub fn start<D>(&self, service: Arc<CaptureService<D>>, interval: Duration)
    where
        D: PhotoDelivery + 'static,
    {
        let Ok(mut current) = self.control.lock() else {
            log::error!("Background sync state poisoned, not starting");
            return;
        };
        if current.is_some() {
            log::warn!("Background sync already running");
            return;
        }

        log::info!(
            "Starting background sync with {} second interval",
            interval.as_secs()
        );

        let control = Arc::new(RunControl::default());
        *current = Some(control.clone());
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            while !control.stopped.load(Ordering::SeqCst) {
                let wait = match shared.run_cycle(&service).await {
                    Ok(report) => {
                        log::info!("Background sync completed: {:?}", report);
                        interval
                    }
                    Err(e) => {
                        log::error!("Background sync error: {}", e);
                        STORAGE_RETRY_DELAY
                    }
                };

                if control.stopped.load(Ordering::SeqCst) {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = control.wake.notified() => {
                        log::debug!("Background sync woken up");
                    }
                }
            }

            if !shared.running.load(Ordering::SeqCst) {
                shared.progress.send_replace(SyncProgress::Idle);
            }
            log::info!("Background sync stopped");
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(task);
        }
    }

    /// Wakes the loop for an immediate drain
    pub fn trigger(&self) {
        if let Some(control) = self.current_control() {
            control.wake.notify_one();
        }
    }

    /// Stops the loop after the current drain; idempotent
    pub fn stop(&self) {
        let control = self.control.lock().ok().and_then(|mut slot| slot.take());
        if let Some(control) = control {
            log::info!("Stopping background sync");
            self.shared.running.store(false, Ordering::SeqCst);
            control.stopped.store(true, Ordering::SeqCst);
            control.wake.notify_one();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Waits until every loop task started so far has exited
    pub async fn join(&self) {
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Background sync task failed: {}", e);
            }
        }
    }

    /// Drains once in the caller's task, outside the schedule
    pub async fn sync_now<D: PhotoDelivery>(
        &self,
        service: &CaptureService<D>,
    ) -> Result<DrainReport, QueueError> {
        self.shared.run_cycle(service).await
    }

    fn current_control(&self) -> Option<Arc<RunControl>> {
        self.control.lock().ok().and_then(|slot| slot.clone())
    }
}
