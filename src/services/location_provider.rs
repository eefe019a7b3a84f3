//! Platform geolocation seam.
//!
//! A [`LocationProvider`] reports the permission state and hands out position
//! streams. The stream ends when the provider runs out of samples; the watch
//! ends when the receiver is dropped.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::models::Position;
use crate::services::position_sampler::{SamplerError, SamplerOptions};

pub type PositionStream = mpsc::UnboundedReceiver<Result<Position, SamplerError>>;

/// Location permission as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; the platform asks on first use
    Prompt,
    Unsupported,
}

pub trait LocationProvider: Send + Sync + 'static {
    fn permission(&self) -> PermissionState;

    /// Starts a platform watch and returns its stream of samples
    fn watch(&self, options: &SamplerOptions) -> PositionStream;
}

struct SimulatedState {
    permission: PermissionState,
    subscribers: Vec<mpsc::UnboundedSender<Result<Position, SamplerError>>>,
}

/// Deterministic provider driven by explicit `emit` calls.
///
/// Clones share subscribers, so a test can keep one clone and hand the other
/// to a sampler.
#[derive(Clone)]
pub struct SimulatedProvider {
    state: Arc<Mutex<SimulatedState>>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedState {
                permission: PermissionState::Granted,
                subscribers: Vec::new(),
            })),
        }
    }

    pub fn set_permission(&self, permission: PermissionState) {
        if let Ok(mut state) = self.state.lock() {
            state.permission = permission;
        }
    }

    /// Delivers a sample to every open watch
    pub fn emit(&self, position: Position) {
        self.broadcast(Ok(position));
    }

    /// Delivers an error to every open watch
    pub fn emit_error(&self, error: SamplerError) {
        self.broadcast(Err(error));
    }

    /// Number of watches still listening
    pub fn subscriber_count(&self) -> usize {
        match self.state.lock() {
            Ok(mut state) => {
                state.subscribers.retain(|tx| !tx.is_closed());
                state.subscribers.len()
            }
            Err(_) => 0,
        }
    }

    fn broadcast(&self, event: Result<Position, SamplerError>) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl LocationProvider for SimulatedProvider {
    fn permission(&self) -> PermissionState {
        self.state
            .lock()
            .map(|state| state.permission)
            .unwrap_or(PermissionState::Unsupported)
    }

    fn watch(&self, _options: &SamplerOptions) -> PositionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.push(tx);
        }
        rx
    }
}

/// One line of a recorded track file
#[derive(Debug, Deserialize)]
struct TrackPoint {
    lat: f64,
    lng: f64,
    #[serde(default = "default_accuracy")]
    accuracy: f64,
}

fn default_accuracy() -> f64 {
    10.0
}

/// Replays a recorded track, one sample per interval.
///
/// Samples are stamped with the time they are replayed. Each watch replays
/// the whole track from the beginning; `watch` must be called from within a
/// tokio runtime.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    track: Arc<Vec<(f64, f64, f64)>>,
    interval: Duration,
}

impl ReplayProvider {
    pub fn new(track: Vec<(f64, f64, f64)>, interval: Duration) -> Self {
        Self {
            track: Arc::new(track),
            interval,
        }
    }

    /// Loads a JSON-lines file of `{"lat": .., "lng": .., "accuracy": ..}`
    /// objects; blank lines and `#` comments are skipped
    pub fn from_file(path: &Path, interval: Duration) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        let mut track = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let point: TrackPoint = serde_json::from_str(line).map_err(|e| {
                AppError::InvalidInput(format!(
                    "{}:{}: invalid track point: {}",
                    path.display(),
                    index + 1,
                    e
                ))
            })?;
            track.push((point.lat, point.lng, point.accuracy));
        }

        log::info!(
            "Loaded {} track points from {}",
            track.len(),
            path.display()
        );
        Ok(Self::new(track, interval))
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }
}

impl LocationProvider for ReplayProvider {
    fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    fn watch(&self, _options: &SamplerOptions) -> PositionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = self.track.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            for (index, &(lat, lng, accuracy)) in track.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(interval).await;
                }
                let position = Position {
                    lat,
                    lng,
                    accuracy,
                    captured_at: Utc::now(),
                };
                if tx.send(Ok(position)).is_err() {
                    log::debug!("Replay watch dropped after {} points", index);
                    return;
                }
            }
        });

        rx
    }
}
