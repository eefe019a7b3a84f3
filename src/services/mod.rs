pub mod background_sync;
pub mod capture_service;
pub mod credentials;
pub mod distance;
pub mod key_value_store;
pub mod location_provider;
pub mod position_sampler;
pub mod upload_queue;
pub mod uplink;

pub use background_sync::{BackgroundSync, SyncProgress};
pub use capture_service::{geotag, CaptureService, PhotoDelivery, SubmitOutcome};
pub use credentials::{CredentialStore, StaticCredentials, StoredCredentials};
pub use key_value_store::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use location_provider::{LocationProvider, PermissionState, ReplayProvider, SimulatedProvider};
pub use position_sampler::{PositionSampler, SamplerError, SamplerOptions, WatchHandle};
pub use upload_queue::{QueueError, UploadQueue};
pub use uplink::{UploadFailure, Uplink, UplinkConfig, UplinkError};
