//! Field worker position and photo evidence pipeline.
//!
//! Positions are sampled continuously and pushed to the collector best
//! effort. Photos are validated, normalized and uploaded; uploads that fail
//! in transit wait in a durable queue until a later drain delivers them.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod services;

pub use config::AppConfig;
pub use error::AppError;
