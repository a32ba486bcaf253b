//! Weather Fusion
//!
//! Polls the public station network around a configured point, fuses every
//! outdoor station's latest reading into one median value per metric, and
//! publishes the result as retained MQTT state with Home Assistant
//! discovery.
//!
//! # Pipeline
//!
//! - [`geo`] turns the center point and radius into a query box
//! - [`ingest`] fetches, validates and sanitizes station records
//! - [`inject`] fills missing dew point and feels-like per station
//! - [`consensus`] reduces the set to one value per metric
//! - [`session`] publishes, caches and replays the payload
//!
//! [`scheduler`] drives the pipeline; [`mqtt`] binds the session to rumqttc.

pub mod climate;
pub mod config;
pub mod consensus;
pub mod discovery;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod inject;
pub mod mqtt;
pub mod scheduler;
pub mod session;
pub mod station;

pub use config::{Config, ConfigError};
pub use consensus::ConsensusPayload;
pub use error::FusionError;
pub use geo::{BoundingBox, Point};
pub use ingest::{IngestError, StationClient, StationSource};
pub use session::{PublishSession, SessionError, SessionPhase, SessionTopics, Transport};
pub use station::StationReport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
