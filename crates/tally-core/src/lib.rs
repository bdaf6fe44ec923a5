//! tally-core — types shared by every Tally crate.
//!
//! Holds the observation model consumed by the aggregation engine, the
//! error enums surfaced across crate boundaries, and the `tally.toml`
//! configuration schema.

pub mod config;
pub mod error;
pub mod types;

pub use config::{parse_duration, TallyConfig};
pub use error::{ConfigError, MetricsError, MetricsResult};
pub use types::*;
