//! tally-metrics — the aggregation engine behind the Tally gateway.
//!
//! Merges observations from many concurrent senders into one in-memory
//! registry and renders it as Prometheus text exposition for scraping.
//!
//! # Architecture
//!
//! ```text
//! Registry (one mutex over all families)
//!   ├── Family: name, type, help, Labels → Series
//!   ├── snapshot() → owned copy, rendered outside the lock
//!   └── expire_stale() ← Expirer, on a fixed interval
//!
//! Aggregator (built-in Collector)
//!   ├── apply() ← called per decoded observation
//!   └── render() → render_prometheus(registry.snapshot())
//! ```
//!
//! # Merge semantics
//!
//! | Type | Effect of one observation |
//! |---|---|
//! | counter | value += v |
//! | gauge | value = v |
//! | histogram | every bucket with bound ≥ v, count and sum |
//! | summary | count, sum, and the quantile sample window |
//! | custom | forwarded to the configured custom [`Collector`] |

pub mod aggregator;
pub mod collector;
pub mod expirer;
pub mod prometheus;
pub mod registry;
pub mod series;

pub use aggregator::Aggregator;
pub use collector::Collector;
pub use expirer::Expirer;
pub use prometheus::{format_value, render_prometheus};
pub use registry::{FamilySnapshot, Registry, RegistryOptions, Snapshot};
pub use series::{HistogramState, Series, SeriesValue, SummaryState};
