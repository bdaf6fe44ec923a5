//! The collector strategy interface.
//!
//! The HTTP front only ever talks to an `Arc<dyn Collector>`, picked once
//! when the server is built. [`Aggregator`](crate::Aggregator) is the
//! built-in implementation; deployments that need their own aggregation
//! plug in another one, either as the whole strategy or as the delegate
//! the built-in one hands `custom` records to.

use tally_core::{MetricsResult, Observation};

/// Something that absorbs observations and renders exposition text.
pub trait Collector: Send + Sync {
    /// Merge one observation. Must be fast and never block on I/O.
    fn apply(&self, observation: Observation) -> MetricsResult<()>;

    /// Render the current state as Prometheus exposition text.
    ///
    /// Infallible: an empty state renders as an empty string.
    fn render(&self) -> String;

    /// Drop all accumulated state. Strategies without state keep the default.
    fn reset(&self) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use tally_core::{MetricsError, ObservationValue};

    use super::*;

    /// Records raw payloads and renders them as a count.
    #[derive(Default)]
    pub struct RawLog {
        pub payloads: Mutex<Vec<serde_json::Value>>,
    }

    impl Collector for RawLog {
        fn apply(&self, observation: Observation) -> MetricsResult<()> {
            match observation.value {
                ObservationValue::Custom(raw) => {
                    self.payloads.lock().unwrap().push(raw);
                    Ok(())
                }
                other => Err(MetricsError::Custom(format!(
                    "raw log only takes custom payloads, got {}",
                    other.metric_type()
                ))),
            }
        }

        fn render(&self) -> String {
            let n = self.payloads.lock().unwrap().len();
            if n == 0 {
                return String::new();
            }
            format!("# TYPE raw_payloads_total counter\nraw_payloads_total {n}\n")
        }

        fn reset(&self) {
            self.payloads.lock().unwrap().clear();
        }
    }
}
