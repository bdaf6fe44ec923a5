//! Expirer — background sweep that drops idle series.
//!
//! Bounds memory when label values are unbounded (request IDs, pod names).
//! The sweep takes the registry's own lock; there is no second lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::Registry;

/// Periodically removes series not observed within `ttl`.
pub struct Expirer {
    registry: Arc<Registry>,
    ttl: Duration,
    interval: Duration,
}

impl Expirer {
    pub fn new(registry: Arc<Registry>, ttl: Duration, interval: Duration) -> Self {
        Self {
            registry,
            ttl,
            interval,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep against the current time.
    ///
    /// Reads the tokio clock so paused test runtimes can drive expiry.
    pub fn sweep(&self) -> usize {
        self.sweep_at(tokio::time::Instant::now().into_std())
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let removed = self.registry.expire_stale(self.ttl, now);
        if removed > 0 {
            debug!(
                removed,
                remaining = self.registry.series_count(),
                "expired stale series"
            );
        }
        removed
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            ttl_secs = self.ttl.as_secs_f64(),
            interval_secs = self.interval.as_secs_f64(),
            "series expirer started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be stale yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    info!("series expirer shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Labels, Observation};

    use crate::aggregator::Aggregator;

    fn setup(ttl: Duration) -> (Aggregator, Expirer) {
        let registry = Arc::new(Registry::default());
        let expirer = Expirer::new(registry.clone(), ttl, Duration::from_secs(1));
        (Aggregator::new(registry), expirer)
    }

    #[test]
    fn sweep_at_removes_only_idle_series() {
        let (agg, expirer) = setup(Duration::from_secs(30));
        let t0 = Instant::now();

        agg.apply(Observation::gauge("conn", 1.0).with_label("peer", "a").at(t0)).unwrap();
        agg.apply(Observation::gauge("conn", 1.0).with_label("peer", "b").at(t0)).unwrap();
        agg.apply(
            Observation::gauge("conn", 2.0)
                .with_label("peer", "b")
                .at(t0 + Duration::from_secs(20)),
        )
        .unwrap();

        assert_eq!(expirer.sweep_at(t0 + Duration::from_secs(10)), 0);
        assert_eq!(expirer.sweep_at(t0 + Duration::from_secs(45)), 1);

        let text = agg.render();
        assert!(!text.contains("peer=\"a\""));
        assert!(text.contains("conn{peer=\"b\"} 2"));
    }

    #[test]
    fn expired_series_can_come_back() {
        let (agg, expirer) = setup(Duration::from_secs(5));
        let t0 = Instant::now();
        let labels = Labels::new().with("job", "x");

        agg.apply(Observation::counter("runs", 7.0).with_labels(labels.clone()).at(t0)).unwrap();
        assert_eq!(expirer.sweep_at(t0 + Duration::from_secs(6)), 1);
        assert_eq!(agg.render(), "# HELP runs\n# TYPE runs counter\n");

        agg.apply(Observation::counter("runs", 1.0).with_labels(labels).at(t0 + Duration::from_secs(7)))
            .unwrap();
        assert!(agg.render().ends_with("runs{job=\"x\"} 1\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_sweeps_and_stops() {
        let registry = Arc::new(Registry::default());
        let agg = Aggregator::new(registry.clone());
        agg.apply(Observation::gauge("temp", 20.0)).unwrap();

        let expirer = Expirer::new(registry.clone(), Duration::from_secs(2), Duration::from_millis(500));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { expirer.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.series_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(registry.series_count(), 0);
        assert_eq!(registry.family_count(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
