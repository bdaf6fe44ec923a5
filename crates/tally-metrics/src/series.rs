//! Per-series state and the type-specific merge rules.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tally_core::{MetricType, MetricsError, MetricsResult, ObservationValue};

use crate::registry::RegistryOptions;

/// Cumulative histogram state.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramState {
    /// Upper bounds, shared by every series of the registry.
    pub bounds: Arc<[f64]>,
    /// `cumulative[i]` counts samples `<= bounds[i]`.
    pub cumulative: Vec<u64>,
    pub sum: f64,
    /// Also the value of the implicit `+Inf` bucket.
    pub count: u64,
}

impl HistogramState {
    pub fn new(bounds: Arc<[f64]>) -> Self {
        let cumulative = vec![0; bounds.len()];
        Self {
            bounds,
            cumulative,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, sample: f64) {
        // Bounds are sorted, so every bucket from the first match upward counts it.
        let first = self.bounds.partition_point(|b| *b < sample);
        for bucket in &mut self.cumulative[first..] {
            *bucket += 1;
        }
        self.count += 1;
        self.sum += sample;
    }
}

/// Summary state: running totals plus a bounded window of recent samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryState {
    pub samples: VecDeque<f64>,
    pub window: usize,
    pub sum: f64,
    pub count: u64,
}

impl SummaryState {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window.min(64)),
            window,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, sample: f64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.count += 1;
        self.sum += sample;
    }

    /// Nearest-rank quantiles over the retained samples: the smallest
    /// sample with at least `q * n` samples at or below it.
    ///
    /// Returns `NaN` for every quantile while the window is empty.
    pub fn quantiles(&self, quantiles: &[f64]) -> Vec<f64> {
        if self.samples.is_empty() {
            return vec![f64::NAN; quantiles.len()];
        }

        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_unstable_by(f64::total_cmp);

        quantiles
            .iter()
            .map(|q| {
                let rank = (sorted.len() as f64 * q).ceil() as usize;
                sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
            })
            .collect()
    }
}

/// Accumulated value of one series. The shape follows the family type.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramState),
    Summary(SummaryState),
}

impl SeriesValue {
    /// Empty state for a new series, `None` for types the registry
    /// does not store.
    pub fn zero(kind: MetricType, options: &RegistryOptions) -> Option<Self> {
        match kind {
            MetricType::Counter => Some(SeriesValue::Counter(0.0)),
            MetricType::Gauge => Some(SeriesValue::Gauge(0.0)),
            MetricType::Histogram => Some(SeriesValue::Histogram(HistogramState::new(
                options.buckets.clone(),
            ))),
            MetricType::Summary => Some(SeriesValue::Summary(SummaryState::new(
                options.summary_window,
            ))),
            MetricType::Custom => None,
        }
    }

    pub fn metric_type(&self) -> MetricType {
        match self {
            SeriesValue::Counter(_) => MetricType::Counter,
            SeriesValue::Gauge(_) => MetricType::Gauge,
            SeriesValue::Histogram(_) => MetricType::Histogram,
            SeriesValue::Summary(_) => MetricType::Summary,
        }
    }

    /// Scalar value of a counter or gauge.
    pub fn scalar(&self) -> Option<f64> {
        match *self {
            SeriesValue::Counter(v) | SeriesValue::Gauge(v) => Some(v),
            _ => None,
        }
    }

    /// Merge one observation into this state.
    ///
    /// The value must already have passed [`check_value`].
    pub fn merge(&mut self, name: &str, value: &ObservationValue) -> MetricsResult<()> {
        match (self, value) {
            (SeriesValue::Counter(total), ObservationValue::Counter(v)) => *total += v,
            (SeriesValue::Gauge(current), ObservationValue::Gauge(v)) => *current = *v,
            (SeriesValue::Histogram(h), ObservationValue::Histogram(v)) => h.observe(*v),
            (SeriesValue::Summary(s), ObservationValue::Summary(v)) => s.observe(*v),
            (existing, value) => {
                return Err(MetricsError::TypeConflict {
                    name: name.to_string(),
                    existing: existing.metric_type(),
                    attempted: value.metric_type(),
                });
            }
        }
        Ok(())
    }
}

/// Reject values that would break a series' invariants.
///
/// Counters only move forward; histogram and summary sums must stay
/// meaningful, so NaN samples are refused.
pub fn check_value(name: &str, value: &ObservationValue) -> MetricsResult<()> {
    let invalid = |v: f64, reason: &'static str| MetricsError::InvalidValue {
        name: name.to_string(),
        kind: value.metric_type(),
        value: v,
        reason,
    };

    match *value {
        ObservationValue::Counter(v) if !v.is_finite() => Err(invalid(v, "counter increments must be finite")),
        ObservationValue::Counter(v) if v < 0.0 => Err(invalid(v, "counters cannot decrease")),
        ObservationValue::Histogram(v) | ObservationValue::Summary(v) if v.is_nan() => {
            Err(invalid(v, "samples must be numbers"))
        }
        _ => Ok(()),
    }
}

/// One label set's state inside a family.
#[derive(Debug, Clone)]
pub struct Series {
    pub value: SeriesValue,
    /// Receive time of the newest observation applied.
    pub last_seen: Instant,
}

impl Series {
    pub fn new(value: SeriesValue, created: Instant) -> Self {
        Self {
            value,
            last_seen: created,
        }
    }

    pub fn record(&mut self, name: &str, value: &ObservationValue, at: Instant) -> MetricsResult<()> {
        self.value.merge(name, value)?;
        self.last_seen = self.last_seen.max(at);
        Ok(())
    }
}
