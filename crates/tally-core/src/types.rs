//! Shared types used across Tally crates.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    /// Opaque payload handled by a pluggable collector.
    Custom,
}

impl MetricType {
    /// Name used on the `# TYPE` line of the exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Custom => "untyped",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a family name is observed with a different type than
/// the one it was created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Refuse the new observation; existing series are untouched.
    #[default]
    Reject,
    /// Drop the family's series and re-create it with the new type.
    Replace,
}

/// A label set.
///
/// Backed by a sorted map, so two sets with the same pairs compare, hash
/// and order identically no matter how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Payload of an observation. The variant is the declared metric type.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    /// Increment to add to the series.
    Counter(f64),
    /// Absolute value replacing the series value.
    Gauge(f64),
    /// One sample to bucket.
    Histogram(f64),
    /// One sample for the quantile window.
    Summary(f64),
    /// Raw record forwarded untouched to a custom collector.
    Custom(serde_json::Value),
}

impl ObservationValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            ObservationValue::Counter(_) => MetricType::Counter,
            ObservationValue::Gauge(_) => MetricType::Gauge,
            ObservationValue::Histogram(_) => MetricType::Histogram,
            ObservationValue::Summary(_) => MetricType::Summary,
            ObservationValue::Custom(_) => MetricType::Custom,
        }
    }

    /// Numeric payload, `None` for custom records.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ObservationValue::Counter(v)
            | ObservationValue::Gauge(v)
            | ObservationValue::Histogram(v)
            | ObservationValue::Summary(v) => Some(v),
            ObservationValue::Custom(_) => None,
        }
    }
}

/// A single decoded metric observation.
///
/// Updates exactly one series of one family when applied.
#[derive(Debug, Clone)]
pub struct Observation {
    pub name: String,
    pub help: String,
    pub labels: Labels,
    pub value: ObservationValue,
    /// When the observation was received.
    pub timestamp: Instant,
}

impl Observation {
    pub fn new(name: impl Into<String>, value: ObservationValue) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            labels: Labels::new(),
            value,
            timestamp: Instant::now(),
        }
    }

    pub fn counter(name: impl Into<String>, increment: f64) -> Self {
        Self::new(name, ObservationValue::Counter(increment))
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, ObservationValue::Gauge(value))
    }

    pub fn histogram(name: impl Into<String>, sample: f64) -> Self {
        Self::new(name, ObservationValue::Histogram(sample))
    }

    pub fn summary(name: impl Into<String>, sample: f64) -> Self {
        Self::new(name, ObservationValue::Summary(sample))
    }

    pub fn custom(name: impl Into<String>, raw: serde_json::Value) -> Self {
        Self::new(name, ObservationValue::Custom(raw))
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// Override the receive time.
    pub fn at(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn metric_type(&self) -> MetricType {
        self.value.metric_type()
    }

    /// Check the name and label keys against the exposition grammar.
    ///
    /// Custom records carry their own naming rules and are not checked.
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.metric_type() == MetricType::Custom {
            return Ok(());
        }
        if !is_valid_metric_name(&self.name) {
            return Err(MetricsError::InvalidName(self.name.clone()));
        }
        if let Some((key, _)) = self.labels.iter().find(|(k, _)| !is_valid_label_name(k)) {
            return Err(MetricsError::InvalidLabel {
                name: self.name.clone(),
                label: key.to_string(),
            });
        }
        // The renderer adds these itself; a client copy would duplicate them.
        let reserved = match self.metric_type() {
            MetricType::Histogram => Some("le"),
            MetricType::Summary => Some("quantile"),
            _ => None,
        };
        if let Some(label) = reserved.filter(|l| self.labels.get(l).is_some()) {
            return Err(MetricsError::InvalidLabel {
                name: self.name.clone(),
                label: label.to_string(),
            });
        }
        Ok(())
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(labels: &Labels) -> u64 {
        let mut h = DefaultHasher::new();
        labels.hash(&mut h);
        h.finish()
    }

    #[test]
    fn labels_ignore_insertion_order() {
        let a = Labels::new().with("method", "GET").with("code", "200");
        let b = Labels::new().with("code", "200").with("method", "GET");
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let keys: Vec<_> = a.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["code", "method"]);
    }

    #[test]
    fn labels_from_iterator() {
        let labels: Labels = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("a"), Some("1"));
        assert_eq!(labels.get("missing"), None);
    }

    #[test]
    fn observation_builders_set_type() {
        assert_eq!(Observation::counter("c", 1.0).metric_type(), MetricType::Counter);
        assert_eq!(Observation::gauge("g", 1.0).metric_type(), MetricType::Gauge);
        assert_eq!(Observation::histogram("h", 1.0).metric_type(), MetricType::Histogram);
        assert_eq!(Observation::summary("s", 1.0).metric_type(), MetricType::Summary);
        let raw = serde_json::json!({"type": "custom"});
        assert_eq!(Observation::custom("x", raw).metric_type(), MetricType::Custom);
    }

    #[test]
    fn metric_name_rules() {
        assert!(is_valid_metric_name("http_requests_total"));
        assert!(is_valid_metric_name("ns:sub_metric"));
        assert!(is_valid_metric_name("_hidden"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("9lives"));
        assert!(!is_valid_metric_name("has-dash"));
        assert!(!is_valid_metric_name("has space"));
    }

    #[test]
    fn label_name_rules() {
        assert!(is_valid_label_name("abcd"));
        assert!(is_valid_label_name("_x1"));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("a:b"));
        assert!(!is_valid_label_name("1a"));
    }

    #[test]
    fn validate_rejects_bad_label() {
        let obs = Observation::gauge("ok_name", 1.0).with_label("bad-key", "v");
        assert!(matches!(obs.validate(), Err(MetricsError::InvalidLabel { .. })));

        let obs = Observation::gauge("bad name", 1.0);
        assert!(matches!(obs.validate(), Err(MetricsError::InvalidName(_))));

        let obs = Observation::custom("anything goes", serde_json::json!({}));
        assert!(obs.validate().is_ok());
    }

    #[test]
    fn validate_rejects_labels_the_renderer_adds() {
        let obs = Observation::histogram("lat", 0.2).with_label("le", "x");
        assert_eq!(
            obs.validate(),
            Err(MetricsError::InvalidLabel {
                name: "lat".to_string(),
                label: "le".to_string(),
            })
        );

        let obs = Observation::summary("sz", 3.0).with_label("quantile", "y");
        assert!(matches!(obs.validate(), Err(MetricsError::InvalidLabel { .. })));

        // Only reserved for the type that renders it.
        assert!(Observation::gauge("g", 1.0).with_label("le", "x").validate().is_ok());
        assert!(Observation::histogram("h", 1.0).with_label("quantile", "x").validate().is_ok());
    }

    #[test]
    fn metric_type_serde_is_lowercase() {
        let t: MetricType = serde_json::from_str("\"histogram\"").unwrap();
        assert_eq!(t, MetricType::Histogram);
        assert_eq!(MetricType::Custom.to_string(), "untyped");
    }
}
