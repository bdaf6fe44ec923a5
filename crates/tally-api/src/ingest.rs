//! Ingest gateway — decodes wire records into typed observations.
//!
//! A request body is one JSON record or an array of them:
//!
//! ```json
//! {"type": "gauge", "name": "queue_depth", "help": "Jobs waiting", "value": 12, "labels": {"queue": "email"}}
//! ```
//!
//! `type` selects `counter`, `gauge`, `histogram`, `summary` or `custom`.
//! Custom records are passed on whole, without interpretation. Anything
//! else that fails to decode is dropped here and never reaches a collector.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Deserialize;
use thiserror::Error;

use tally_core::{Labels, MetricsError, Observation, ObservationValue};

/// Why a record was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not JSON: {0}")]
    Body(serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no string \"type\" field")]
    MissingType,

    #[error("malformed record: {0}")]
    Malformed(serde_json::Error),

    #[error("label {key:?} must be a string, number or bool")]
    LabelValue { key: String },

    #[error("value {0:?} is not a number")]
    Number(String),

    #[error(transparent)]
    Invalid(#[from] MetricsError),
}

/// Built-in record shapes, discriminated by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireRecord {
    Counter(NumericRecord),
    Gauge(NumericRecord),
    Histogram(NumericRecord),
    Summary(NumericRecord),
}

#[derive(Debug, Deserialize)]
struct NumericRecord {
    name: String,
    #[serde(default)]
    help: String,
    value: WireNumber,
    #[serde(default)]
    labels: BTreeMap<String, serde_json::Value>,
}

/// Numbers may arrive as JSON numbers or strings (`"NaN"`, `"+Inf"`, `"1.5"`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Number(f64),
    Text(String),
}

impl WireNumber {
    fn to_f64(&self) -> Result<f64, DecodeError> {
        match self {
            WireNumber::Number(v) => Ok(*v),
            WireNumber::Text(s) => match s.trim() {
                "NaN" => Ok(f64::NAN),
                "+Inf" | "Inf" => Ok(f64::INFINITY),
                "-Inf" => Ok(f64::NEG_INFINITY),
                other => other.parse().map_err(|_| DecodeError::Number(s.clone())),
            },
        }
    }
}

/// Split a request body into individual records.
pub fn split_body(body: &[u8]) -> Result<Vec<serde_json::Value>, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(DecodeError::Body)?;
    Ok(match value {
        serde_json::Value::Array(records) => records,
        record => vec![record],
    })
}

/// Decode one record, stamping it with the current time.
pub fn decode_record(raw: serde_json::Value) -> Result<Observation, DecodeError> {
    decode_record_at(raw, Instant::now())
}

pub fn decode_record_at(raw: serde_json::Value, received: Instant) -> Result<Observation, DecodeError> {
    let object = raw.as_object().ok_or(DecodeError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?;

    if kind == "custom" {
        let name = object
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        return Ok(Observation::custom(name, raw).at(received));
    }

    let record: WireRecord = serde_json::from_value(raw).map_err(DecodeError::Malformed)?;
    let (record, value) = match record {
        WireRecord::Counter(r) => {
            let v = r.value.to_f64()?;
            (r, ObservationValue::Counter(v))
        }
        WireRecord::Gauge(r) => {
            let v = r.value.to_f64()?;
            (r, ObservationValue::Gauge(v))
        }
        WireRecord::Histogram(r) => {
            let v = r.value.to_f64()?;
            (r, ObservationValue::Histogram(v))
        }
        WireRecord::Summary(r) => {
            let v = r.value.to_f64()?;
            (r, ObservationValue::Summary(v))
        }
    };

    let labels = decode_labels(record.labels)?;
    let observation = Observation::new(record.name, value)
        .with_help(record.help)
        .with_labels(labels)
        .at(received);
    observation.validate()?;
    Ok(observation)
}

fn decode_labels(raw: BTreeMap<String, serde_json::Value>) -> Result<Labels, DecodeError> {
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return Err(DecodeError::LabelValue { key }),
            };
            Ok((key, value))
        })
        .collect()
}
