use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::RawMessage;

#[derive(Debug, Error)]
pub enum MetricConversionError {
    #[error("invalid metric: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// A metric as published on the bus.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawMetric {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub dims: Map<String, Value>,
}

impl TryFrom<&RawMessage> for RawMetric {
    type Error = MetricConversionError;

    fn try_from(message: &RawMessage) -> Result<Self, Self::Error> {
        Ok(serde_json::from_slice(&message.payload)?)
    }
}

/// A KairosDB data point.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Point {
    pub name: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub value: f64,
    pub tags: Map<String, Value>,
}

impl From<RawMetric> for Point {
    fn from(metric: RawMetric) -> Self {
        let mut tags = Map::with_capacity(metric.dims.len());

        for (dimension, value) in metric.dims {
            match value {
                Value::String(s) => {
                    let s = s.trim();
                    if s.is_empty() {
                        debug!(
                            metric_name = %metric.name,
                            %dimension, "Skipping dimension because it is an empty string"
                        );
                    } else {
                        tags.insert(dimension, Value::String(s.to_string()));
                    }
                }
                Value::Number(_) | Value::Bool(_) => {
                    tags.insert(dimension, value);
                }
                other => {
                    warn!(
                        metric_name = %metric.name,
                        %dimension,
                        "Skipping dimension because it is a {}",
                        kind_of(&other)
                    );
                }
            }
        }

        Point {
            name: metric.name,
            timestamp: metric.timestamp.timestamp_millis(),
            value: metric.value,
            tags,
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
