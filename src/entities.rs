//! Typed SensorThings API entity records.
//!
//! Entity bodies are plain Rust records and are only turned into JSON at the
//! store boundary (`io::sensorthings`), never handled as loose maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Reference to an existing entity by its store-assigned id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "@iot.id")]
    pub id: i64,
}

impl EntityRef {
    pub fn new(id: i64) -> Self {
        EntityRef { id }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOfMeasurement {
    pub name: String,
    pub symbol: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub description: String,
    #[serde(rename = "encodingType")]
    pub encoding_type: String,
    pub location: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datastream {
    pub name: String,
    pub description: String,
    #[serde(rename = "observationType")]
    pub observation_type: String,
    #[serde(rename = "unitOfMeasurement")]
    pub unit_of_measurement: UnitOfMeasurement,
    #[serde(rename = "Sensor")]
    pub sensor: EntityRef,
    #[serde(rename = "ObservedProperty")]
    pub observed_property: EntityRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonValue>,
    /// Only set when appending a stream to an already-provisioned Thing
    #[serde(rename = "Thing", skip_serializing_if = "Option::is_none")]
    pub thing: Option<EntityRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Thing {
    pub name: String,
    pub description: String,
    pub properties: JsonValue,
    #[serde(rename = "Locations")]
    pub locations: Vec<Location>,
    #[serde(rename = "Datastreams")]
    pub datastreams: Vec<Datastream>,
}

/// Statistics payload carried by one observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationResult {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub median: f64,
}

/// One append-only observation tied to exactly one Datastream
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    #[serde(rename = "phenomenonTime")]
    pub phenomenon_time: DateTime<Utc>,
    #[serde(rename = "resultTime")]
    pub result_time: DateTime<Utc>,
    pub result: ObservationResult,
    #[serde(rename = "Datastream")]
    pub datastream: EntityRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMethod {
    Post,
}

/// One numbered unit-of-work inside a `$batch` submission.
///
/// Ids must be unique and contiguous from 0 within a single submission; the
/// store uses them to correlate per-request results.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOperation {
    pub id: usize,
    pub method: BatchMethod,
    pub url: String,
    pub body: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub requests: Vec<BatchOperation>,
}
