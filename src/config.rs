//! Run configuration, deserialized from a YAML or JSON file and threaded
//! explicitly through component constructors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::entities::{EntityRef, UnitOfMeasurement};
use crate::types::{FieldError, FieldResult};

/// One raster image to process, with its acquisition (flight) timestamp
#[derive(Debug, Clone, Deserialize)]
pub struct RasterImageConfig {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One vegetation index to compute per raster image.
///
/// `process` is the execution-service process identifier (also the key of
/// the local registry); `bands` maps band roles such as `red_band` or
/// `nir_band` to 1-based band indexes of the clipped raster.
#[derive(Debug, Clone, Deserialize)]
pub struct VegetationIndexConfig {
    pub name: String,
    pub process: String,
    #[serde(default)]
    pub bands: BTreeMap<String, isize>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Datastream template applied to every zone at provisioning time.
///
/// `name` and `description` may contain a `{plot_id}` placeholder, rendered
/// by `provision::render_template`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatastreamTemplate {
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
    #[serde(default)]
    pub properties: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub trial_id: String,
    pub sensorthings_url: String,
    /// Execution-service base URL; indices are computed locally when absent
    #[serde(default)]
    pub processes_url: Option<String>,
    #[serde(default)]
    pub raster_images: Vec<RasterImageConfig>,
    #[serde(default)]
    pub vegetation_indices: Vec<VegetationIndexConfig>,
    #[serde(default)]
    pub datastreams: Vec<DatastreamTemplate>,
    #[serde(default)]
    pub plot_id_field: Option<String>,
    #[serde(default)]
    pub treatment_id_field: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl PipelineConfig {
    /// Load a configuration file, dispatching on the file extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> FieldResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FieldError::Configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let config: PipelineConfig = match extension.as_str() {
            "yml" | "yaml" => serde_yaml::from_str(&contents).map_err(|e| {
                FieldError::Configuration(format!("invalid YAML in {}: {}", path.display(), e))
            })?,
            "json" => serde_json::from_str(&contents).map_err(|e| {
                FieldError::Configuration(format!("invalid JSON in {}: {}", path.display(), e))
            })?,
            other => {
                return Err(FieldError::Configuration(format!(
                    "unsupported configuration format '.{}', use .yml, .yaml, or .json",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FieldResult<()> {
        if self.trial_id.trim().is_empty() {
            return Err(FieldError::Configuration(
                "trial_id must be specified in the configuration".to_string(),
            ));
        }
        if self.sensorthings_url.trim().is_empty() {
            return Err(FieldError::Configuration(
                "sensorthings_url must be specified in the configuration".to_string(),
            ));
        }
        for index in &self.vegetation_indices {
            if index.process.trim().is_empty() {
                return Err(FieldError::Configuration(format!(
                    "vegetation index '{}' has no process identifier",
                    index.name
                )));
            }
            for (role, band) in &index.bands {
                if *band < 1 {
                    return Err(FieldError::Configuration(format!(
                        "vegetation index '{}': band role '{}' must be a 1-based index, got {}",
                        index.name, role, band
                    )));
                }
            }
        }
        Ok(())
    }
}
