//! One-time provisioning of zones in the metadata store.
//!
//! Each trial plot from a local zone layer becomes one Thing with one
//! Location (the polygon as GeoJSON) and one Datastream per configured
//! template, created in a single `$batch` submission. Additional templates
//! can later be appended to already-provisioned Things.

use std::path::Path;

use chrono::{Datelike, Utc};
use gdal::vector::{FieldValue, LayerAccess};
use gdal::Dataset;
use serde_json::{json, Value as JsonValue};

use crate::config::{DatastreamTemplate, PipelineConfig};
use crate::entities::{BatchMethod, BatchOperation, Datastream, EntityRef, Location, Thing};
use crate::io::sensorthings::SensorThingsClient;
use crate::types::{FieldError, FieldResult};

/// Naming context for one plot, passed explicitly to template rendering
#[derive(Debug, Clone, Copy)]
pub struct PlotLabel<'a> {
    pub trial_id: &'a str,
    pub plot_id: &'a str,
}

impl<'a> PlotLabel<'a> {
    fn qualified(&self) -> String {
        format!("{}-{}", self.trial_id, self.plot_id)
    }
}

/// Substitute the `{plot_id}` placeholder with the qualified plot label
pub fn render_template(template: &str, label: &PlotLabel) -> String {
    template.replace("{plot_id}", &label.qualified())
}

fn datastream_from_template(
    template: &DatastreamTemplate,
    label: &PlotLabel,
    thing: Option<EntityRef>,
) -> Datastream {
    Datastream {
        name: render_template(&template.name, label),
        description: render_template(&template.description, label),
        observation_type: template.observation_type.clone(),
        unit_of_measurement: template.unit_of_measurement.clone(),
        sensor: template.sensor,
        observed_property: template.observed_property,
        properties: template.properties.clone(),
        thing,
    }
}

/// Build the Datastream create-operations for a set of already-provisioned
/// Things (as returned by the store), one per (Thing, template) pair
fn datastream_operations(
    things: &[JsonValue],
    templates: &[DatastreamTemplate],
    default_trial: &str,
) -> FieldResult<Vec<BatchOperation>> {
    let mut operations = Vec::new();
    for thing in things {
        let iot_id = match thing.get("@iot.id").and_then(JsonValue::as_i64) {
            Some(id) => id,
            None => continue,
        };
        let properties = thing.get("properties");
        let plot_id = properties
            .and_then(|p| p.get("plot_id"))
            .map(json_field_string)
            .unwrap_or_default();
        let thing_trial = properties
            .and_then(|p| p.get("trial_id"))
            .and_then(JsonValue::as_str)
            .unwrap_or(default_trial)
            .to_string();
        let label = PlotLabel {
            trial_id: &thing_trial,
            plot_id: &plot_id,
        };
        for template in templates {
            let datastream =
                datastream_from_template(template, &label, Some(EntityRef::new(iot_id)));
            operations.push(BatchOperation {
                id: operations.len(),
                method: BatchMethod::Post,
                url: "Datastreams".to_string(),
                body: serde_json::to_value(&datastream)?,
            });
        }
    }
    Ok(operations)
}

pub struct ZoneProvisioner<'a> {
    client: &'a SensorThingsClient,
    config: &'a PipelineConfig,
}

impl<'a> ZoneProvisioner<'a> {
    pub fn new(client: &'a SensorThingsClient, config: &'a PipelineConfig) -> Self {
        ZoneProvisioner { client, config }
    }

    /// Read a local zone layer (GeoJSON or Shapefile) into Thing entities,
    /// one per feature, with Location and templated Datastreams attached
    pub fn plot_things_from_file<P: AsRef<Path>>(&self, path: P) -> FieldResult<Vec<Thing>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FieldError::NotFound(format!(
                "zone layer not found: {}",
                path.display()
            )));
        }
        let plot_id_field = self.config.plot_id_field.as_deref().ok_or_else(|| {
            FieldError::Configuration(
                "plot_id_field must be specified for provisioning".to_string(),
            )
        })?;
        let trial_id = &self.config.trial_id;
        let year = self.config.year.unwrap_or_else(|| Utc::now().year());

        let dataset = Dataset::open(path)?;
        let mut layer = dataset.layer(0)?;

        let mut things = Vec::new();
        for feature in layer.features() {
            let plot_id = feature
                .field(plot_id_field)?
                .and_then(field_string)
                .ok_or_else(|| {
                    FieldError::Configuration(format!(
                        "plot id field '{}' does not exist in feature properties",
                        plot_id_field
                    ))
                })?;
            let treatment_id = match self.config.treatment_id_field.as_deref() {
                Some(field) => feature.field(field)?.and_then(field_string),
                None => None,
            };
            let geometry = feature.geometry().ok_or_else(|| {
                FieldError::Processing(format!("plot '{}' has no geometry", plot_id))
            })?;
            let geometry: JsonValue = serde_json::from_str(&geometry.json()?)?;

            let label = PlotLabel {
                trial_id,
                plot_id: &plot_id,
            };
            things.push(self.plot_thing(&label, treatment_id, year, geometry));
        }
        Ok(things)
    }

    /// Create one Thing per feature of a local zone layer, in one batch.
    ///
    /// Returns the number of Things created.
    pub fn provision_from_file<P: AsRef<Path>>(&self, path: P) -> FieldResult<usize> {
        let path = path.as_ref();
        log::info!(
            "Provisioning zones for trial '{}' from {}",
            self.config.trial_id,
            path.display()
        );
        let things = self.plot_things_from_file(path)?;

        let mut operations = Vec::with_capacity(things.len());
        for thing in &things {
            operations.push(BatchOperation {
                id: operations.len(),
                method: BatchMethod::Post,
                url: "Things".to_string(),
                body: serde_json::to_value(thing)?,
            });
        }

        let count = operations.len();
        if count == 0 {
            log::warn!("Zone layer {} has no features", path.display());
            return Ok(0);
        }
        self.client.submit_batch(operations)?;
        log::info!(
            "{} Things created successfully for trial id: {}",
            count,
            self.config.trial_id
        );
        Ok(count)
    }

    fn plot_thing(
        &self,
        label: &PlotLabel,
        treatment_id: Option<String>,
        year: i32,
        geometry: JsonValue,
    ) -> Thing {
        let qualified = label.qualified();
        let mut properties = json!({
            "trial_id": label.trial_id,
            "plot_id": label.plot_id,
            "year": year,
        });
        if let Some(treatment_id) = treatment_id {
            properties["treatment_id"] = JsonValue::String(treatment_id);
        }
        Thing {
            name: format!("Trial Plot - {}", qualified),
            description: format!(
                "Agricultural trial plot {} belonging to trial {}",
                label.plot_id, label.trial_id
            ),
            properties,
            locations: vec![Location {
                name: format!("Location of Trial Plot - {}", qualified),
                description: format!("Polygon Geometry for Trial Plot - {}", qualified),
                encoding_type: "application/geo+json".to_string(),
                location: json!({"type": "Feature", "geometry": geometry}),
                properties: Some(json!({
                    "trial_id": label.trial_id,
                    "plot_id": label.plot_id,
                })),
            }],
            datastreams: self
                .config
                .datastreams
                .iter()
                .map(|template| datastream_from_template(template, label, None))
                .collect(),
        }
    }

    /// Append additional Datastreams to every already-provisioned Thing of
    /// the trial, each referencing its Thing by id, in one batch.
    pub fn append_datastreams(&self, templates: &[DatastreamTemplate]) -> FieldResult<usize> {
        let trial_id = &self.config.trial_id;
        let things = self.client.fetch_collection(&format!(
            "Things?$filter=startswith(properties/trial_id,'{}')",
            trial_id
        ))?;
        let operations = datastream_operations(&things, templates, trial_id)?;

        let count = operations.len();
        if count == 0 {
            log::warn!("No datastreams to create for trial '{}'", trial_id);
            return Ok(0);
        }
        log::info!(
            "Creating {} new datastreams for field trial '{}'",
            count,
            trial_id
        );
        self.client.submit_batch(operations)?;
        log::info!(
            "Successfully created {} new datastreams for field trial '{}'",
            count,
            trial_id
        );
        Ok(count)
    }
}

fn field_string(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::StringValue(s) => Some(s),
        FieldValue::IntegerValue(v) => Some(v.to_string()),
        FieldValue::Integer64Value(v) => Some(v.to_string()),
        FieldValue::RealValue(v) => Some(v.to_string()),
        _ => None,
    }
}

fn json_field_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
