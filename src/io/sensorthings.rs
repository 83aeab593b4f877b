//! Client for the SensorThings metadata store.
//!
//! Reads use `$filter`/`$expand` queries with `@iot.nextLink` continuation;
//! writes go through the `$batch` endpoint as one atomic submission.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::entities::{BatchOperation, BatchRequest};
use crate::types::{FieldError, FieldResult, MetricStream, VectorZone, ZoneStreams};

/// One page of a collection response
#[derive(Debug, Deserialize)]
pub struct CollectionPage {
    #[serde(default)]
    pub value: Vec<JsonValue>,
    #[serde(rename = "@iot.nextLink")]
    pub next_link: Option<String>,
}

/// Follow `@iot.nextLink` continuations until exhausted, concatenating the
/// pages' entity lists in arrival order.
///
/// Any page failure aborts the whole fetch; no partial result is returned.
pub fn collect_pages<F>(first_url: String, mut fetch_page: F) -> FieldResult<Vec<JsonValue>>
where
    F: FnMut(&str) -> FieldResult<CollectionPage>,
{
    let mut entities = Vec::new();
    let mut next = Some(first_url);
    while let Some(url) = next {
        let page = fetch_page(&url)?;
        entities.extend(page.value);
        next = page.next_link;
    }
    Ok(entities)
}

pub struct SensorThingsClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl SensorThingsClient {
    pub fn new(base_url: &str) -> FieldResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FieldError::Remote(format!("failed to create HTTP client: {}", e)))?;
        Ok(SensorThingsClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn get_json(&self, url: &str) -> FieldResult<JsonValue> {
        log::debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| FieldError::Remote(format!("GET {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(FieldError::Remote(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| FieldError::Remote(format!("GET {}: malformed JSON body: {}", url, e)))
    }

    /// Fetch a complete entity collection, following pagination
    pub fn fetch_collection(&self, path_and_query: &str) -> FieldResult<Vec<JsonValue>> {
        let first_url = format!("{}/{}", self.base_url, path_and_query);
        collect_pages(first_url, |url| {
            let body = self.get_json(url)?;
            serde_json::from_value(body)
                .map_err(|e| FieldError::Remote(format!("malformed collection page: {}", e)))
        })
    }

    /// Fetch the zone polygons for a trial, expanded with their locations.
    ///
    /// Zero zones is fatal for the run, so it is an error here.
    pub fn fetch_zones(&self, trial_id: &str) -> FieldResult<Vec<VectorZone>> {
        let query = format!(
            "Things?$filter=properties/trial_id eq '{}'&$expand=Locations($select=location)",
            trial_id
        );
        let things = self.fetch_collection(&query)?;
        if things.is_empty() {
            return Err(FieldError::NotFound(format!(
                "no plots found for trial id: '{}'",
                trial_id
            )));
        }
        let zones: Vec<VectorZone> = things.iter().filter_map(zone_from_thing).collect();
        if zones.len() < things.len() {
            log::warn!(
                "{} of {} fetched Things had no usable location geometry",
                things.len() - zones.len(),
                things.len()
            );
        }
        if zones.is_empty() {
            return Err(FieldError::NotFound(format!(
                "no plot geometries available for trial id: '{}'",
                trial_id
            )));
        }
        log::info!("Fetched {} zones for trial '{}'", zones.len(), trial_id);
        Ok(zones)
    }

    /// Fetch every zone's metric streams for a trial, expanded in one query
    pub fn fetch_zone_streams(&self, trial_id: &str) -> FieldResult<Vec<ZoneStreams>> {
        let query = format!(
            "Things?$filter=properties/trial_id eq '{}'&$expand=Datastreams",
            trial_id
        );
        let things = self.fetch_collection(&query)?;
        let streams: Vec<ZoneStreams> = things.iter().filter_map(zone_streams_from_thing).collect();
        log::info!(
            "Fetched datastreams for {} zones of trial '{}'",
            streams.len(),
            trial_id
        );
        Ok(streams)
    }

    /// Submit one atomic `$batch` of create-operations.
    ///
    /// All-or-nothing from the caller's perspective: a transport failure or
    /// non-2xx status surfaces as an error, with no partial retry here.
    pub fn submit_batch(&self, requests: Vec<BatchOperation>) -> FieldResult<JsonValue> {
        let url = format!("{}/$batch", self.base_url);
        log::debug!("POST {} ({} operations)", url, requests.len());
        let response = self
            .http
            .post(&url)
            .json(&BatchRequest { requests })
            .send()
            .map_err(|e| FieldError::Remote(format!("POST {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FieldError::Remote(format!(
                "POST {} returned {}: {}",
                url, status, body
            )));
        }
        response
            .json()
            .map_err(|e| FieldError::Remote(format!("POST {}: malformed JSON body: {}", url, e)))
    }
}

fn json_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a zone record from a Thing expanded with its Locations
pub fn zone_from_thing(thing: &JsonValue) -> Option<VectorZone> {
    let iot_id = thing.get("@iot.id")?.as_i64()?;
    let location = thing.get("Locations")?.get(0)?.get("location")?;
    // Locations carry either a GeoJSON Feature or a bare geometry.
    let geometry = location
        .get("geometry")
        .cloned()
        .unwrap_or_else(|| location.clone());
    let properties = thing.get("properties");
    let prop = |key: &str| properties.and_then(|p| p.get(key)).and_then(json_string);
    Some(VectorZone {
        iot_id,
        name: thing.get("name").and_then(json_string),
        trial_id: prop("trial_id"),
        plot_id: prop("plot_id"),
        treatment_id: prop("treatment_id"),
        year: properties
            .and_then(|p| p.get("year"))
            .and_then(JsonValue::as_i64)
            .map(|y| y as i32),
        geometry,
    })
}

/// Build a zone's metric stream list from a Thing expanded with Datastreams
pub fn zone_streams_from_thing(thing: &JsonValue) -> Option<ZoneStreams> {
    let iot_id = thing.get("@iot.id")?.as_i64()?;
    let streams = thing
        .get("Datastreams")
        .and_then(JsonValue::as_array)
        .map(|datastreams| {
            datastreams
                .iter()
                .filter_map(|ds| {
                    Some(MetricStream {
                        id: ds.get("@iot.id")?.as_i64()?,
                        raster_data: ds
                            .get("properties")
                            .and_then(|p| p.get("raster_data"))
                            .and_then(json_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ZoneStreams { iot_id, streams })
}
