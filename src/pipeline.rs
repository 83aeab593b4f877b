//! End-to-end orchestration of the align, index, zonal statistics, match,
//! and commit stages, per (image, index) unit.
//!
//! Failures at the (image, index) level are recorded and the run continues;
//! only a failure to fetch the trial's zone set aborts the whole run.

use chrono::{DateTime, Utc};
use gdal::Dataset;
use serde_json::Value as JsonValue;

use crate::config::{PipelineConfig, RasterImageConfig, VegetationIndexConfig};
use crate::core::align::RasterAligner;
use crate::core::index::VegetationIndexCalculator;
use crate::core::matching::DatastreamMatcher;
use crate::core::observations::{commit_observations, ObservationBatchBuilder};
use crate::core::zonal::ZonalStatisticsEngine;
use crate::io::codec::{decode_base64_raster, encode_raster_base64};
use crate::io::processes::ProcessesClient;
use crate::io::raster::open_raster;
use crate::io::sensorthings::SensorThingsClient;
use crate::types::{FieldError, FieldResult, VectorZone, ZoneStatistic, ZoneStreams};

/// Outcome of one (image, index) processing unit
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub raster_path: String,
    pub timestamp: DateTime<Utc>,
    pub index_name: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl ProcessingResult {
    fn success(image: &RasterImageConfig, index: &VegetationIndexConfig) -> Self {
        ProcessingResult {
            raster_path: image.path.display().to_string(),
            timestamp: image.timestamp,
            index_name: index.name.clone(),
            success: true,
            error_message: None,
        }
    }

    fn failure(
        image: &RasterImageConfig,
        index: &VegetationIndexConfig,
        message: String,
    ) -> Self {
        ProcessingResult {
            raster_path: image.path.display().to_string(),
            timestamp: image.timestamp,
            index_name: index.name.clone(),
            success: false,
            error_message: Some(message),
        }
    }
}

/// Run-level totals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct ImagePipeline {
    config: PipelineConfig,
    store: SensorThingsClient,
    processes: Option<ProcessesClient>,
    aligner: RasterAligner,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig) -> FieldResult<Self> {
        config.validate()?;
        let store = SensorThingsClient::new(&config.sensorthings_url)?;
        let processes = match config.processes_url.as_deref() {
            Some(url) => Some(ProcessesClient::new(url)?),
            None => None,
        };
        Ok(ImagePipeline {
            config,
            store,
            processes,
            aligner: RasterAligner::standard(),
        })
    }

    /// Process every configured (image, index) pair for the trial.
    ///
    /// Zones and their metric streams are fetched once; each image is then
    /// aligned and each index computed, aggregated, matched, and committed.
    pub fn run(&self) -> FieldResult<Vec<ProcessingResult>> {
        let trial_id = &self.config.trial_id;
        log::info!("Fetching zones for trial: {}", trial_id);
        let zones = self.store.fetch_zones(trial_id)?;
        let zone_streams = self.store.fetch_zone_streams(trial_id)?;

        let mut results = Vec::new();
        for image in &self.config.raster_images {
            log::info!("Processing raster image: {}", image.path.display());
            let prepared = self.prepare_image(image, &zones);
            match prepared {
                Ok((aligned, encoded)) => {
                    for index in &self.config.vegetation_indices {
                        results.push(self.process_single_index(
                            image,
                            index,
                            &aligned,
                            encoded.as_deref(),
                            &zones,
                            &zone_streams,
                        ));
                    }
                }
                Err(e) => {
                    let message = format!(
                        "failed to load/clip raster {}: {}",
                        image.path.display(),
                        e
                    );
                    log::error!("{}", message);
                    for index in &self.config.vegetation_indices {
                        results.push(ProcessingResult::failure(image, index, message.clone()));
                    }
                }
            }
        }
        Ok(results)
    }

    /// Open and align one raster; when the execution service is configured,
    /// also encode the aligned raster once for all of the image's indices.
    fn prepare_image(
        &self,
        image: &RasterImageConfig,
        zones: &[VectorZone],
    ) -> FieldResult<(Dataset, Option<String>)> {
        let raster = open_raster(&image.path)?;
        let aligned = self.aligner.align(raster, zones)?;
        let encoded = if self.processes.is_some() {
            Some(encode_raster_base64(&aligned)?)
        } else {
            None
        };
        Ok((aligned, encoded))
    }

    fn process_single_index(
        &self,
        image: &RasterImageConfig,
        index: &VegetationIndexConfig,
        aligned: &Dataset,
        encoded: Option<&str>,
        zones: &[VectorZone],
        zone_streams: &[ZoneStreams],
    ) -> ProcessingResult {
        match self.run_index(image, index, aligned, encoded, zones, zone_streams) {
            Ok(created) => {
                log::info!(
                    "Successfully processed {} for {} ({} observations)",
                    index.name,
                    image.path.display(),
                    created
                );
                ProcessingResult::success(image, index)
            }
            Err(e) => {
                let message = format!(
                    "error processing {} for {}: {}",
                    index.name,
                    image.path.display(),
                    e
                );
                log::error!("{}", message);
                ProcessingResult::failure(image, index, message)
            }
        }
    }

    fn run_index(
        &self,
        image: &RasterImageConfig,
        index: &VegetationIndexConfig,
        aligned: &Dataset,
        encoded: Option<&str>,
        zones: &[VectorZone],
        zone_streams: &[ZoneStreams],
    ) -> FieldResult<usize> {
        let index_raster = self.compute_index(aligned, encoded, index)?;
        let outcome = ZonalStatisticsEngine::compute(&index_raster, zones)?;
        drop(index_raster);

        if !outcome.skipped.is_empty() {
            log::warn!(
                "{} zones excluded from statistics: {}",
                outcome.skipped.len(),
                outcome.skipped.join("; ")
            );
        }
        if outcome.statistics.is_empty() {
            return Err(FieldError::Processing(
                "zonal statistics produced no results".to_string(),
            ));
        }

        // Zones outside the raster extent carry no statistics and drop out
        // here; they are not an error.
        let defined: Vec<ZoneStatistic> = outcome
            .statistics
            .into_iter()
            .filter(ZoneStatistic::is_defined)
            .collect();

        let matches = DatastreamMatcher::match_statistics(&defined, &index.name, zone_streams);
        let builder = ObservationBatchBuilder::new(image.timestamp, Utc::now());
        let operations = builder.build(&matches.matched)?;
        commit_observations(&self.store, operations)
    }

    fn compute_index(
        &self,
        aligned: &Dataset,
        encoded: Option<&str>,
        index: &VegetationIndexConfig,
    ) -> FieldResult<Dataset> {
        match (&self.processes, encoded) {
            (Some(client), Some(encoded)) => {
                let mut inputs = serde_json::Map::new();
                inputs.insert(
                    "input_value_raster".to_string(),
                    JsonValue::String(encoded.to_string()),
                );
                for (role, band) in &index.bands {
                    inputs.insert(role.clone(), JsonValue::from(*band));
                }
                let output = client.execute(&index.process, &JsonValue::Object(inputs))?;
                let payload = output.value.as_str().ok_or_else(|| {
                    FieldError::Remote(format!(
                        "process '{}' output value is not a base64 string",
                        index.process
                    ))
                })?;
                decode_base64_raster(payload)
            }
            _ => VegetationIndexCalculator::compute(aligned, index),
        }
    }

    /// Log and return run totals
    pub fn summarize(results: &[ProcessingResult]) -> RunSummary {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = total - succeeded;
        log::info!(
            "Processing summary: {} total, {} succeeded, {} failed",
            total,
            succeeded,
            failed
        );
        for result in results.iter().filter(|r| !r.success) {
            log::warn!(
                "  failed: {} - {}: {}",
                result.raster_path,
                result.index_name,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        RunSummary {
            total,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn result(success: bool) -> ProcessingResult {
        let image = RasterImageConfig {
            path: PathBuf::from("./gis_data/flight.tif"),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 12, 10, 30, 0).unwrap(),
            description: None,
        };
        let index = VegetationIndexConfig {
            name: "NDVI".to_string(),
            process: "ndvi".to_string(),
            bands: Default::default(),
            description: None,
        };
        if success {
            ProcessingResult::success(&image, &index)
        } else {
            ProcessingResult::failure(&image, &index, "boom".to_string())
        }
    }

    #[test]
    fn test_summarize_counts_successes_and_failures() {
        let results = vec![result(true), result(false), result(true)];
        let summary = ImagePipeline::summarize(&results);
        assert_eq!(
            summary,
            RunSummary {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_pipeline_rejects_invalid_configuration() {
        let config = PipelineConfig {
            trial_id: String::new(),
            sensorthings_url: "http://localhost".to_string(),
            processes_url: None,
            raster_images: Vec::new(),
            vegetation_indices: Vec::new(),
            datastreams: Vec::new(),
            plot_id_field: None,
            treatment_id_field: None,
            year: None,
        };
        assert!(matches!(
            ImagePipeline::new(config),
            Err(FieldError::Configuration(_))
        ));
    }
}
