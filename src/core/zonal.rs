//! Per-zone masked pixel statistics.
//!
//! Each zone polygon is rasterized into its own byte mask, aligned
//! pixel-for-pixel with the index raster; the mask is created fresh per zone
//! so neighbouring zones never bleed into one another.

use gdal::vector::Geometry;
use gdal::Dataset;
use ndarray::Array2;
use rayon::prelude::*;

use crate::io::raster::{new_mem_mask, read_band_f64};
use crate::types::{FieldResult, GeoTransform, VectorZone, ZoneStatistic};

/// Descriptive statistics over one selection of pixel values
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptive {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub stddev: Option<f64>,
    pub median: Option<f64>,
    pub count: usize,
}

/// Mean, min, max, population standard deviation, and median.
///
/// An empty selection yields `None` for every statistic, never zero.
pub fn describe(values: &[f64]) -> Descriptive {
    let count = values.len();
    if count == 0 {
        return Descriptive {
            mean: None,
            min: None,
            max: None,
            stddev: None,
            median: None,
            count: 0,
        };
    }
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };

    Descriptive {
        mean: Some(mean),
        min: Some(min),
        max: Some(max),
        stddev: Some(variance.sqrt()),
        median: Some(median),
        count,
    }
}

/// Result of one zonal statistics pass
#[derive(Debug, Default)]
pub struct ZonalStatsOutcome {
    pub statistics: Vec<ZoneStatistic>,
    /// Zones excluded because their identity fields are missing
    pub skipped: Vec<String>,
}

/// Computes per-zone statistics from a rasterized zone mask
pub struct ZonalStatisticsEngine;

impl ZonalStatisticsEngine {
    /// Compute one `ZoneStatistic` per zone over band 1 of the index raster.
    ///
    /// Mask extraction against the shared GDAL handle runs sequentially
    /// (GDAL datasets are not thread-safe); the statistics aggregation over
    /// the per-zone pixel buffers runs on the rayon pool.
    pub fn compute(
        index_raster: &Dataset,
        zones: &[VectorZone],
    ) -> FieldResult<ZonalStatsOutcome> {
        let (width, height) = index_raster.raster_size();
        let transform = GeoTransform::from_gdal(&index_raster.geo_transform()?);
        let projection = index_raster.projection();
        let nodata = index_raster.rasterband(1)?.no_data_value();
        let data = read_band_f64(index_raster, 1)?;

        let mut skipped = Vec::new();
        let mut selections: Vec<(&VectorZone, Vec<f64>)> = Vec::with_capacity(zones.len());
        for zone in zones {
            if !zone.has_identity() {
                skipped.push(format!(
                    "zone '{}' (iot_id {}) is missing identity fields",
                    zone.name.as_deref().unwrap_or("?"),
                    zone.iot_id
                ));
                continue;
            }
            let mask = rasterize_zone(zone, width, height, &transform, &projection)?;
            let values = select_masked(&data, &mask, nodata);
            selections.push((zone, values));
        }

        let statistics: Vec<ZoneStatistic> = selections
            .into_par_iter()
            .map(|(zone, values)| {
                let stats = describe(&values);
                ZoneStatistic {
                    iot_id: zone.iot_id,
                    plot_id: zone.plot_id.clone(),
                    trial_id: zone.trial_id.clone(),
                    mean: stats.mean,
                    min: stats.min,
                    max: stats.max,
                    stddev: stats.stddev,
                    median: stats.median,
                    count: stats.count,
                }
            })
            .collect();

        log::info!(
            "Computed zonal statistics for {} zones ({} skipped, {} empty)",
            statistics.len(),
            skipped.len(),
            statistics.iter().filter(|s| !s.is_defined()).count()
        );
        Ok(ZonalStatsOutcome {
            statistics,
            skipped,
        })
    }
}

/// Rasterize one zone polygon into a fresh mask aligned with the index grid
fn rasterize_zone(
    zone: &VectorZone,
    width: usize,
    height: usize,
    transform: &GeoTransform,
    projection: &str,
) -> FieldResult<Array2<u8>> {
    let mut mask_dataset = new_mem_mask(width, height, transform, projection)?;
    let geometry = Geometry::from_wkt(&zone.wkt()?)?;
    gdal::raster::rasterize(&mut mask_dataset, &[1], &[geometry], &[1.0], None)?;

    let buffer = mask_dataset.rasterband(1)?.read_as::<u8>(
        (0, 0),
        (width, height),
        (width, height),
        None,
    )?;
    Array2::from_shape_vec((height, width), buffer.data).map_err(|e| {
        crate::types::FieldError::Processing(format!(
            "failed to reshape mask for zone {}: {}",
            zone.iot_id, e
        ))
    })
}

fn select_masked(data: &Array2<f64>, mask: &Array2<u8>, nodata: Option<f64>) -> Vec<f64> {
    data.iter()
        .zip(mask.iter())
        .filter_map(|(&value, &flag)| {
            let valid =
                flag == 1 && value.is_finite() && nodata.map_or(true, |nodata| value != nodata);
            valid.then_some(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_describe_constant_values() {
        let stats = describe(&[3.0, 3.0, 3.0, 3.0]);
        assert_eq!(stats.mean, Some(3.0));
        assert_eq!(stats.min, Some(3.0));
        assert_eq!(stats.max, Some(3.0));
        assert_eq!(stats.stddev, Some(0.0));
        assert_eq!(stats.median, Some(3.0));
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn test_describe_empty_selection_is_undefined() {
        let stats = describe(&[]);
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_none());
        assert!(stats.min.is_none());
        assert!(stats.max.is_none());
        assert!(stats.stddev.is_none());
        assert!(stats.median.is_none());
    }

    #[test]
    fn test_describe_median_even_count() {
        let stats = describe(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(stats.median, Some(2.5));
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(4.0));
    }

    #[test]
    fn test_describe_population_stddev() {
        let stats = describe(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(stats.stddev.unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(stats.mean.unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_select_masked_excludes_nodata_and_nan() {
        let data = array![[1.0, -999.0], [f64::NAN, 4.0]];
        let mask = array![[1u8, 1], [1, 0]];
        let values = select_masked(&data, &mask, Some(-999.0));
        assert_eq!(values, vec![1.0]);
    }
}
