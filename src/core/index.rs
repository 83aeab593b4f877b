//! Band-ratio vegetation indices.
//!
//! The local registry mirrors the processes exposed by the execution
//! service: the contract (inputs, formula, nodata policy) is identical
//! whether an index is computed here or delegated remotely.

use gdal::Dataset;
use ndarray::{Array2, Zip};

use crate::config::VegetationIndexConfig;
use crate::io::raster::{new_mem_raster_f64, read_band_f64, write_band_f64};
use crate::types::{FieldError, FieldResult, GeoTransform, NODATA_SENTINEL};

/// Soil adjustment factor for SAVI
const SAVI_L: f64 = 0.5;

/// Normalized difference of two bands: `(a - b) / (a + b)`.
///
/// Zero denominators and non-finite ratios become the nodata sentinel, so
/// NaN never reaches the zonal statistics.
pub fn normalized_difference(a: &Array2<f64>, b: &Array2<f64>) -> FieldResult<Array2<f64>> {
    check_shapes(a, b)?;
    let mut out = Array2::zeros(a.dim());
    Zip::from(&mut out).and(a).and(b).for_each(|o, &a, &b| {
        let denominator = a + b;
        let ratio = (a - b) / denominator;
        *o = if denominator == 0.0 || !ratio.is_finite() {
            NODATA_SENTINEL
        } else {
            ratio
        };
    });
    Ok(out)
}

/// Soil Adjusted Vegetation Index:
/// `((nir - red) / (nir + red + L)) * (1 + L)` with L = 0.5
pub fn soil_adjusted(nir: &Array2<f64>, red: &Array2<f64>) -> FieldResult<Array2<f64>> {
    check_shapes(nir, red)?;
    let mut out = Array2::zeros(nir.dim());
    Zip::from(&mut out).and(nir).and(red).for_each(|o, &nir, &red| {
        let denominator = nir + red + SAVI_L;
        let value = ((nir - red) / denominator) * (1.0 + SAVI_L);
        *o = if denominator == 0.0 || !value.is_finite() {
            NODATA_SENTINEL
        } else {
            value
        };
    });
    Ok(out)
}

fn check_shapes(a: &Array2<f64>, b: &Array2<f64>) -> FieldResult<()> {
    if a.dim() != b.dim() {
        return Err(FieldError::Processing(format!(
            "band shapes differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(())
}

/// Computes a vegetation index raster from the bands of a clipped raster
pub struct VegetationIndexCalculator;

impl VegetationIndexCalculator {
    /// Compute the configured index locally, resolving the process id
    /// against the built-in registry.
    ///
    /// The output is a single-band float64 raster sharing the input's
    /// extent, geotransform, and projection, with nodata set to the
    /// sentinel.
    pub fn compute(dataset: &Dataset, index: &VegetationIndexConfig) -> FieldResult<Dataset> {
        log::info!("Calculating {} (process '{}')", index.name, index.process);
        let values = match index.process.to_lowercase().as_str() {
            "ndvi" => {
                let nir = Self::band(dataset, index, "nir_band")?;
                let red = Self::band(dataset, index, "red_band")?;
                normalized_difference(&nir, &red)?
            }
            "ndre" => {
                let nir = Self::band(dataset, index, "nir_band")?;
                let rededge = Self::band(dataset, index, "rededge_band")?;
                normalized_difference(&nir, &rededge)?
            }
            "gndvi" => {
                let nir = Self::band(dataset, index, "nir_band")?;
                let green = Self::band(dataset, index, "green_band")?;
                normalized_difference(&nir, &green)?
            }
            "savi" => {
                let nir = Self::band(dataset, index, "nir_band")?;
                let red = Self::band(dataset, index, "red_band")?;
                soil_adjusted(&nir, &red)?
            }
            other => {
                return Err(FieldError::Configuration(format!(
                    "no local implementation for process '{}'",
                    other
                )))
            }
        };

        let (width, height) = dataset.raster_size();
        let transform = GeoTransform::from_gdal(&dataset.geo_transform()?);
        let mut output =
            new_mem_raster_f64(width, height, 1, &transform, &dataset.projection())?;
        write_band_f64(&mut output, 1, &values, Some(NODATA_SENTINEL))?;
        Ok(output)
    }

    fn band(
        dataset: &Dataset,
        index: &VegetationIndexConfig,
        role: &str,
    ) -> FieldResult<Array2<f64>> {
        let band_index = index.bands.get(role).copied().ok_or_else(|| {
            FieldError::Configuration(format!(
                "vegetation index '{}' is missing the '{}' mapping",
                index.name, role
            ))
        })?;
        let band = read_band_f64(dataset, band_index)?;
        // Input nodata must not leak into the ratio as a plausible value.
        let nodata = dataset.rasterband(band_index)?.no_data_value();
        if let Some(nodata) = nodata {
            let mut band = band;
            band.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
            return Ok(band);
        }
        Ok(band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::collections::BTreeMap;

    #[test]
    fn test_ndvi_formula() {
        let nir = array![[0.8, 0.6], [0.4, 0.5]];
        let red = array![[0.2, 0.2], [0.1, 0.5]];
        let ndvi = normalized_difference(&nir, &red).unwrap();
        assert_relative_eq!(ndvi[[0, 0]], 0.6, epsilon = 1e-12);
        assert_relative_eq!(ndvi[[0, 1]], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ndvi[[1, 0]], 0.6, epsilon = 1e-12);
        assert_relative_eq!(ndvi[[1, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_denominator_becomes_sentinel() {
        let nir = array![[0.0, 0.5]];
        let red = array![[0.0, -0.5]];
        let ndvi = normalized_difference(&nir, &red).unwrap();
        assert_eq!(ndvi[[0, 0]], NODATA_SENTINEL);
        assert_eq!(ndvi[[0, 1]], NODATA_SENTINEL);
        assert!(ndvi.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_nan_input_becomes_sentinel() {
        let nir = array![[f64::NAN]];
        let red = array![[0.2]];
        let ndvi = normalized_difference(&nir, &red).unwrap();
        assert_eq!(ndvi[[0, 0]], NODATA_SENTINEL);
    }

    #[test]
    fn test_savi_formula() {
        let nir = array![[0.8]];
        let red = array![[0.2]];
        let savi = soil_adjusted(&nir, &red).unwrap();
        assert_relative_eq!(savi[[0, 0]], (0.6 / 1.5) * 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let a = Array2::<f64>::zeros((2, 2));
        let b = Array2::<f64>::zeros((2, 3));
        assert!(normalized_difference(&a, &b).is_err());
    }

    #[test]
    fn test_unknown_process_is_configuration_error() {
        let transform = GeoTransform {
            top_left_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            top_left_y: 1.0,
            rotation_y: 0.0,
            pixel_height: -1.0,
        };
        let dataset = new_mem_raster_f64(1, 1, 1, &transform, "").unwrap();
        let index = VegetationIndexConfig {
            name: "EVI".to_string(),
            process: "evi".to_string(),
            bands: BTreeMap::new(),
            description: None,
        };
        let result = VegetationIndexCalculator::compute(&dataset, &index);
        assert!(matches!(result, Err(FieldError::Configuration(_))));
    }
}
