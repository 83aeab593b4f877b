//! GDAL dataset plumbing shared by the pipeline stages

use std::path::Path;

use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;

use crate::types::{FieldError, FieldResult, GeoTransform};

/// Open a raster image from disk
pub fn open_raster<P: AsRef<Path>>(path: P) -> FieldResult<Dataset> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FieldError::NotFound(format!(
            "raster image path does not exist: {}",
            path.display()
        )));
    }
    log::info!("Opening raster: {}", path.display());
    Ok(Dataset::open(path)?)
}

/// Read one band (1-based index) into a float64 array of shape (rows, cols)
pub fn read_band_f64(dataset: &Dataset, band: isize) -> FieldResult<Array2<f64>> {
    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(band)?;
    let buffer = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| FieldError::Processing(format!("failed to reshape band {}: {}", band, e)))
}

/// Create an in-memory float64 raster with the given grid and projection
pub fn new_mem_raster_f64(
    width: usize,
    height: usize,
    bands: isize,
    transform: &GeoTransform,
    projection: &str,
) -> FieldResult<Dataset> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset =
        driver.create_with_band_type::<f64, _>("", width as isize, height as isize, bands)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_projection(projection)?;
    Ok(dataset)
}

/// Create an in-memory byte raster, used for per-zone rasterized masks
pub fn new_mem_mask(
    width: usize,
    height: usize,
    transform: &GeoTransform,
    projection: &str,
) -> FieldResult<Dataset> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset =
        driver.create_with_band_type::<u8, _>("", width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_projection(projection)?;
    Ok(dataset)
}

/// Write a float64 array into one band (1-based index) of a dataset
pub fn write_band_f64(
    dataset: &mut Dataset,
    band: isize,
    data: &Array2<f64>,
    nodata: Option<f64>,
) -> FieldResult<()> {
    let (rows, cols) = data.dim();
    let mut rasterband = dataset.rasterband(band)?;
    let buffer = Buffer::new((cols, rows), data.iter().copied().collect());
    rasterband.write((0, 0), (cols, rows), &buffer)?;
    if nodata.is_some() {
        rasterband.set_no_data_value(nodata)?;
    }
    Ok(())
}

/// Persist a dataset to a GeoTIFF file, for inspection or archival
pub fn write_geotiff<P: AsRef<Path>>(dataset: &Dataset, path: P) -> FieldResult<()> {
    let path = path.as_ref();
    log::info!("Writing raster to: {}", path.display());
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let copy = dataset.create_copy(&driver, path, &[])?;
    drop(copy);
    Ok(())
}
