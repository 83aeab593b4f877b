//! Raster transport codec.
//!
//! Rasters crossing the process boundary to the execution service travel as
//! LZW-compressed GeoTIFF bytes, base64-text-encoded. The round-trip is
//! lossless for pixel values, geotransform, and projection. Byte staging
//! goes through GDAL's `/vsimem` virtual filesystem.

use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gdal::raster::RasterCreationOption;
use gdal::{Dataset, DriverManager};

use crate::types::{FieldError, FieldResult};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn vsi_path(tag: &str) -> String {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("/vsimem/fieldstats_{}_{}.tif", tag, id)
}

fn c_path(path: &str) -> FieldResult<CString> {
    CString::new(path).map_err(|e| FieldError::Encoding(format!("invalid VSI path: {}", e)))
}

fn vsi_read_all(path: &str) -> FieldResult<Vec<u8>> {
    let c_path = c_path(path)?;
    unsafe {
        let mut length: gdal_sys::vsi_l_offset = 0;
        // Borrow the buffer; the copy below happens before the unlink.
        let data = gdal_sys::VSIGetMemFileBuffer(c_path.as_ptr(), &mut length, 0);
        if data.is_null() {
            return Err(FieldError::Encoding(format!(
                "no in-memory file at {}",
                path
            )));
        }
        Ok(std::slice::from_raw_parts(data, length as usize).to_vec())
    }
}

fn vsi_unlink(path: &str) -> FieldResult<()> {
    let c_path = c_path(path)?;
    unsafe {
        gdal_sys::VSIUnlink(c_path.as_ptr());
    }
    Ok(())
}

/// Encode a raster dataset as base64 text over a compressed GeoTIFF
pub fn encode_raster_base64(dataset: &Dataset) -> FieldResult<String> {
    let path = vsi_path("enc");
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = [RasterCreationOption {
        key: "COMPRESS",
        value: "LZW",
    }];
    let copy = dataset.create_copy(&driver, &path, &options)?;
    // Close the copy so the GeoTIFF is flushed into /vsimem before reading.
    drop(copy);

    let bytes = vsi_read_all(&path)?;
    vsi_unlink(&path)?;
    let encoded = STANDARD.encode(&bytes);
    log::debug!(
        "Encoded raster: {} GeoTIFF bytes, {} base64 chars",
        bytes.len(),
        encoded.len()
    );
    Ok(encoded)
}

/// Decode base64 text back into an in-memory raster dataset
pub fn decode_base64_raster(encoded: &str) -> FieldResult<Dataset> {
    let bytes = STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| FieldError::Encoding(format!("malformed base64 raster payload: {}", e)))?;

    let path = vsi_path("dec");
    let c_path = c_path(&path)?;
    unsafe {
        // Ownership stays with `bytes`; the dataset is copied out below
        // while the buffer is still alive.
        gdal_sys::VSIFileFromMemBuffer(
            c_path.as_ptr(),
            bytes.as_ptr() as *mut std::os::raw::c_uchar,
            bytes.len() as u64,
            0,
        );
    }

    let open_result = Dataset::open(&path);
    let dataset = match open_result {
        Ok(source) => {
            let driver = DriverManager::get_driver_by_name("MEM")?;
            let copied = source.create_copy(&driver, "", &[])?;
            drop(source);
            Ok(copied)
        }
        Err(e) => Err(FieldError::Encoding(format!(
            "decoded payload is not a readable raster: {}",
            e
        ))),
    };
    vsi_unlink(&path)?;
    drop(bytes);
    dataset
}
