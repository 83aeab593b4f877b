//! Raster-to-zone alignment: reprojection into the zone CRS followed by a
//! window-based clip to the buffered zone extent.

use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::Dataset;

use crate::io::raster::new_mem_raster_f64;
use crate::types::{
    BoundingBox, FieldError, FieldResult, GeoTransform, VectorZone, NODATA_SENTINEL,
};

/// Alignment parameters
#[derive(Debug, Clone)]
pub struct AlignmentParams {
    /// Metric buffer applied around the combined zone extent
    pub buffer_meters: f64,
    /// CRS of the zone layer; rasters are reprojected into it when they differ
    pub zone_epsg: u32,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        AlignmentParams {
            buffer_meters: 2.0,
            zone_epsg: 4326,
        }
    }
}

/// Clips (and reprojects when required) a raster to a vector zone layer
pub struct RasterAligner {
    params: AlignmentParams,
}

impl RasterAligner {
    pub fn new(params: AlignmentParams) -> Self {
        RasterAligner { params }
    }

    /// Aligner with standard parameters (2 m buffer, EPSG:4326 zones)
    pub fn standard() -> Self {
        Self::new(AlignmentParams::default())
    }

    /// Align a raster to the zone layer.
    ///
    /// Reprojection happens before the extent comparison: extents are only
    /// comparable once raster and zones share a CRS. The input handle is
    /// consumed; callers keep working with the returned clipped raster.
    pub fn align(&self, raster: Dataset, zones: &[VectorZone]) -> FieldResult<Dataset> {
        if zones.is_empty() {
            return Err(FieldError::NotFound(
                "no zones supplied for raster alignment".to_string(),
            ));
        }
        let mut extent = zones[0].bounds()?;
        for zone in &zones[1..] {
            extent = extent.union(&zone.bounds()?);
        }
        let bbox = extent.buffered(self.params.buffer_meters);

        let raster = self.reproject_if_needed(raster)?;
        let clipped = self.clip_to_extent(&raster, &bbox)?;
        drop(raster);
        Ok(clipped)
    }

    fn zone_spatial_ref(&self) -> FieldResult<SpatialRef> {
        let mut sr = SpatialRef::from_epsg(self.params.zone_epsg)?;
        // Traditional GIS axis order (lon, lat), matching the GeoJSON zones.
        sr.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        Ok(sr)
    }

    fn reproject_if_needed(&self, raster: Dataset) -> FieldResult<Dataset> {
        let projection = raster.projection();
        if projection.is_empty() {
            return Err(FieldError::CrsMismatch(
                "raster has no projection; cannot reconcile with the zone layer".to_string(),
            ));
        }
        let zone_sr = self.zone_spatial_ref()?;
        let mut raster_sr = SpatialRef::from_wkt(&projection)?;
        raster_sr.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

        let same_crs = match raster_sr.auth_code() {
            Ok(code) => code == self.params.zone_epsg as i32,
            Err(_) => projection == zone_sr.to_wkt()?,
        };
        if same_crs {
            return Ok(raster);
        }

        log::info!(
            "Reprojecting raster to match zone CRS (EPSG:{})",
            self.params.zone_epsg
        );
        let warped = self.warp_to_zone_crs(&raster, &raster_sr, &zone_sr)?;
        drop(raster);
        Ok(warped)
    }

    fn warp_to_zone_crs(
        &self,
        source: &Dataset,
        source_sr: &SpatialRef,
        zone_sr: &SpatialRef,
    ) -> FieldResult<Dataset> {
        let gt = GeoTransform::from_gdal(&source.geo_transform()?);
        let (width, height) = source.raster_size();
        let bands = source.raster_count();

        // Transform the four corners to find the target extent.
        let corners = [
            (0.0, 0.0),
            (width as f64, 0.0),
            (0.0, height as f64),
            (width as f64, height as f64),
        ];
        let mut xs = [0.0f64; 4];
        let mut ys = [0.0f64; 4];
        let mut zs = [0.0f64; 4];
        for (i, (col, row)) in corners.iter().enumerate() {
            xs[i] = gt.top_left_x + col * gt.pixel_width + row * gt.rotation_x;
            ys[i] = gt.top_left_y + col * gt.rotation_y + row * gt.pixel_height;
        }
        let transform = CoordTransform::new(source_sr, zone_sr).map_err(|e| {
            FieldError::CrsMismatch(format!(
                "cannot build transform into EPSG:{}: {}",
                self.params.zone_epsg, e
            ))
        })?;
        transform
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(|e| {
                FieldError::CrsMismatch(format!("corner transformation failed: {}", e))
            })?;

        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let target_gt = GeoTransform {
            top_left_x: min_x,
            pixel_width: (max_x - min_x) / width as f64,
            rotation_x: 0.0,
            top_left_y: max_y,
            rotation_y: 0.0,
            pixel_height: -((max_y - min_y) / height as f64),
        };

        let target = new_mem_raster_f64(width, height, bands, &target_gt, &zone_sr.to_wkt()?)?;
        for band in 1..=bands {
            let nodata = source
                .rasterband(band)?
                .no_data_value()
                .unwrap_or(NODATA_SENTINEL);
            let mut target_band = target.rasterband(band)?;
            // Pre-fill so pixels with no source contribution stay nodata.
            target_band.fill(nodata, None)?;
            target_band.set_no_data_value(Some(nodata))?;
        }
        gdal::raster::reproject(source, &target)?;
        Ok(target)
    }

    /// Window-read the sub-raster covering the buffered extent, padding with
    /// nodata where the extent reaches past the raster.
    fn clip_to_extent(&self, raster: &Dataset, bbox: &BoundingBox) -> FieldResult<Dataset> {
        let gt = GeoTransform::from_gdal(&raster.geo_transform()?);
        if gt.rotation_x != 0.0 || gt.rotation_y != 0.0 {
            return Err(FieldError::Processing(
                "rotated rasters are not supported for clipping".to_string(),
            ));
        }
        if gt.pixel_width <= 0.0 || gt.pixel_height >= 0.0 {
            return Err(FieldError::Processing(format!(
                "unexpected pixel size ({}, {}); expected north-up raster",
                gt.pixel_width, gt.pixel_height
            )));
        }
        let (width, height) = raster.raster_size();
        let bands = raster.raster_count();

        // Snap the output origin onto the source pixel grid.
        let col_offset = ((bbox.min_lon - gt.top_left_x) / gt.pixel_width).floor() as i64;
        let row_offset = ((bbox.max_lat - gt.top_left_y) / gt.pixel_height).floor() as i64;
        let out_origin_x = gt.top_left_x + col_offset as f64 * gt.pixel_width;
        let out_origin_y = gt.top_left_y + row_offset as f64 * gt.pixel_height;
        let out_width = (((bbox.max_lon - out_origin_x) / gt.pixel_width).ceil() as i64).max(1);
        let out_height =
            (((out_origin_y - bbox.min_lat) / -gt.pixel_height).ceil() as i64).max(1);

        // Intersection with the source grid.
        let src_col0 = col_offset.max(0);
        let src_row0 = row_offset.max(0);
        let src_col1 = (col_offset + out_width).min(width as i64);
        let src_row1 = (row_offset + out_height).min(height as i64);
        let overlaps = src_col1 > src_col0 && src_row1 > src_row0;
        if !overlaps {
            log::warn!(
                "Buffered zone extent does not overlap the raster; clipped output contains no valid pixels"
            );
        }

        let out_gt = GeoTransform {
            top_left_x: out_origin_x,
            pixel_width: gt.pixel_width,
            rotation_x: 0.0,
            top_left_y: out_origin_y,
            rotation_y: 0.0,
            pixel_height: gt.pixel_height,
        };
        let clipped = new_mem_raster_f64(
            out_width as usize,
            out_height as usize,
            bands,
            &out_gt,
            &raster.projection(),
        )?;

        for band in 1..=bands {
            let source_band = raster.rasterband(band)?;
            let nodata = source_band.no_data_value().unwrap_or(NODATA_SENTINEL);
            let mut clipped_band = clipped.rasterband(band)?;
            clipped_band.fill(nodata, None)?;
            clipped_band.set_no_data_value(Some(nodata))?;

            if overlaps {
                let window_width = (src_col1 - src_col0) as usize;
                let window_height = (src_row1 - src_row0) as usize;
                let buffer = source_band.read_as::<f64>(
                    (src_col0 as isize, src_row0 as isize),
                    (window_width, window_height),
                    (window_width, window_height),
                    None,
                )?;
                clipped_band.write(
                    ((src_col0 - col_offset) as isize, (src_row0 - row_offset) as isize),
                    (window_width, window_height),
                    &buffer,
                )?;
            }
        }

        log::info!(
            "Clipped raster to {}x{} pixels ({} bands)",
            out_width,
            out_height,
            bands
        );
        Ok(clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::{read_band_f64, write_band_f64};
    use ndarray::Array2;
    use serde_json::json;

    fn zone(iot_id: i64, min: f64, max: f64) -> VectorZone {
        VectorZone {
            iot_id,
            name: None,
            trial_id: None,
            plot_id: Some(format!("P{}", iot_id)),
            treatment_id: None,
            year: None,
            geometry: json!({
                "type": "Polygon",
                "coordinates": [[[min, min], [max, min], [max, max], [min, max], [min, min]]]
            }),
        }
    }

    fn test_raster() -> Dataset {
        let transform = GeoTransform {
            top_left_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            top_left_y: 10.0,
            rotation_y: 0.0,
            pixel_height: -1.0,
        };
        let projection = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
        let mut dataset = new_mem_raster_f64(10, 10, 1, &transform, &projection).unwrap();
        let data = Array2::from_shape_fn((10, 10), |(row, col)| (row * 10 + col) as f64);
        write_band_f64(&mut dataset, 1, &data, None).unwrap();
        dataset
    }

    #[test]
    fn test_align_requires_zones() {
        let aligner = RasterAligner::standard();
        let result = aligner.align(test_raster(), &[]);
        assert!(matches!(result, Err(FieldError::NotFound(_))));
    }

    #[test]
    fn test_clip_window_snaps_to_pixel_grid() {
        let aligner = RasterAligner::standard();
        let clipped = aligner.align(test_raster(), &[zone(1, 2.0, 5.0)]).unwrap();

        // The 2 m buffer is well under one pixel, so the window covers
        // columns 1..6 and rows 4..9 of the source grid.
        let (width, height) = clipped.raster_size();
        assert_eq!((width, height), (5, 5));
        let gt = clipped.geo_transform().unwrap();
        assert_eq!(gt[0], 1.0);
        assert_eq!(gt[3], 6.0);

        let data = read_band_f64(&clipped, 1).unwrap();
        assert_eq!(data[[0, 0]], 41.0);
        assert_eq!(data[[4, 4]], 85.0);
    }

    #[test]
    fn test_disjoint_zone_yields_all_nodata() {
        let aligner = RasterAligner::standard();
        let clipped = aligner.align(test_raster(), &[zone(1, 20.0, 23.0)]).unwrap();
        let data = read_band_f64(&clipped, 1).unwrap();
        assert!(data.iter().all(|&v| v == NODATA_SENTINEL));
        let nodata = clipped.rasterband(1).unwrap().no_data_value();
        assert_eq!(nodata, Some(NODATA_SENTINEL));
    }
}
