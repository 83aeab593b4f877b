use fieldstats::io::codec::{decode_base64_raster, encode_raster_base64};
use fieldstats::io::raster::{new_mem_raster_f64, read_band_f64, write_band_f64};
use fieldstats::types::GeoTransform;
use gdal::spatial_ref::SpatialRef;
use ndarray::Array2;

fn sample_transform() -> GeoTransform {
    GeoTransform {
        top_left_x: 10.626763017,
        pixel_width: 2.802632411067409e-6,
        rotation_x: 0.0,
        top_left_y: 49.208020635,
        rotation_y: 0.0,
        pixel_height: -1.7604186046400793e-6,
    }
}

#[test]
fn test_encode_decode_roundtrip_is_lossless() {
    let projection = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
    let mut dataset = new_mem_raster_f64(4, 3, 2, &sample_transform(), &projection).unwrap();
    let band1 = Array2::from_shape_fn((3, 4), |(row, col)| (row * 4 + col) as f64 * 0.125);
    let band2 = Array2::from_shape_fn((3, 4), |(row, col)| (row as f64) - (col as f64) * 7.5);
    write_band_f64(&mut dataset, 1, &band1, Some(-999.0)).unwrap();
    write_band_f64(&mut dataset, 2, &band2, None).unwrap();

    let encoded = encode_raster_base64(&dataset).unwrap();
    assert!(!encoded.is_empty());

    let decoded = decode_base64_raster(&encoded).unwrap();

    // Band count and pixel values survive exactly.
    assert_eq!(decoded.raster_count(), 2);
    assert_eq!(decoded.raster_size(), (4, 3));
    assert_eq!(read_band_f64(&decoded, 1).unwrap(), band1);
    assert_eq!(read_band_f64(&decoded, 2).unwrap(), band2);

    // Geotransform survives exactly.
    let gt = decoded.geo_transform().unwrap();
    assert_eq!(gt, sample_transform().to_gdal());

    // Projection survives (the WKT text may be re-serialized).
    let decoded_projection = decoded.projection();
    assert!(!decoded_projection.is_empty());
    let decoded_sr = SpatialRef::from_wkt(&decoded_projection).unwrap();
    assert_eq!(decoded_sr.auth_code().unwrap(), 4326);

    // Nodata on band 1 survives.
    assert_eq!(decoded.rasterband(1).unwrap().no_data_value(), Some(-999.0));
}

#[test]
fn test_two_rasters_encode_independently() {
    let projection = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
    let mut first = new_mem_raster_f64(2, 2, 1, &sample_transform(), &projection).unwrap();
    let mut second = new_mem_raster_f64(2, 2, 1, &sample_transform(), &projection).unwrap();
    write_band_f64(&mut first, 1, &Array2::from_elem((2, 2), 1.0), None).unwrap();
    write_band_f64(&mut second, 1, &Array2::from_elem((2, 2), 2.0), None).unwrap();

    let encoded_first = encode_raster_base64(&first).unwrap();
    let encoded_second = encode_raster_base64(&second).unwrap();

    let decoded_first = decode_base64_raster(&encoded_first).unwrap();
    let decoded_second = decode_base64_raster(&encoded_second).unwrap();
    assert_eq!(
        read_band_f64(&decoded_first, 1).unwrap(),
        Array2::from_elem((2, 2), 1.0)
    );
    assert_eq!(
        read_band_f64(&decoded_second, 1).unwrap(),
        Array2::from_elem((2, 2), 2.0)
    );
}
