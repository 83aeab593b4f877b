use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Geospatial bounding box in the zone layer CRS (geographic coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box covering both operands
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Expand the box by a metric buffer, converted to degrees.
    ///
    /// One degree of latitude is ~111.32 km; the longitude scale shrinks
    /// with the cosine of the mean latitude of the box.
    pub fn buffered(&self, buffer_meters: f64) -> BoundingBox {
        let mean_lat = (self.min_lat + self.max_lat) / 2.0;
        let buffer_lat = buffer_meters / 111_320.0;
        let buffer_lon = buffer_meters / (111_320.0 * mean_lat.to_radians().cos());
        BoundingBox {
            min_lon: self.min_lon - buffer_lon,
            max_lon: self.max_lon + buffer_lon,
            min_lat: self.min_lat - buffer_lat,
            max_lat: self.max_lat + buffer_lat,
        }
    }
}

/// Affine geotransform parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        GeoTransform {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// One polygon zone (trial plot) fetched from the metadata store.
///
/// The geometry is carried as a GeoJSON object in the zone layer CRS and is
/// only converted to an OGR geometry at rasterization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorZone {
    pub iot_id: i64,
    pub name: Option<String>,
    pub trial_id: Option<String>,
    pub plot_id: Option<String>,
    pub treatment_id: Option<String>,
    pub year: Option<i32>,
    pub geometry: JsonValue,
}

impl VectorZone {
    /// Identity fields required to rejoin statistics downstream
    pub fn has_identity(&self) -> bool {
        self.iot_id > 0 && self.plot_id.is_some()
    }

    /// Axis-aligned bounds of the zone geometry
    pub fn bounds(&self) -> FieldResult<BoundingBox> {
        let mut bounds: Option<BoundingBox> = None;
        for_each_position(&self.geometry, &mut |lon, lat| {
            let point = BoundingBox {
                min_lon: lon,
                max_lon: lon,
                min_lat: lat,
                max_lat: lat,
            };
            bounds = Some(match bounds {
                Some(b) => b.union(&point),
                None => point,
            });
        })?;
        bounds.ok_or_else(|| {
            FieldError::Processing(format!("zone {} has an empty geometry", self.iot_id))
        })
    }

    /// WKT rendering of the GeoJSON geometry, for OGR consumption
    pub fn wkt(&self) -> FieldResult<String> {
        geometry_wkt(&self.geometry)
    }
}

/// Convert a GeoJSON Polygon or MultiPolygon into WKT
pub fn geometry_wkt(geometry: &JsonValue) -> FieldResult<String> {
    let kind = geometry
        .get("type")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| FieldError::Processing("geometry has no coordinates".to_string()))?;
    match kind {
        "Polygon" => Ok(format!("POLYGON ({})", polygon_wkt(coordinates)?)),
        "MultiPolygon" => {
            let polygons = coordinates.as_array().ok_or_else(malformed_coordinates)?;
            let parts = polygons
                .iter()
                .map(|rings| Ok(format!("({})", polygon_wkt(rings)?)))
                .collect::<FieldResult<Vec<_>>>()?;
            Ok(format!("MULTIPOLYGON ({})", parts.join(", ")))
        }
        other => Err(FieldError::Processing(format!(
            "geometry needs to be either Polygon or MultiPolygon, got '{}'",
            other
        ))),
    }
}

fn polygon_wkt(rings: &JsonValue) -> FieldResult<String> {
    let rings = rings.as_array().ok_or_else(malformed_coordinates)?;
    let rendered = rings
        .iter()
        .map(|ring| {
            let positions = ring.as_array().ok_or_else(malformed_coordinates)?;
            let points = positions
                .iter()
                .map(|p| {
                    let (lon, lat) = position(p)?;
                    Ok(format!("{} {}", lon, lat))
                })
                .collect::<FieldResult<Vec<_>>>()?;
            Ok(format!("({})", points.join(", ")))
        })
        .collect::<FieldResult<Vec<_>>>()?;
    Ok(rendered.join(", "))
}

fn position(value: &JsonValue) -> FieldResult<(f64, f64)> {
    let pair = value.as_array().ok_or_else(malformed_coordinates)?;
    let lon = pair.first().and_then(JsonValue::as_f64);
    let lat = pair.get(1).and_then(JsonValue::as_f64);
    match (lon, lat) {
        (Some(lon), Some(lat)) => Ok((lon, lat)),
        _ => Err(malformed_coordinates()),
    }
}

fn malformed_coordinates() -> FieldError {
    FieldError::Processing("malformed GeoJSON coordinate array".to_string())
}

fn for_each_position<F>(geometry: &JsonValue, visit: &mut F) -> FieldResult<()>
where
    F: FnMut(f64, f64),
{
    fn walk<F: FnMut(f64, f64)>(node: &JsonValue, visit: &mut F) -> FieldResult<()> {
        if let Some(items) = node.as_array() {
            if items.len() >= 2 && items[0].is_number() && items[1].is_number() {
                let (lon, lat) = position(node)?;
                visit(lon, lat);
            } else {
                for item in items {
                    walk(item, visit)?;
                }
            }
        }
        Ok(())
    }
    walk(
        geometry.get("coordinates").unwrap_or(&JsonValue::Null),
        visit,
    )
}

/// Sentinel written where a pixel carries no data: division-by-zero results
/// in index math and clip padding outside the source extent
pub const NODATA_SENTINEL: f64 = -999.0;

/// Descriptive statistics for one zone's masked pixels.
///
/// All statistics are `None` (never zero) when the valid-pixel count is 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStatistic {
    pub iot_id: i64,
    pub plot_id: Option<String>,
    pub trial_id: Option<String>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub stddev: Option<f64>,
    pub median: Option<f64>,
    pub count: usize,
}

impl ZoneStatistic {
    pub fn is_defined(&self) -> bool {
        self.count > 0
    }
}

/// One metric stream (Datastream) attached to a zone, reduced to the fields
/// the matcher needs
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStream {
    pub id: i64,
    pub raster_data: Option<String>,
}

/// All metric streams known for one zone (Thing)
#[derive(Debug, Clone)]
pub struct ZoneStreams {
    pub iot_id: i64,
    pub streams: Vec<MetricStream>,
}

/// Error types for the processing pipeline
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("CRS mismatch: {0}")]
    CrsMismatch(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Transport encoding error: {0}")]
    Encoding(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for pipeline operations
pub type FieldResult<T> = Result<T, FieldError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn square(min: f64, max: f64) -> JsonValue {
        json!({
            "type": "Polygon",
            "coordinates": [[[min, min], [max, min], [max, max], [min, max], [min, min]]]
        })
    }

    #[test]
    fn test_buffered_extent() {
        let bbox = BoundingBox {
            min_lon: 10.0,
            max_lon: 11.0,
            min_lat: 49.0,
            max_lat: 50.0,
        };
        let buffered = bbox.buffered(2.0);
        let expected_lat = 2.0 / 111_320.0;
        let expected_lon = 2.0 / (111_320.0 * (49.5f64).to_radians().cos());
        assert_relative_eq!(bbox.min_lat - buffered.min_lat, expected_lat, epsilon = 1e-12);
        assert_relative_eq!(buffered.max_lat - bbox.max_lat, expected_lat, epsilon = 1e-12);
        assert_relative_eq!(bbox.min_lon - buffered.min_lon, expected_lon, epsilon = 1e-12);
        assert_relative_eq!(buffered.max_lon - bbox.max_lon, expected_lon, epsilon = 1e-12);
    }

    #[test]
    fn test_polygon_wkt() {
        let zone = VectorZone {
            iot_id: 1,
            name: None,
            trial_id: None,
            plot_id: Some("P1".to_string()),
            treatment_id: None,
            year: None,
            geometry: square(0.0, 2.0),
        };
        let wkt = zone.wkt().unwrap();
        assert_eq!(wkt, "POLYGON ((0 0, 2 0, 2 2, 0 2, 0 0))");
    }

    #[test]
    fn test_multipolygon_wkt() {
        let geometry = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
                [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 5.0]]]
            ]
        });
        let wkt = geometry_wkt(&geometry).unwrap();
        assert_eq!(
            wkt,
            "MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))"
        );
    }

    #[test]
    fn test_unsupported_geometry_kind() {
        let geometry = json!({"type": "Point", "coordinates": [1.0, 2.0]});
        assert!(geometry_wkt(&geometry).is_err());
    }

    #[test]
    fn test_zone_bounds() {
        let zone = VectorZone {
            iot_id: 3,
            name: None,
            trial_id: None,
            plot_id: Some("P3".to_string()),
            treatment_id: None,
            year: None,
            geometry: square(2.0, 7.0),
        };
        let bounds = zone.bounds().unwrap();
        assert_eq!(bounds.min_lon, 2.0);
        assert_eq!(bounds.max_lon, 7.0);
        assert_eq!(bounds.min_lat, 2.0);
        assert_eq!(bounds.max_lat, 7.0);
    }

    #[test]
    fn test_undefined_statistics_are_none() {
        let stat = ZoneStatistic {
            iot_id: 1,
            plot_id: Some("P1".to_string()),
            trial_id: None,
            mean: None,
            min: None,
            max: None,
            stddev: None,
            median: None,
            count: 0,
        };
        assert!(!stat.is_defined());
        assert!(stat.mean.is_none());
    }
}
