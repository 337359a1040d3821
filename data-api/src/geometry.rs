//! Geometry codec.
//!
//! Geometry values cross three encodings: (E)WKB coming out of the
//! database (binary on the wire, hex in text dumps), WKT for literals
//! bound into `ST_GeomFromText`, and GeoJSON in requests and responses.
//! This module is the only place bridging them; everything in between
//! works on [`geo_types::Geometry`].
//!
//! Geometry literals in requests carry no CRS of their own and are
//! interpreted as [`LITERAL_SRID`](crate::registry::LITERAL_SRID) by
//! the compiler.

use geo_types::Geometry;
use geozero::wkb::Ewkb;
use geozero::{ToGeo, ToWkt};
use serde_json::Value;

use crate::error::DataResult;

/// Decode a geometry from raw (E)WKB bytes.
pub fn from_ewkb(bytes: &[u8]) -> DataResult<Geometry<f64>> {
    Ok(Ewkb(bytes.to_vec()).to_geo()?)
}

/// Decode a geometry from the hex transport form of (E)WKB.
pub fn from_ewkb_hex(hex_wkb: &str) -> DataResult<Geometry<f64>> {
    let bytes = hex::decode(hex_wkb)?;
    from_ewkb(&bytes)
}

/// Whether a JSON value looks like a GeoJSON geometry object.
///
/// Mirrors the request decoder rule: any object carrying both `type`
/// and `coordinates` members is treated as a geometry literal.
#[must_use]
pub fn is_geojson_object(value: &Value) -> bool {
    value.is_object() && value.get("type").is_some() && value.get("coordinates").is_some()
}

/// Decode a GeoJSON geometry object.
pub fn from_geojson(value: &Value) -> DataResult<Geometry<f64>> {
    let geometry: geojson::Geometry = serde_json::from_value(value.clone())?;
    Ok(Geometry::<f64>::try_from(geometry)?)
}

/// Render a geometry as WKT for embedding as a bound
/// `ST_GeomFromText` parameter.
pub fn to_wkt(geometry: &Geometry<f64>) -> DataResult<String> {
    Ok(geometry.to_wkt()?)
}

/// Render a geometry as its GeoJSON mapping for responses.
#[must_use]
pub fn to_geojson(geometry: &Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    // WKB for POINT(1 2), little endian.
    const POINT_WKB_HEX: &str = "0101000000000000000000F03F0000000000000040";
    // EWKB for SRID=4326;POINT(1 2).
    const POINT_EWKB_HEX: &str = "0101000020E6100000000000000000F03F0000000000000040";

    fn as_point(geometry: &Geometry<f64>) -> (f64, f64) {
        match geometry {
            Geometry::Point(p) => (p.x(), p.y()),
            other => panic!("expected a point, got {other:?}"),
        }
    }

    #[test]
    fn hex_wkb_decodes() {
        let geometry = from_ewkb_hex(POINT_WKB_HEX).unwrap();
        let (x, y) = as_point(&geometry);
        assert_relative_eq!(x, 1.0);
        assert_relative_eq!(y, 2.0);
    }

    #[test]
    fn hex_ewkb_with_srid_decodes() {
        let geometry = from_ewkb_hex(POINT_EWKB_HEX).unwrap();
        let (x, y) = as_point(&geometry);
        assert_relative_eq!(x, 1.0);
        assert_relative_eq!(y, 2.0);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(from_ewkb_hex("zz01").is_err());
        assert!(from_ewkb_hex("01").is_err());
    }

    #[test]
    fn geojson_object_detection() {
        assert!(is_geojson_object(&json!({
            "type": "Point",
            "coordinates": [1.0, 2.0]
        })));
        assert!(!is_geojson_object(&json!({"name": "geom"})));
        assert!(!is_geojson_object(&json!("POINT(1 2)")));
        assert!(!is_geojson_object(&json!({"type": "Point"})));
    }

    #[test]
    fn geojson_round_trips_through_wkt_and_back() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 0.0]]]
        });
        let geometry = from_geojson(&polygon).unwrap();
        let wkt = to_wkt(&geometry).unwrap();
        assert!(wkt.starts_with("POLYGON"), "unexpected WKT: {wkt}");

        let encoded = to_geojson(&geometry);
        let reparsed = from_geojson(&serde_json::to_value(&encoded).unwrap()).unwrap();
        assert_eq!(geometry, reparsed);
    }

    #[test]
    fn geojson_without_coordinates_fails() {
        assert!(from_geojson(&json!({"type": "Point"})).is_err());
        assert!(from_geojson(&json!({"type": "Nope", "coordinates": []})).is_err());
    }

    #[test]
    fn wkb_and_geojson_agree() {
        let from_wkb = from_ewkb_hex(POINT_WKB_HEX).unwrap();
        let from_json = from_geojson(&json!({
            "type": "Point",
            "coordinates": [1.0, 2.0]
        }))
        .unwrap();
        assert_eq!(from_wkb, from_json);
    }
}
