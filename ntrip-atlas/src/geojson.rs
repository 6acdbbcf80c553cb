//! GeoJSON export of service coverage.
//!
//! Each service becomes a `Feature` whose geometry is its coverage box and
//! whose properties are the service record plus its provider name. Enable
//! the `geojson` feature to use this module.
//!
//! # Example
//!
//! ```ignore
//! use ntrip_atlas::geojson::catalog_coverage;
//!
//! let collection = catalog_coverage(engine.catalog())?;
//! std::fs::write("coverage.geojson", collection.to_string())?;
//! ```

use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};

use crate::catalog::{Catalog, ServiceRecord};
use crate::error::{AtlasError, Result};
use crate::geo::BoundingBox;

/// Closed ring `[lon, lat]` around a box that does not wrap.
fn ring(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Vec<Vec<Vec<f64>>> {
    vec![vec![
        vec![lon_min, lat_min],
        vec![lon_max, lat_min],
        vec![lon_max, lat_max],
        vec![lon_min, lat_max],
        vec![lon_min, lat_min],
    ]]
}

/// Geometry of a coverage box.
///
/// A box crossing the antimeridian is split into a `MultiPolygon` with one
/// part on each side of ±180°.
pub fn box_geometry(bbox: &BoundingBox) -> Geometry {
    let (lat_min, lat_max, lon_min, lon_max) = bbox.degrees();
    let value = if bbox.crosses_antimeridian() {
        Value::MultiPolygon(vec![
            ring(lat_min, lat_max, lon_min, 180.0),
            ring(lat_min, lat_max, -180.0, lon_max),
        ])
    } else {
        Value::Polygon(ring(lat_min, lat_max, lon_min, lon_max))
    };
    Geometry::new(value)
}

/// One service as a GeoJSON feature, identified by its name.
///
/// # Errors
///
/// Returns [`AtlasError::InvalidParameter`] if the service cannot be
/// serialized into feature properties.
pub fn service_feature(catalog: &Catalog, service: &ServiceRecord) -> Result<Feature> {
    let mut properties = match serde_json::to_value(service) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => JsonObject::new(),
        Err(e) => return Err(AtlasError::InvalidParameter(e.to_string())),
    };
    properties.remove("coverage");
    properties.insert(
        "provider".to_string(),
        catalog.provider_name(service).into(),
    );

    Ok(Feature {
        bbox: None,
        geometry: Some(box_geometry(&service.coverage)),
        id: Some(Id::String(service.name.clone())),
        properties: Some(properties),
        foreign_members: None,
    })
}

/// Coverage of selected services as a `FeatureCollection`.
pub fn coverage_features<'a, I>(catalog: &Catalog, services: I) -> Result<FeatureCollection>
where
    I: IntoIterator<Item = &'a ServiceRecord>,
{
    let features = services
        .into_iter()
        .map(|s| service_feature(catalog, s))
        .collect::<Result<Vec<_>>>()?;

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

/// Coverage of every service in the catalog.
pub fn catalog_coverage(catalog: &Catalog) -> Result<FeatureCollection> {
    coverage_features(catalog, catalog.services())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;

    #[test]
    fn test_polygon_ring() {
        let bbox = BoundingBox::from_degrees(-45.0, -10.0, 110.0, 160.0).unwrap();
        let geometry = box_geometry(&bbox);
        match geometry.value {
            Value::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert_eq!(rings[0].len(), 5);
                assert_eq!(rings[0][0], vec![110.0, -45.0]);
                assert_eq!(rings[0][2], vec![160.0, -10.0]);
                assert_eq!(rings[0][0], rings[0][4]);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_antimeridian_split() {
        let bbox = BoundingBox::from_degrees(-50.0, -30.0, 165.0, -175.0).unwrap();
        match box_geometry(&bbox).value {
            Value::MultiPolygon(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0][0][1], vec![180.0, -50.0]);
                assert_eq!(parts[1][0][0], vec![-180.0, -50.0]);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_catalog_coverage() {
        let catalog = sample_catalog();
        let collection = catalog_coverage(&catalog).unwrap();
        assert_eq!(collection.features.len(), catalog.len());

        let auscors = collection
            .features
            .iter()
            .find(|f| f.id == Some(Id::String("auscors".into())))
            .unwrap();
        let props = auscors.properties.as_ref().unwrap();
        assert_eq!(props["provider"], "Geoscience Australia");
        assert_eq!(props["quality"], 5);
        assert_eq!(props["network"], "government");
        assert!(!props.contains_key("coverage"));

        let json = collection.to_string();
        assert!(json.contains("FeatureCollection"));
    }
}
