//! Contracts for the external collaborators the core does not implement
//! itself.
//!
//! Schema validation and geodetic reprojection need assets this crate does
//! not carry, a schema registry and a projection database. They are cut off
//! behind narrow traits here; the drivers below do the model plumbing around
//! an implementation supplied by the caller.

use log::info;
use serde_json::Value;

use crate::error::CjError;
use crate::model::{CityObjectType, Model};
use crate::vertices::VertexPool;

/// Validation of a serialized document against a JSON schema, including the
/// schema fragments of `+`-prefixed extension types.
pub trait SchemaValidator {
    /// Human-readable violations of the whole document, empty when it
    /// conforms.
    fn schema_errors(&self, doc: &Value) -> Result<Vec<String>, CjError>;

    /// Violations of one feature against the schema fragment of its
    /// extension type.
    fn extension_errors(&self, extension: &str, feature: &Value) -> Result<Vec<String>, CjError>;
}

/// Serialize the model to its document form and run the schema validator
/// over it, then each extension-typed feature against its extension's
/// schema fragment. Findings from the latter are prefixed with the feature
/// id.
pub fn check_schema(
    cm: &Model,
    validator: &dyn SchemaValidator,
) -> Result<Vec<String>, CjError> {
    let doc = serde_json::to_value(cm)
        .map_err(|e| CjError::InvalidDocument(format!("serializing for validation: {}", e)))?;
    let mut errors = validator.schema_errors(&doc)?;
    for (id, co) in cm.objects.iter() {
        let CityObjectType::Extension(extension) = &co.cotype else {
            continue;
        };
        let feature = serde_json::to_value(co)
            .map_err(|e| CjError::InvalidDocument(format!("serializing feature {}: {}", id, e)))?;
        for violation in validator.extension_errors(extension, &feature)? {
            errors.push(format!("{}: {}", id, violation));
        }
    }
    Ok(errors)
}

/// Coordinate conversion between two reference systems.
pub trait Reprojector {
    /// Convert one real-world coordinate to the target system.
    fn project(&self, coord: [f64; 3]) -> Result<[f64; 3], CjError>;

    /// The identifier recorded in the model's `referenceSystem` metadata
    /// after reprojection, e.g. an OGC CRS URL.
    fn target_crs(&self) -> &str;
}

/// Reproject every vertex of the model.
///
/// The model is decompressed first so the conversion runs on real-world
/// coordinates; when it carried a transform, the result is re-quantized to
/// `precision_digits` afterwards (a transform's translation is CRS-specific
/// and cannot survive the conversion). The `referenceSystem` metadata member
/// is set to the reprojector's target.
pub fn reproject_model(
    cm: &mut Model,
    reprojector: &dyn Reprojector,
    precision_digits: u8,
) -> Result<(), CjError> {
    let was_compressed = cm.decompress();
    // The pool is real-valued after decompression.
    if let VertexPool::Real(vertices) = &mut cm.vertices {
        for vertex in vertices.iter_mut() {
            *vertex = reprojector.project(*vertex)?;
        }
    }
    if was_compressed {
        cm.compress(precision_digits)?;
    }
    match &mut cm.metadata {
        Some(Value::Object(meta)) => {
            meta.insert(
                "referenceSystem".to_string(),
                Value::String(reprojector.target_crs().to_string()),
            );
        }
        _ => {
            cm.metadata = Some(serde_json::json!({
                "referenceSystem": reprojector.target_crs()
            }));
        }
    }
    cm.update_extent();
    info!(
        "reprojected {} vertices to {}",
        cm.vertices.len(),
        reprojector.target_crs()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::model_from_json;

    /// A fixed planar shift, enough to exercise the driver.
    struct Shift([f64; 3]);

    impl Reprojector for Shift {
        fn project(&self, coord: [f64; 3]) -> Result<[f64; 3], CjError> {
            Ok([
                coord[0] + self.0[0],
                coord[1] + self.0[1],
                coord[2] + self.0[2],
            ])
        }
        fn target_crs(&self) -> &str {
            "https://www.opengis.net/def/crs/EPSG/0/28992"
        }
    }

    struct AlwaysFails;

    impl Reprojector for AlwaysFails {
        fn project(&self, _coord: [f64; 3]) -> Result<[f64; 3], CjError> {
            Err(CjError::Reprojection("point outside the grid".to_string()))
        }
        fn target_crs(&self) -> &str {
            "https://www.opengis.net/def/crs/EPSG/0/4979"
        }
    }

    fn sample() -> Model {
        model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "metadata": {"referenceSystem": "https://www.opengis.net/def/crs/EPSG/0/7415"},
            "CityObjects": {
                "a": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2]]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]]
        }"#,
        )
    }

    #[test]
    fn test_reproject_shifts_and_restamps_crs() {
        let mut cm = sample();
        reproject_model(&mut cm, &Shift([100.0, 200.0, 0.0]), 3).unwrap();
        assert_eq!(cm.vertices.real_coords(0), Some([100.0, 200.0, 0.0]));
        // The pool was not compressed before, so it stays real-valued.
        assert!(cm.vertices.transform().is_none());
        let meta = cm.metadata.as_ref().unwrap();
        assert_eq!(
            meta["referenceSystem"],
            "https://www.opengis.net/def/crs/EPSG/0/28992"
        );
        assert!(meta.get("geographicalExtent").is_some());
    }

    #[test]
    fn test_reproject_requantizes_compressed_input() {
        let mut cm = sample();
        cm.compress(3).unwrap();
        reproject_model(&mut cm, &Shift([10.0, 0.0, 0.0]), 3).unwrap();
        assert!(cm.vertices.transform().is_some());
        let v = cm.vertices.real_coords(0).unwrap();
        assert!((v[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_reproject_propagates_failure() {
        let mut cm = sample();
        assert!(matches!(
            reproject_model(&mut cm, &AlwaysFails, 3),
            Err(CjError::Reprojection(_))
        ));
    }

    struct RequireVersion;

    impl SchemaValidator for RequireVersion {
        fn schema_errors(&self, doc: &Value) -> Result<Vec<String>, CjError> {
            let mut errors = Vec::new();
            if doc.get("version").and_then(Value::as_str) != Some("1.1") {
                errors.push("version must be 1.1".to_string());
            }
            if doc.get("type").and_then(Value::as_str) != Some("CityJSON") {
                errors.push("type must be CityJSON".to_string());
            }
            Ok(errors)
        }

        fn extension_errors(
            &self,
            extension: &str,
            feature: &Value,
        ) -> Result<Vec<String>, CjError> {
            let mut errors = Vec::new();
            if feature.get("attributes").is_none() {
                errors.push(format!("{} features must carry attributes", extension));
            }
            Ok(errors)
        }
    }

    #[test]
    fn test_check_schema_runs_on_document_form() {
        let cm = sample();
        assert!(check_schema(&cm, &RequireVersion).unwrap().is_empty());
        let mut old = sample();
        old.version = "1.0".to_string();
        assert_eq!(
            check_schema(&old, &RequireVersion).unwrap(),
            vec!["version must be 1.1".to_string()]
        );
    }

    #[test]
    fn test_check_schema_visits_extension_features() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "n1": {"type": "+Noise"}
            },
            "vertices": []
        }"#,
        );
        let errors = check_schema(&cm, &RequireVersion).unwrap();
        assert_eq!(errors, vec!["n1: +Noise features must carry attributes".to_string()]);
    }
}
