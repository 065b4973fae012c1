//! Reusable geometry templates.
//!
//! A template is a boundary stored once in the shared library and referenced
//! by `GeometryInstance` geometries through its position in `templates`,
//! anchored at one placement vertex of the referencing model. Template
//! boundaries index into the library's own vertex pool, not the model's.

use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryTemplates {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<Geometry>,
    #[serde(
        rename = "vertices-templates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub vertices_templates: Vec<[f64; 3]>,
}

impl GeometryTemplates {
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
