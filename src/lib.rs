//! Core operations on indexed 3D city models.
//!
//! A city model is a set of features whose geometries are nested index
//! sequences into one shared vertex pool, optionally quantized through a
//! scale/translate transform. This crate owns the index plumbing that makes
//! that representation workable: vertex deduplication and compaction,
//! quantization, semantic-surface lookup, subset extraction, multi-model
//! merging, face triangulation prep and structural validation.
//!
//! The persisted form is a CityJSON-shaped document; [model::Model]
//! round-trips through `serde_json`. Everything that rewrites indices is
//! deterministic: features are held in lexicographic id order, compactions
//! number vertices in first-visit order and random sampling is seeded.

pub mod appearance;
pub mod error;
pub mod external;
pub mod geometry;
pub mod merge;
pub mod model;
pub mod semantics;
pub mod subset;
pub mod templates;
pub mod triangulate;
pub mod validate;
pub mod vertices;

pub use crate::error::{CjError, FaceError};
pub use crate::merge::{merge, MergeReport};
pub use crate::model::{CityObject, CityObjectType, Model};
pub use crate::subset::{subset, Selection};
pub use crate::triangulate::{triangulate_model, ModelTriangulation};
pub use crate::validate::{validate, ValidationReport};
pub use crate::vertices::{Transform, VertexPool};
