//! Error types for the model transforms.
//!
//! Precondition violations abort an operation immediately and leave the model
//! unchanged. Local problems (a bad face, a colliding feature id) are
//! accumulated as findings by the operation that hit them and never surface
//! as a hard error, see [crate::validate] and [crate::triangulate].

use thiserror::Error;

/// Errors that abort a whole-model operation.
#[derive(Debug, Error)]
pub enum CjError {
    /// `compress` was called on a model that already carries a transform.
    #[error("the model is already compressed (a transform is present)")]
    AlreadyCompressed,
    /// A subset was requested without any selection criteria.
    #[error("no selection criteria given for the subset")]
    EmptySelection,
    /// A texture operation was requested on a model without an appearance
    /// or without textures.
    #[error("the model has no textures")]
    NoTextures,
    /// A geometry could not be constructed from its document form.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A city object type tag is not part of the known vocabulary.
    #[error("unknown city object type: {0}")]
    UnknownCityObjectType(String),
    /// The document is not a valid model.
    #[error("invalid model document: {0}")]
    InvalidDocument(String),
    /// The reprojection backend rejected a coordinate.
    #[error("reprojection failed: {0}")]
    Reprojection(String),
}

/// Per-face failures during triangulation preparation.
///
/// These are reported for the offending face only; the remaining faces of
/// the model keep processing.
#[derive(Debug, Error, PartialEq)]
pub enum FaceError {
    /// A ring has fewer than 3 vertices after collapsing consecutive
    /// duplicates.
    #[error("degenerate face: ring {ring} has only {nr_vertices} vertices")]
    TooFewVertices { ring: usize, nr_vertices: usize },
    /// Newell's method accumulated a zero vector, the face is collinear or
    /// has zero area.
    #[error("degenerate face: normal estimation failed (zero-area or collinear ring)")]
    ZeroNormal,
    /// A leaf index points outside the vertex pool.
    #[error("vertex index {index} out of bounds (pool length {len})")]
    VertexOutOfBounds { index: usize, len: usize },
    /// The triangulation backend signalled a failure.
    #[error("triangulation backend failed: {0}")]
    Backend(String),
}
