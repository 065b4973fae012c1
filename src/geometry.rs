//! The recursive boundary representation of a geometry.
//!
//! A boundary is a nested sequence of indices into the vertex pool. The
//! nesting depth is fixed per geometry type, from 1 for a `MultiPoint` to 5
//! for a `MultiSolid`/`CompositeSolid`. All consumers (deduplication, subset,
//! merge, bbox, semantic indexing) are built from two generic primitives,
//! [BoundaryTree::for_each_leaf] and [BoundaryTree::map_leaves], which visit
//! the leaf indices in depth-first, left-to-right order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::appearance::{MaterialRef, TextureRef};
use crate::error::CjError;
use crate::semantics::Semantics;

// Indexed geometry
pub type VertexId = usize;
pub type Ring = Vec<VertexId>;
pub type Surface = Vec<Ring>;
pub type Shell = Vec<Surface>;
pub type Solid = Vec<Shell>;

/// Visit or rewrite the leaf indices of an arbitrarily nested sequence.
///
/// Implemented for the leaf (`usize`) and for `Vec<T>` of any implementor,
/// which gives the "recurse until you hit a non-sequence" traversal once,
/// independent of the concrete nesting depth.
pub trait LeafIndexed {
    fn for_each_leaf(&self, f: &mut dyn FnMut(VertexId));
    fn map_leaves(&mut self, f: &mut dyn FnMut(VertexId) -> VertexId);
}

impl LeafIndexed for VertexId {
    fn for_each_leaf(&self, f: &mut dyn FnMut(VertexId)) {
        f(*self)
    }
    fn map_leaves(&mut self, f: &mut dyn FnMut(VertexId) -> VertexId) {
        *self = f(*self)
    }
}

impl<T: LeafIndexed> LeafIndexed for Vec<T> {
    fn for_each_leaf(&self, f: &mut dyn FnMut(VertexId)) {
        for item in self.iter() {
            item.for_each_leaf(f)
        }
    }
    fn map_leaves(&mut self, f: &mut dyn FnMut(VertexId) -> VertexId) {
        for item in self.iter_mut() {
            item.map_leaves(f)
        }
    }
}

/// The boundary variants with their fixed nesting depth.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryTree {
    MultiPoint(Vec<VertexId>),
    MultiLineString(Vec<Ring>),
    MultiSurface(Vec<Surface>),
    CompositeSurface(Vec<Surface>),
    Solid(Solid),
    MultiSolid(Vec<Solid>),
    CompositeSolid(Vec<Solid>),
}

/// Position of a face (ring list) inside a [BoundaryTree].
///
/// The path stores exactly the indices needed to reach the face, so looking
/// a face up again is direct indexing, no re-scan of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FacePath {
    /// `boundaries[face]` in a MultiSurface/CompositeSurface.
    Face(usize),
    /// `boundaries[shell][face]` in a Solid.
    ShellFace(usize, usize),
    /// `boundaries[solid][shell][face]` in a MultiSolid/CompositeSolid.
    SolidShellFace(usize, usize, usize),
}

impl BoundaryTree {
    pub fn type_name(&self) -> &'static str {
        match self {
            BoundaryTree::MultiPoint(_) => "MultiPoint",
            BoundaryTree::MultiLineString(_) => "MultiLineString",
            BoundaryTree::MultiSurface(_) => "MultiSurface",
            BoundaryTree::CompositeSurface(_) => "CompositeSurface",
            BoundaryTree::Solid(_) => "Solid",
            BoundaryTree::MultiSolid(_) => "MultiSolid",
            BoundaryTree::CompositeSolid(_) => "CompositeSolid",
        }
    }

    /// Visit every leaf index in depth-first, left-to-right order.
    pub fn for_each_leaf(&self, f: &mut dyn FnMut(VertexId)) {
        match self {
            BoundaryTree::MultiPoint(b) => b.for_each_leaf(f),
            BoundaryTree::MultiLineString(b) => b.for_each_leaf(f),
            BoundaryTree::MultiSurface(b) => b.for_each_leaf(f),
            BoundaryTree::CompositeSurface(b) => b.for_each_leaf(f),
            BoundaryTree::Solid(b) => b.for_each_leaf(f),
            BoundaryTree::MultiSolid(b) => b.for_each_leaf(f),
            BoundaryTree::CompositeSolid(b) => b.for_each_leaf(f),
        }
    }

    /// Rewrite every leaf index in place, same order as [Self::for_each_leaf].
    pub fn map_leaves(&mut self, f: &mut dyn FnMut(VertexId) -> VertexId) {
        match self {
            BoundaryTree::MultiPoint(b) => b.map_leaves(f),
            BoundaryTree::MultiLineString(b) => b.map_leaves(f),
            BoundaryTree::MultiSurface(b) => b.map_leaves(f),
            BoundaryTree::CompositeSurface(b) => b.map_leaves(f),
            BoundaryTree::Solid(b) => b.map_leaves(f),
            BoundaryTree::MultiSolid(b) => b.map_leaves(f),
            BoundaryTree::CompositeSolid(b) => b.map_leaves(f),
        }
    }

    /// The face-level view of the boundary: every face (ring list) paired
    /// with the path to reach it. Point and line geometries have no faces.
    pub fn faces(&self) -> Vec<(FacePath, &Surface)> {
        let mut out = Vec::new();
        match self {
            BoundaryTree::MultiPoint(_) | BoundaryTree::MultiLineString(_) => {}
            BoundaryTree::MultiSurface(srfs) | BoundaryTree::CompositeSurface(srfs) => {
                for (fi, srf) in srfs.iter().enumerate() {
                    out.push((FacePath::Face(fi), srf));
                }
            }
            BoundaryTree::Solid(shells) => {
                for (si, shell) in shells.iter().enumerate() {
                    for (fi, srf) in shell.iter().enumerate() {
                        out.push((FacePath::ShellFace(si, fi), srf));
                    }
                }
            }
            BoundaryTree::MultiSolid(solids) | BoundaryTree::CompositeSolid(solids) => {
                for (di, solid) in solids.iter().enumerate() {
                    for (si, shell) in solid.iter().enumerate() {
                        for (fi, srf) in shell.iter().enumerate() {
                            out.push((FacePath::SolidShellFace(di, si, fi), srf));
                        }
                    }
                }
            }
        }
        out
    }

    /// Direct lookup of the face at `path`.
    pub fn face(&self, path: FacePath) -> Option<&Surface> {
        match (self, path) {
            (BoundaryTree::MultiSurface(srfs), FacePath::Face(fi))
            | (BoundaryTree::CompositeSurface(srfs), FacePath::Face(fi)) => srfs.get(fi),
            (BoundaryTree::Solid(shells), FacePath::ShellFace(si, fi)) => {
                shells.get(si).and_then(|shell| shell.get(fi))
            }
            (BoundaryTree::MultiSolid(solids), FacePath::SolidShellFace(di, si, fi))
            | (BoundaryTree::CompositeSolid(solids), FacePath::SolidShellFace(di, si, fi)) => solids
                .get(di)
                .and_then(|solid| solid.get(si))
                .and_then(|shell| shell.get(fi)),
            _ => None,
        }
    }

    /// The largest leaf index, or None for an empty boundary.
    pub fn max_leaf(&self) -> Option<VertexId> {
        let mut max: Option<VertexId> = None;
        self.for_each_leaf(&mut |vtx| {
            max = Some(max.map_or(vtx, |m| m.max(vtx)));
        });
        max
    }

    fn from_value(type_tag: &str, boundaries: &Value) -> Result<Self, CjError> {
        let invalid = |e: serde_json::Error| {
            CjError::InvalidGeometry(format!("boundaries of a {}: {}", type_tag, e))
        };
        // One case-insensitive tag lookup at construction, the enum is used
        // everywhere downstream.
        match type_tag.to_lowercase().as_str() {
            "multipoint" => Ok(BoundaryTree::MultiPoint(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            "multilinestring" => Ok(BoundaryTree::MultiLineString(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            "multisurface" => Ok(BoundaryTree::MultiSurface(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            "compositesurface" => Ok(BoundaryTree::CompositeSurface(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            "solid" => Ok(BoundaryTree::Solid(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            "multisolid" => Ok(BoundaryTree::MultiSolid(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            "compositesolid" => Ok(BoundaryTree::CompositeSolid(
                serde_json::from_value(boundaries.clone()).map_err(invalid)?,
            )),
            _ => Err(CjError::InvalidGeometry(format!(
                "unknown geometry type: {}",
                type_tag
            ))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            BoundaryTree::MultiPoint(b) => serde_json::json!(b),
            BoundaryTree::MultiLineString(b) => serde_json::json!(b),
            BoundaryTree::MultiSurface(b) => serde_json::json!(b),
            BoundaryTree::CompositeSurface(b) => serde_json::json!(b),
            BoundaryTree::Solid(b) => serde_json::json!(b),
            BoundaryTree::MultiSolid(b) => serde_json::json!(b),
            BoundaryTree::CompositeSolid(b) => serde_json::json!(b),
        }
    }
}

/// A nested sequence of optional indices, used by the material and texture
/// `values` arrays. `Leaf(None)` is the `null` sentinel and passes through
/// every rewrite unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NestedIdx {
    Leaf(Option<usize>),
    Arr(Vec<NestedIdx>),
}

/// Which positions of an innermost array a rewrite touches.
///
/// Texture value arrays interleave a texture index (position 0) with
/// texture-vertex indices (positions >= 1), which live in two independent
/// namespaces and therefore need two independent rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlicePolicy {
    /// Every leaf.
    All,
    /// Only position 0 of each innermost array.
    FirstOnly,
    /// Every position but 0 of each innermost array.
    SkipFirst,
}

impl NestedIdx {
    fn is_flat(&self) -> bool {
        match self {
            NestedIdx::Leaf(_) => true,
            NestedIdx::Arr(items) => items.iter().all(|i| matches!(i, NestedIdx::Leaf(_))),
        }
    }

    pub fn for_each_leaf(&self, policy: SlicePolicy, f: &mut dyn FnMut(Option<usize>)) {
        match self {
            NestedIdx::Leaf(leaf) => f(*leaf),
            NestedIdx::Arr(items) => {
                if self.is_flat() {
                    for (pos, item) in items.iter().enumerate() {
                        if let NestedIdx::Leaf(leaf) = item {
                            match policy {
                                SlicePolicy::All => f(*leaf),
                                SlicePolicy::FirstOnly if pos == 0 => f(*leaf),
                                SlicePolicy::SkipFirst if pos > 0 => f(*leaf),
                                _ => {}
                            }
                        }
                    }
                } else {
                    for item in items.iter() {
                        item.for_each_leaf(policy, f)
                    }
                }
            }
        }
    }

    /// Rewrite the non-null leaves selected by `policy`.
    pub fn map_leaves(&mut self, policy: SlicePolicy, f: &mut dyn FnMut(usize) -> usize) {
        match self {
            NestedIdx::Leaf(leaf) => {
                if let Some(idx) = leaf {
                    *idx = f(*idx)
                }
            }
            NestedIdx::Arr(items) => {
                let flat = items.iter().all(|i| matches!(i, NestedIdx::Leaf(_)));
                if flat {
                    for (pos, item) in items.iter_mut().enumerate() {
                        let touch = match policy {
                            SlicePolicy::All => true,
                            SlicePolicy::FirstOnly => pos == 0,
                            SlicePolicy::SkipFirst => pos > 0,
                        };
                        if touch {
                            if let NestedIdx::Leaf(Some(idx)) = item {
                                *idx = f(*idx)
                            }
                        }
                    }
                } else {
                    for item in items.iter_mut() {
                        item.map_leaves(policy, f)
                    }
                }
            }
        }
    }
}

/// A geometry of a city object: a boundary tagged with a level-of-detail
/// label, optional semantic surfaces and optional per-theme appearance
/// references, or a reference into the template library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeometryDoc", into = "GeometryDoc")]
pub struct Geometry {
    pub lod: Option<String>,
    pub kind: GeometryKind,
    pub semantics: Option<Semantics>,
    pub material: BTreeMap<String, MaterialRef>,
    pub texture: BTreeMap<String, TextureRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryKind {
    Boundaries(BoundaryTree),
    /// A reference to a template, anchored at one placement vertex of the
    /// model's own pool.
    Instance { template: usize, anchor: VertexId },
}

impl Geometry {
    pub fn from_boundaries(lod: &str, boundaries: BoundaryTree) -> Self {
        Geometry {
            lod: Some(lod.to_string()),
            kind: GeometryKind::Boundaries(boundaries),
            semantics: None,
            material: BTreeMap::new(),
            texture: BTreeMap::new(),
        }
    }

    pub fn boundaries(&self) -> Option<&BoundaryTree> {
        match &self.kind {
            GeometryKind::Boundaries(b) => Some(b),
            GeometryKind::Instance { .. } => None,
        }
    }

    pub fn boundaries_mut(&mut self) -> Option<&mut BoundaryTree> {
        match &mut self.kind {
            GeometryKind::Boundaries(b) => Some(b),
            GeometryKind::Instance { .. } => None,
        }
    }

    /// Visit every vertex-pool index of this geometry, including the
    /// placement anchor of an instance.
    pub fn for_each_vertex(&self, f: &mut dyn FnMut(VertexId)) {
        match &self.kind {
            GeometryKind::Boundaries(b) => b.for_each_leaf(f),
            GeometryKind::Instance { anchor, .. } => f(*anchor),
        }
    }

    /// Rewrite every vertex-pool index of this geometry, including the
    /// placement anchor of an instance.
    pub fn map_vertices(&mut self, f: &mut dyn FnMut(VertexId) -> VertexId) {
        match &mut self.kind {
            GeometryKind::Boundaries(b) => b.map_leaves(f),
            GeometryKind::Instance { anchor, .. } => *anchor = f(*anchor),
        }
    }
}

/// Document form of a geometry, the `"type"`-tagged member of a city
/// object's `geometry` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeometryDoc {
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lod: Option<String>,
    boundaries: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    semantics: Option<Semantics>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    material: BTreeMap<String, MaterialRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    texture: BTreeMap<String, TextureRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<usize>,
}

impl TryFrom<GeometryDoc> for Geometry {
    type Error = CjError;

    fn try_from(doc: GeometryDoc) -> Result<Self, Self::Error> {
        let kind = if doc.type_tag.eq_ignore_ascii_case("GeometryInstance") {
            let template = doc.template.ok_or_else(|| {
                CjError::InvalidGeometry("a GeometryInstance without a template index".to_string())
            })?;
            let anchors: Vec<VertexId> =
                serde_json::from_value(doc.boundaries.clone()).map_err(|e| {
                    CjError::InvalidGeometry(format!("boundaries of a GeometryInstance: {}", e))
                })?;
            match anchors[..] {
                [anchor] => GeometryKind::Instance { template, anchor },
                _ => {
                    return Err(CjError::InvalidGeometry(
                        "a GeometryInstance must have exactly one placement vertex".to_string(),
                    ))
                }
            }
        } else {
            GeometryKind::Boundaries(BoundaryTree::from_value(&doc.type_tag, &doc.boundaries)?)
        };
        Ok(Geometry {
            lod: doc.lod,
            kind,
            semantics: doc.semantics,
            material: doc.material,
            texture: doc.texture,
        })
    }
}

impl From<Geometry> for GeometryDoc {
    fn from(geom: Geometry) -> Self {
        let (type_tag, boundaries, template) = match &geom.kind {
            GeometryKind::Boundaries(b) => (b.type_name().to_string(), b.to_value(), None),
            GeometryKind::Instance { template, anchor } => (
                "GeometryInstance".to_string(),
                serde_json::json!([anchor]),
                Some(*template),
            ),
        };
        GeometryDoc {
            type_tag,
            lod: geom.lod,
            boundaries,
            semantics: geom.semantics,
            material: geom.material,
            texture: geom.texture,
            template,
        }
    }
}
