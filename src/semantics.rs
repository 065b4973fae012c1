//! Semantic surfaces and the face-position index over them.
//!
//! The `values` array of a geometry's semantics parallels the boundary
//! nesting at the shell/face granularity, one level shallower than the full
//! ring/vertex nesting. Each entry is either `null` or an index into the
//! `surfaces` list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::{BoundaryTree, FacePath, Surface};

/// One semantic surface record: a type tag ("RoofSurface", "WallSurface", ...),
/// an opaque attribute bag and optional parent/children links into the same
/// geometry's surfaces list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticSurface {
    #[serde(rename = "type")]
    pub surface_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<usize>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, Value>,
}

/// The face-granularity values array, its depth fixed by the geometry type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SemanticsValues {
    /// One entry per face of a MultiSurface/CompositeSurface.
    Surfaces(Vec<Option<usize>>),
    /// One entry per face per shell of a Solid.
    Shells(Vec<Vec<Option<usize>>>),
    /// One entry per face per shell per solid of a MultiSolid/CompositeSolid.
    Solids(Vec<Vec<Vec<Option<usize>>>>),
}

impl SemanticsValues {
    /// Visit every entry paired with the face path it annotates, in the same
    /// depth-first order as the boundary traversal.
    pub fn for_each_value(&self, f: &mut dyn FnMut(FacePath, Option<usize>)) {
        match self {
            SemanticsValues::Surfaces(faces) => {
                for (fi, v) in faces.iter().enumerate() {
                    f(FacePath::Face(fi), *v)
                }
            }
            SemanticsValues::Shells(shells) => {
                for (si, faces) in shells.iter().enumerate() {
                    for (fi, v) in faces.iter().enumerate() {
                        f(FacePath::ShellFace(si, fi), *v)
                    }
                }
            }
            SemanticsValues::Solids(solids) => {
                for (di, shells) in solids.iter().enumerate() {
                    for (si, faces) in shells.iter().enumerate() {
                        for (fi, v) in faces.iter().enumerate() {
                            f(FacePath::SolidShellFace(di, si, fi), *v)
                        }
                    }
                }
            }
        }
    }

    /// The largest surface index referenced, or None if all entries are null.
    pub fn max_value(&self) -> Option<usize> {
        let mut max: Option<usize> = None;
        self.for_each_value(&mut |_, v| {
            if let Some(idx) = v {
                max = Some(max.map_or(idx, |m| m.max(idx)));
            }
        });
        max
    }

    /// Whether the values nesting mirrors the boundary shape at the
    /// shell/face granularity.
    pub fn matches_boundaries(&self, boundaries: &BoundaryTree) -> bool {
        match (self, boundaries) {
            (SemanticsValues::Surfaces(faces), BoundaryTree::MultiSurface(srfs))
            | (SemanticsValues::Surfaces(faces), BoundaryTree::CompositeSurface(srfs)) => {
                faces.len() == srfs.len()
            }
            (SemanticsValues::Shells(shells), BoundaryTree::Solid(b_shells)) => {
                shells.len() == b_shells.len()
                    && shells
                        .iter()
                        .zip(b_shells.iter())
                        .all(|(faces, b_faces)| faces.len() == b_faces.len())
            }
            (SemanticsValues::Solids(solids), BoundaryTree::MultiSolid(b_solids))
            | (SemanticsValues::Solids(solids), BoundaryTree::CompositeSolid(b_solids)) => {
                solids.len() == b_solids.len()
                    && solids.iter().zip(b_solids.iter()).all(|(shells, b_shells)| {
                        shells.len() == b_shells.len()
                            && shells
                                .iter()
                                .zip(b_shells.iter())
                                .all(|(faces, b_faces)| faces.len() == b_faces.len())
                    })
            }
            _ => false,
        }
    }
}

/// The semantics member of a geometry: the surface records plus the parallel
/// values array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semantics {
    pub surfaces: Vec<SemanticSurface>,
    pub values: SemanticsValues,
}

/// Reverse index from a surface to the faces it annotates.
///
/// Built once per geometry, linear in the number of non-null values. Looking
/// up the boundary slice of a surface afterwards is direct indexing through
/// the stored [FacePath]s, so editing a face's rings never requires
/// re-deriving `values`.
#[derive(Debug, Default)]
pub struct SemanticSurfaceIndex {
    /// Face paths per surface, indexed by position in `surfaces`.
    paths: Vec<Vec<FacePath>>,
}

impl SemanticSurfaceIndex {
    pub fn build(semantics: &Semantics) -> Self {
        let mut paths: Vec<Vec<FacePath>> = vec![Vec::new(); semantics.surfaces.len()];
        semantics.values.for_each_value(&mut |path, v| {
            if let Some(surface_id) = v {
                if let Some(entry) = paths.get_mut(surface_id) {
                    entry.push(path);
                }
            }
        });
        SemanticSurfaceIndex { paths }
    }

    /// The surfaces of the given type, compared case-insensitively.
    /// Returns `(surface id, record)` pairs in surface order.
    pub fn get_surfaces<'semantics>(
        &self,
        semantics: &'semantics Semantics,
        surface_type: &str,
    ) -> BTreeMap<usize, &'semantics SemanticSurface> {
        semantics
            .surfaces
            .iter()
            .enumerate()
            .filter(|(_, srf)| srf.surface_type.eq_ignore_ascii_case(surface_type))
            .collect()
    }

    /// The faces annotated by the surface with id `surface_id`.
    pub fn get_surface_boundaries<'tree>(
        &self,
        boundaries: &'tree BoundaryTree,
        surface_id: usize,
    ) -> Vec<&'tree Surface> {
        match self.paths.get(surface_id) {
            Some(paths) => paths.iter().filter_map(|p| boundaries.face(*p)).collect(),
            None => Vec::new(),
        }
    }

    /// The face paths annotated by the surface with id `surface_id`.
    pub fn face_paths(&self, surface_id: usize) -> &[FacePath] {
        self.paths.get(surface_id).map_or(&[], |p| p.as_slice())
    }
}
