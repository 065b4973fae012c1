//! The shared vertex pool and its quantization transform.
//!
//! Vertices are stored either as raw floating-point coordinates or, under an
//! active [Transform], as signed integers such that
//! `real = int * scale + translate` per axis. Quantized coordinates are
//! supposed to be within the range of an `i64`.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::CjError;
use crate::model::Model;

/// The per-axis scale/translate pair that lets vertices be stored as
/// integers instead of floating point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: [f64; 3],
    pub translate: [f64; 3],
}

/// The coordinate array referenced by index from all boundaries of a model.
/// A model has at most one transform, carried here next to the quantized
/// coordinates it applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexPool {
    Real(Vec<[f64; 3]>),
    Quantized {
        vertices: Vec<[i64; 3]>,
        transform: Transform,
    },
}

impl Default for VertexPool {
    fn default() -> Self {
        VertexPool::Real(Vec::new())
    }
}

impl VertexPool {
    pub fn len(&self) -> usize {
        match self {
            VertexPool::Real(v) => v.len(),
            VertexPool::Quantized { vertices, .. } => vertices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transform(&self) -> Option<&Transform> {
        match self {
            VertexPool::Real(_) => None,
            VertexPool::Quantized { transform, .. } => Some(transform),
        }
    }

    /// The real-world coordinates of vertex `idx`, undoing the transform if
    /// one is active.
    pub fn real_coords(&self, idx: usize) -> Option<[f64; 3]> {
        match self {
            VertexPool::Real(v) => v.get(idx).copied(),
            VertexPool::Quantized {
                vertices,
                transform,
            } => vertices.get(idx).map(|[x, y, z]| {
                [
                    (*x as f64 * transform.scale[0]) + transform.translate[0],
                    (*y as f64 * transform.scale[1]) + transform.translate[1],
                    (*z as f64 * transform.scale[2]) + transform.translate[2],
                ]
            }),
        }
    }

    /// Keep only the vertices whose old index appears in `mapping`, writing
    /// each kept vertex to its new position. `mapping[old] = Some(new)`.
    fn reindex(&mut self, mapping: &[Option<usize>], new_len: usize) {
        match self {
            VertexPool::Real(v) => {
                let mut out = vec![[0.0_f64; 3]; new_len];
                for (old, new) in mapping.iter().enumerate() {
                    if let Some(new) = new {
                        out[*new] = v[old];
                    }
                }
                *v = out;
            }
            VertexPool::Quantized { vertices, .. } => {
                let mut out = vec![[0_i64; 3]; new_len];
                for (old, new) in mapping.iter().enumerate() {
                    if let Some(new) = new {
                        out[*new] = vertices[old];
                    }
                }
                *vertices = out;
            }
        }
    }
}

/// First-seen-wins duplicate mapping over hashable keys. Returns
/// `old index -> new index` with new indices in first-occurrence order.
fn dedup_mapping<K: std::hash::Hash + Eq>(keys: impl Iterator<Item = K>) -> Vec<usize> {
    let mut first_seen: HashMap<K, usize> = HashMap::new();
    let mut mapping: Vec<usize> = Vec::new();
    let mut next_new = 0_usize;
    for key in keys {
        match first_seen.get(&key) {
            Some(new) => mapping.push(*new),
            None => {
                first_seen.insert(key, next_new);
                mapping.push(next_new);
                next_new += 1;
            }
        }
    }
    mapping
}

impl Model {
    /// Merge duplicate vertices, first occurrence wins. Every boundary leaf
    /// is rewritten through the old-to-new mapping. Returns the number of
    /// vertices removed.
    ///
    /// The canonical key of a real-valued vertex is its exact bit pattern,
    /// so `-0.0` and `0.0` count as distinct, and no rounding happens here.
    pub fn deduplicate(&mut self) -> usize {
        let old_len = self.vertices.len();
        let mapping: Vec<usize> = match &self.vertices {
            VertexPool::Real(v) => {
                dedup_mapping(v.iter().map(|[x, y, z]| [x.to_bits(), y.to_bits(), z.to_bits()]))
            }
            VertexPool::Quantized { vertices, .. } => dedup_mapping(vertices.iter().copied()),
        };
        let new_len = mapping.iter().max().map_or(0, |m| m + 1);
        if new_len == old_len {
            return 0;
        }
        // Keep the first occurrence of each vertex.
        let mut keep: Vec<Option<usize>> = vec![None; old_len];
        let mut assigned = vec![false; new_len];
        for (old, new) in mapping.iter().enumerate() {
            if !assigned[*new] {
                assigned[*new] = true;
                keep[old] = Some(*new);
            }
        }
        self.vertices.reindex(&keep, new_len);
        // An out-of-bounds leaf is a structural error for the validator to
        // report, the rewrite leaves it untouched.
        self.map_all_vertex_refs(&mut |vtx| mapping.get(vtx).copied().unwrap_or(vtx));
        debug!("removed {} duplicate vertices", old_len - new_len);
        old_len - new_len
    }

    /// Drop the vertices not referenced by any feature geometry and compact
    /// the pool to the referenced set, in first-visited order (features in
    /// lexicographic id order, leaves depth-first). Template-library
    /// vertices have their own pool and are not touched. Returns the number
    /// of vertices removed.
    pub fn remove_orphans(&mut self) -> usize {
        let old_len = self.vertices.len();
        let mut new_of_old: Vec<Option<usize>> = vec![None; old_len];
        let mut nr_used = 0_usize;
        for co in self.objects.values() {
            for geom in co.geometry.iter() {
                geom.for_each_vertex(&mut |vtx| {
                    if vtx < old_len && new_of_old[vtx].is_none() {
                        new_of_old[vtx] = Some(nr_used);
                        nr_used += 1;
                    }
                });
            }
        }
        if nr_used == old_len {
            return 0;
        }
        self.vertices.reindex(&new_of_old, nr_used);
        self.map_all_vertex_refs(&mut |vtx| {
            new_of_old.get(vtx).copied().flatten().unwrap_or(vtx)
        });
        debug!("removed {} orphaned vertices", old_len - nr_used);
        old_len - nr_used
    }

    /// Quantize the vertices to integers with `precision_digits` decimal
    /// digits, producing a new transform with `scale = 10^-digits` and the
    /// per-axis minimum as translation. Quantization commonly creates
    /// duplicates, so the pool is deduplicated and compacted afterwards.
    ///
    /// Fails when a transform already exists; combining two quantizations is
    /// not well-defined.
    pub fn compress(&mut self, precision_digits: u8) -> Result<(), CjError> {
        let reals = match &self.vertices {
            VertexPool::Real(v) => v,
            VertexPool::Quantized { .. } => return Err(CjError::AlreadyCompressed),
        };
        let scale_axis = 10.0_f64.powi(-(precision_digits as i32));
        let mut translate = [0.0_f64; 3];
        if let Some(first) = reals.first() {
            translate = *first;
            for [x, y, z] in reals.iter() {
                translate[0] = translate[0].min(*x);
                translate[1] = translate[1].min(*y);
                translate[2] = translate[2].min(*z);
            }
        }
        let quantized: Vec<[i64; 3]> = reals
            .iter()
            .map(|v| {
                [
                    ((v[0] - translate[0]) / scale_axis).round() as i64,
                    ((v[1] - translate[1]) / scale_axis).round() as i64,
                    ((v[2] - translate[2]) / scale_axis).round() as i64,
                ]
            })
            .collect();
        self.vertices = VertexPool::Quantized {
            vertices: quantized,
            transform: Transform {
                scale: [scale_axis; 3],
                translate,
            },
        };
        self.deduplicate();
        self.remove_orphans();
        Ok(())
    }

    /// Apply the transform to every vertex and remove it, converting the
    /// pool back to floating point. Returns false as a no-op signal when the
    /// model carries no transform.
    pub fn decompress(&mut self) -> bool {
        let (vertices, transform) = match &self.vertices {
            VertexPool::Real(_) => return false,
            VertexPool::Quantized {
                vertices,
                transform,
            } => (vertices, transform),
        };
        let reals: Vec<[f64; 3]> = vertices
            .iter()
            .map(|[x, y, z]| {
                [
                    (*x as f64 * transform.scale[0]) + transform.translate[0],
                    (*y as f64 * transform.scale[1]) + transform.translate[1],
                    (*z as f64 * transform.scale[2]) + transform.translate[2],
                ]
            })
            .collect();
        self.vertices = VertexPool::Real(reals);
        true
    }

    /// Rewrite every vertex-pool reference of every feature geometry,
    /// including instance anchors.
    pub(crate) fn map_all_vertex_refs(&mut self, f: &mut dyn FnMut(usize) -> usize) {
        for co in self.objects.values_mut() {
            for geom in co.geometry.iter_mut() {
                geom.map_vertices(f);
            }
        }
    }
}
