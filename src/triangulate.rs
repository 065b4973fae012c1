//! Prepare polygon faces for triangulation and run a pluggable backend.
//!
//! A face is a ring list, first ring exterior, the rest holes. Preparation
//! collapses consecutive duplicate indices (they reliably crash naive
//! triangulators), estimates a face normal with Newell's method, projects
//! the rings to a 2D frame orthogonal to that normal and computes one
//! interior point per hole. The backend works on the flattened per-face 2D
//! points; its output triangles are mapped back to vertex-pool indices.
//!
//! Degenerate faces are reported and skipped, they never abort the
//! triangulation of the remaining faces.

use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;

use crate::error::FaceError;
use crate::geometry::{Ring, Surface};
use crate::model::Model;
use crate::vertices::VertexPool;

/// A face after preparation: collapsed rings, the flattened 2D projection
/// and one interior point per hole.
#[derive(Debug)]
pub struct PreparedFace {
    /// Collapsed rings, leaves are vertex-pool indices.
    pub rings: Vec<Ring>,
    /// Flattened pool indices, parallel to `points_2d`.
    pub pool_indices: Vec<usize>,
    /// The projected vertices, flattened over the rings.
    pub points_2d: Vec<[f64; 2]>,
    /// Number of vertices per ring, in ring order.
    pub ring_sizes: Vec<usize>,
    /// One representative interior point per hole ring.
    pub hole_points: Vec<[f64; 2]>,
    /// The unit face normal from Newell's method over the exterior ring.
    pub normal: [f64; 3],
}

/// The outcome of preparing a single face.
#[derive(Debug)]
pub enum FacePrep {
    /// The face is already a single triangle; it must be returned verbatim,
    /// re-triangulating could flip its winding.
    Triangle([usize; 3]),
    Full(PreparedFace),
}

/// A triangulation backend consumes the prepared 2D face and returns
/// triangles as index triples into the flattened point list. It must signal
/// failure on numerically degenerate input, not crash.
pub trait TriangulationBackend {
    fn triangulate(&self, prep: &PreparedFace) -> Result<Vec<[usize; 3]>, FaceError>;
}

/// The robust, hole-aware ear-clipping backend.
pub struct Earcut;

impl TriangulationBackend for Earcut {
    fn triangulate(&self, prep: &PreparedFace) -> Result<Vec<[usize; 3]>, FaceError> {
        let flat: Vec<f64> = prep
            .points_2d
            .iter()
            .flat_map(|[x, y]| [*x, *y])
            .collect();
        // Hole start offsets into the flattened point list.
        let mut hole_starts: Vec<usize> = Vec::with_capacity(prep.ring_sizes.len() - 1);
        let mut offset = 0_usize;
        for size in &prep.ring_sizes[..prep.ring_sizes.len() - 1] {
            offset += size;
            hole_starts.push(offset);
        }
        let raw = earcutr::earcut(&flat, &hole_starts, 2)
            .map_err(|e| FaceError::Backend(format!("earcut: {:?}", e)))?;
        if raw.is_empty() {
            return Err(FaceError::Backend("earcut returned no triangles".to_string()));
        }
        Ok(raw.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect())
    }
}

/// The fast, less robust backend: a fan over the exterior ring. Only correct
/// for convex faces and it ignores holes.
pub struct Fan;

impl TriangulationBackend for Fan {
    fn triangulate(&self, prep: &PreparedFace) -> Result<Vec<[usize; 3]>, FaceError> {
        let n = prep.ring_sizes[0];
        if n < 3 {
            return Err(FaceError::Backend("fan needs at least 3 vertices".to_string()));
        }
        Ok((1..n - 1).map(|i| [0, i, i + 1]).collect())
    }
}

/// Remove consecutive duplicate indices from a ring, including a last
/// vertex that repeats the first.
fn collapse_ring(ring: &Ring) -> Ring {
    let mut out: Ring = Vec::with_capacity(ring.len());
    for vtx in ring.iter() {
        if out.last() != Some(vtx) {
            out.push(*vtx);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let norm = dot(v, v).sqrt();
    if norm < 1e-12 {
        return None;
    }
    Some([v[0] / norm, v[1] / norm, v[2] / norm])
}

/// Unit face normal with Newell's method over the given ring. None when the
/// accumulated vector is zero, the ring is collinear or has zero area.
pub fn newell_normal(points: &[[f64; 3]]) -> Option<[f64; 3]> {
    let mut normal = [0.0_f64; 3];
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        normal[0] += (p[1] - q[1]) * (p[2] + q[2]);
        normal[1] += (p[2] - q[2]) * (p[0] + q[0]);
        normal[2] += (p[0] - q[0]) * (p[1] + q[1]);
    }
    normalize(normal)
}

/// Project a 3D point into the 2D frame orthogonal to `normal`.
///
/// The frame is built from an arbitrary reference vector that is not
/// parallel to the normal, Gram-Schmidt'ed against it for the x-axis; the
/// y-axis is the cross product.
fn plane_axes(normal: [f64; 3]) -> ([f64; 3], [f64; 3]) {
    let mut reference = [1.1_f64, 1.1, 1.1];
    let r_norm = dot(reference, reference).sqrt();
    if (dot(normal, reference).abs() / r_norm - 1.0).abs() < 1e-9 {
        // The reference coincides with the normal, nudge it.
        reference = [1.1, 1.1, 2.2];
    }
    let proj = dot(reference, normal);
    let x_axis = normalize([
        reference[0] - proj * normal[0],
        reference[1] - proj * normal[1],
        reference[2] - proj * normal[2],
    ])
    .unwrap_or([1.0, 0.0, 0.0]);
    let y_axis = cross(normal, x_axis);
    (x_axis, y_axis)
}

fn pool_coords(pool: &VertexPool, vtx: usize) -> Result<[f64; 3], FaceError> {
    pool.real_coords(vtx).ok_or(FaceError::VertexOutOfBounds {
        index: vtx,
        len: pool.len(),
    })
}

/// Prepare one face for a triangulation backend.
pub fn prepare_face(face: &Surface, pool: &VertexPool) -> Result<FacePrep, FaceError> {
    let rings: Vec<Ring> = face.iter().map(collapse_ring).collect();
    if rings.is_empty() {
        return Err(FaceError::TooFewVertices {
            ring: 0,
            nr_vertices: 0,
        });
    }

    // A pre-triangulated face is returned verbatim.
    if rings.len() == 1 && rings[0].len() == 3 {
        for vtx in rings[0].iter() {
            pool_coords(pool, *vtx)?;
        }
        return Ok(FacePrep::Triangle([rings[0][0], rings[0][1], rings[0][2]]));
    }
    for (ri, ring) in rings.iter().enumerate() {
        if ring.len() < 3 {
            return Err(FaceError::TooFewVertices {
                ring: ri,
                nr_vertices: ring.len(),
            });
        }
    }

    let exterior: Vec<[f64; 3]> = rings[0]
        .iter()
        .map(|vtx| pool_coords(pool, *vtx))
        .collect::<Result<_, _>>()?;
    let normal = newell_normal(&exterior).ok_or(FaceError::ZeroNormal)?;
    let (x_axis, y_axis) = plane_axes(normal);
    let origin = exterior[0];

    let mut pool_indices: Vec<usize> = Vec::new();
    let mut points_2d: Vec<[f64; 2]> = Vec::new();
    let mut ring_sizes: Vec<usize> = Vec::with_capacity(rings.len());
    for ring in rings.iter() {
        ring_sizes.push(ring.len());
        for vtx in ring.iter() {
            let p = sub(pool_coords(pool, *vtx)?, origin);
            pool_indices.push(*vtx);
            points_2d.push([dot(p, x_axis), dot(p, y_axis)]);
        }
    }

    // One interior point per hole: triangulate the hole ring alone and take
    // the centroid of its first triangle.
    let mut hole_points: Vec<[f64; 2]> = Vec::with_capacity(rings.len() - 1);
    let mut offset = ring_sizes[0];
    for size in &ring_sizes[1..] {
        let hole_2d = &points_2d[offset..offset + size];
        let flat: Vec<f64> = hole_2d.iter().flat_map(|[x, y]| [*x, *y]).collect();
        let tri = earcutr::earcut(&flat, &Vec::new(), 2)
            .map_err(|e| FaceError::Backend(format!("hole triangulation: {:?}", e)))?;
        if tri.len() < 3 {
            return Err(FaceError::Backend(
                "hole ring could not be triangulated".to_string(),
            ));
        }
        let [a, b, c] = [hole_2d[tri[0]], hole_2d[tri[1]], hole_2d[tri[2]]];
        hole_points.push([
            (a[0] + b[0] + c[0]) / 3.0,
            (a[1] + b[1] + c[1]) / 3.0,
        ]);
        offset += size;
    }

    Ok(FacePrep::Full(PreparedFace {
        rings,
        pool_indices,
        points_2d,
        ring_sizes,
        hole_points,
        normal,
    }))
}

/// Triangulate one face and return triangles as vertex-pool index triples.
pub fn triangulate_face(
    face: &Surface,
    pool: &VertexPool,
    backend: &dyn TriangulationBackend,
) -> Result<Vec<[usize; 3]>, FaceError> {
    match prepare_face(face, pool)? {
        FacePrep::Triangle(tri) => Ok(vec![tri]),
        FacePrep::Full(prep) => {
            let local = backend.triangulate(&prep)?;
            Ok(local
                .iter()
                .map(|[a, b, c]| {
                    [
                        prep.pool_indices[*a],
                        prep.pool_indices[*b],
                        prep.pool_indices[*c],
                    ]
                })
                .collect())
        }
    }
}

/// Triangles per feature plus the findings for the faces that were skipped.
#[derive(Debug, Default)]
pub struct ModelTriangulation {
    pub triangles: BTreeMap<String, Vec<[usize; 3]>>,
    pub findings: Vec<String>,
}

/// Triangulate every face of every feature geometry. Faces are independent,
/// so the features are processed in parallel; the output order is fixed by
/// feature id regardless. Geometry instances are skipped, their templates
/// index a different pool.
pub fn triangulate_model(cm: &Model, sloppy: bool) -> ModelTriangulation {
    let earcut = Earcut;
    let fan = Fan;
    let backend: &(dyn TriangulationBackend + Sync) = if sloppy { &fan } else { &earcut };

    let features: Vec<(&String, &crate::model::CityObject)> = cm.objects.iter().collect();
    let per_feature: Vec<(String, Vec<[usize; 3]>, Vec<String>)> = features
        .par_iter()
        .map(|(id, co)| {
            let mut triangles: Vec<[usize; 3]> = Vec::new();
            let mut findings: Vec<String> = Vec::new();
            for (gi, geom) in co.geometry.iter().enumerate() {
                let Some(boundaries) = geom.boundaries() else {
                    continue;
                };
                for (path, face) in boundaries.faces() {
                    match triangulate_face(face, &cm.vertices, backend) {
                        Ok(mut tris) => triangles.append(&mut tris),
                        Err(e) => findings.push(format!(
                            "feature {} geometry {} face {:?}: {}",
                            id, gi, path, e
                        )),
                    }
                }
            }
            ((*id).clone(), triangles, findings)
        })
        .collect();

    let mut out = ModelTriangulation::default();
    for (id, triangles, mut findings) in per_feature {
        debug!("feature {}: {} triangles", id, triangles.len());
        out.findings.append(&mut findings);
        if !triangles.is_empty() {
            out.triangles.insert(id, triangles);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square_pool() -> VertexPool {
        VertexPool::Real(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ])
    }

    #[test]
    fn test_collapse_ring() {
        assert_eq!(collapse_ring(&vec![0, 1, 1, 2]), vec![0, 1, 2]);
        assert_eq!(collapse_ring(&vec![0, 1, 2, 0]), vec![0, 1, 2]);
        assert_eq!(collapse_ring(&vec![5, 5, 5]), vec![5]);
    }

    #[test]
    fn test_newell_normal_of_square() {
        let points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let normal = newell_normal(&points).unwrap();
        assert_relative_eq!(normal[0], 0.0);
        assert_relative_eq!(normal[1], 0.0);
        assert_relative_eq!(normal[2].abs(), 1.0);
    }

    #[test]
    fn test_newell_normal_collinear_fails() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        assert!(newell_normal(&points).is_none());
    }

    #[test]
    fn test_triangle_short_circuits() {
        let pool = unit_square_pool();
        let face: Surface = vec![vec![0, 1, 2]];
        let tris = triangulate_face(&face, &pool, &Earcut).unwrap();
        // Returned verbatim, winding untouched.
        assert_eq!(tris, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_unit_square_scenario() {
        let pool = unit_square_pool();
        let face: Surface = vec![vec![0, 1, 2, 3]];
        let tris = triangulate_face(&face, &pool, &Earcut).unwrap();
        assert_eq!(tris.len(), 2);
        let mut used: Vec<usize> = tris.iter().flatten().copied().collect();
        used.sort();
        used.dedup();
        assert_eq!(used, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_degenerate_ring_reported() {
        let pool = unit_square_pool();
        let face: Surface = vec![vec![0, 1, 1, 0]];
        match triangulate_face(&face, &pool, &Earcut) {
            Err(FaceError::TooFewVertices { ring: 0, nr_vertices: 2 }) => {}
            other => panic!("expected a degenerate-face error, got {:?}", other),
        }
    }

    #[test]
    fn test_face_without_rings_reported() {
        let pool = unit_square_pool();
        let face: Surface = vec![];
        match triangulate_face(&face, &pool, &Earcut) {
            Err(FaceError::TooFewVertices { ring: 0, nr_vertices: 0 }) => {}
            other => panic!("expected a degenerate-face error, got {:?}", other),
        }
    }

    #[test]
    fn test_ringless_face_does_not_abort_model() {
        let cm = crate::model::tests::model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "good": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2, 3]]]}
                ]},
                "ringless": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [1.0,1.0,0.0], [0.0,1.0,0.0]]
        }"#,
        );
        let result = triangulate_model(&cm, false);
        assert_eq!(result.triangles["good"].len(), 2);
        assert_eq!(result.findings.len(), 1);
        assert!(result.findings[0].contains("ringless"));
    }

    #[test]
    fn test_out_of_bounds_leaf_reported() {
        let pool = unit_square_pool();
        let face: Surface = vec![vec![0, 1, 99, 3]];
        assert!(matches!(
            triangulate_face(&face, &pool, &Earcut),
            Err(FaceError::VertexOutOfBounds { index: 99, .. })
        ));
    }

    #[test]
    fn test_face_with_hole() {
        let pool = VertexPool::Real(vec![
            [0.0, 0.0, 0.0],
            [4.0, 0.0, 0.0],
            [4.0, 4.0, 0.0],
            [0.0, 4.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 3.0, 0.0],
            [3.0, 3.0, 0.0],
            [3.0, 1.0, 0.0],
        ]);
        let face: Surface = vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]];
        let prep = match prepare_face(&face, &pool).unwrap() {
            FacePrep::Full(prep) => prep,
            FacePrep::Triangle(_) => panic!("expected a full prep"),
        };
        assert_eq!(prep.ring_sizes, vec![4, 4]);
        assert_eq!(prep.hole_points.len(), 1);

        let tris = triangulate_face(&face, &pool, &Earcut).unwrap();
        assert!(!tris.is_empty());
        // The hole ring's vertices participate in the triangulation.
        assert!(tris.iter().flatten().any(|vtx| *vtx >= 4));
        // No triangle may span the hole interior; with the hole cut out the
        // total area is 16 - 4.
        let area: f64 = tris
            .iter()
            .map(|[a, b, c]| {
                let pa = pool.real_coords(*a).unwrap();
                let pb = pool.real_coords(*b).unwrap();
                let pc = pool.real_coords(*c).unwrap();
                ((pb[0] - pa[0]) * (pc[1] - pa[1]) - (pc[0] - pa[0]) * (pb[1] - pa[1])).abs()
                    / 2.0
            })
            .sum();
        assert_relative_eq!(area, 12.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fan_backend_on_convex_face() {
        let pool = unit_square_pool();
        let face: Surface = vec![vec![0, 1, 2, 3]];
        let tris = triangulate_face(&face, &pool, &Fan).unwrap();
        assert_eq!(tris, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_triangulate_model_collects_findings() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cm = crate::model::tests::model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "good": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2, 3]]]}
                ]},
                "bad": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1]]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [1.0,1.0,0.0], [0.0,1.0,0.0]]
        }"#,
        );
        let result = triangulate_model(&cm, false);
        assert_eq!(result.triangles["good"].len(), 2);
        assert!(!result.triangles.contains_key("bad"));
        assert_eq!(result.findings.len(), 1);
        assert!(result.findings[0].contains("bad"));
    }

    #[test]
    fn test_vertical_wall_projection() {
        // A wall in the XZ plane; the projection must still be 2D-sane.
        let pool = VertexPool::Real(vec![
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [2.0, 0.0, 3.0],
            [0.0, 0.0, 3.0],
        ]);
        let face: Surface = vec![vec![0, 1, 2, 3]];
        let tris = triangulate_face(&face, &pool, &Earcut).unwrap();
        assert_eq!(tris.len(), 2);
    }
}
