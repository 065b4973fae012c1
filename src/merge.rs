//! Combine independent models into one by offset arithmetic over every
//! index namespace.
//!
//! All inputs are decompressed first; combining two independent quantization
//! transforms is not well-defined. Feature ids colliding with an id already
//! present are skipped and reported, the one already present wins, so merge
//! order decides collision outcomes but the non-colliding content merges
//! associatively.
//!
//! No cross-check of the inputs' reference systems happens here; merging
//! models in different CRSs silently produces mixed coordinates.

use log::{info, warn};

use crate::appearance::Appearance;
use crate::geometry::GeometryKind;
use crate::model::Model;
use crate::templates::GeometryTemplates;
use crate::vertices::VertexPool;

/// The outcome of a merge: how much was merged and which feature ids were
/// rejected. Collisions are findings, not failures; the merge of the
/// remaining content always completes.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Number of features added to the base.
    pub nr_merged: usize,
    /// One finding per rejected feature id, in encounter order.
    pub collisions: Vec<String>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.collisions.is_empty()
    }
}

/// Merge `others` into `base`, in order. Consumes all inputs; the result
/// exclusively owns every array.
pub fn merge(mut base: Model, others: Vec<Model>) -> (Model, MergeReport) {
    let mut report = MergeReport::default();
    base.decompress();
    for other in others {
        merge_one(&mut base, other, &mut report);
    }
    base.update_extent();
    info!(
        "merged {} features, {} collisions",
        report.nr_merged,
        report.collisions.len()
    );
    (base, report)
}

fn merge_one(base: &mut Model, mut other: Model, report: &mut MergeReport) {
    other.decompress();

    let added_ids: Vec<String> = other
        .objects
        .keys()
        .filter(|id| !base.objects.contains_key(*id))
        .cloned()
        .collect();
    for id in other.objects.keys() {
        if base.objects.contains_key(id) {
            warn!("feature {} already exists in the base model, skipped", id);
            report.collisions.push(id.clone());
        }
    }
    // Nothing to add from this model: leave its vertices and appearance
    // behind entirely, no dangling growth.
    if added_ids.is_empty() {
        return;
    }

    let vertex_offset = base.vertices.len();
    let material_offset = base
        .appearance
        .as_ref()
        .map_or(0, |appearance| appearance.materials.len());
    let texture_offset = base
        .appearance
        .as_ref()
        .map_or(0, |appearance| appearance.textures.len());
    let tex_vertex_offset = base
        .appearance
        .as_ref()
        .map_or(0, |appearance| appearance.vertices_texture.len());
    let template_offset = base
        .templates
        .as_ref()
        .map_or(0, |templates| templates.templates.len());
    let template_vertex_offset = base
        .templates
        .as_ref()
        .map_or(0, |templates| templates.vertices_templates.len());

    // Append the other's vertex pool; both pools are real-valued after the
    // decompression above.
    if let (VertexPool::Real(base_verts), VertexPool::Real(other_verts)) =
        (&mut base.vertices, &other.vertices)
    {
        base_verts.extend_from_slice(other_verts);
    }

    let other_has_templates = other
        .templates
        .as_ref()
        .map_or(false, |templates| !templates.is_empty());
    if other_has_templates {
        let mut incoming = other.templates.take().unwrap_or_default();
        for template in incoming.templates.iter_mut() {
            if let Some(b) = template.boundaries_mut() {
                b.map_leaves(&mut |vtx| vtx + template_vertex_offset);
            }
        }
        let merged = base.templates.get_or_insert_with(GeometryTemplates::default);
        merged.templates.append(&mut incoming.templates);
        merged
            .vertices_templates
            .append(&mut incoming.vertices_templates);
    }

    let other_has_appearance = other
        .appearance
        .as_ref()
        .map_or(false, |appearance| {
            !appearance.is_empty() || !appearance.vertices_texture.is_empty()
        });
    if other_has_appearance {
        let mut incoming = other.appearance.take().unwrap_or_default();
        let merged = base.appearance.get_or_insert_with(Appearance::default);
        merged.materials.append(&mut incoming.materials);
        merged.textures.append(&mut incoming.textures);
        merged
            .vertices_texture
            .append(&mut incoming.vertices_texture);
        if merged.default_theme_material.is_none() {
            merged.default_theme_material = incoming.default_theme_material;
        }
        if merged.default_theme_texture.is_none() {
            merged.default_theme_texture = incoming.default_theme_texture;
        }
    }

    for id in added_ids {
        let Some(mut co) = other.objects.remove(&id) else {
            continue;
        };
        for geom in co.geometry.iter_mut() {
            geom.map_vertices(&mut |vtx| vtx + vertex_offset);
            if let GeometryKind::Instance { template, .. } = &mut geom.kind {
                *template += template_offset;
            }
            for mat_ref in geom.material.values_mut() {
                mat_ref.map_indices(&mut |idx| idx + material_offset);
            }
            for tex_ref in geom.texture.values_mut() {
                tex_ref.map_textures(&mut |idx| idx + texture_offset);
                tex_ref.map_texture_vertices(&mut |idx| idx + tex_vertex_offset);
            }
        }
        base.objects.insert(id, co);
        report.nr_merged += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::model_from_json;
    use crate::subset::{subset, Selection};

    fn base_model() -> Model {
        model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "X": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2]]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]]
        }"#,
        )
    }

    fn other_model() -> Model {
        model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "Y": {"type": "Road", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2]]],
                     "material": {"default": {"value": 0}},
                     "texture": {"default": {"values": [[[0, 0, 1, 2]]]}}},
                    {"type": "GeometryInstance", "template": 0, "boundaries": [0]}
                ]}
            },
            "vertices": [[10.0,0.0,0.0], [11.0,0.0,0.0], [10.0,1.0,0.0]],
            "geometry-templates": {
                "templates": [{"type": "MultiPoint", "lod": "1", "boundaries": [0]}],
                "vertices-templates": [[0.5, 0.5, 0.5]]
            },
            "appearance": {
                "materials": [{"name": "asphalt"}],
                "textures": [{"image": "road.png"}],
                "vertices-texture": [[0.0,0.0], [1.0,0.0], [1.0,1.0]]
            }
        }"#,
        )
    }

    #[test]
    fn test_merge_offsets_every_namespace() {
        let (merged, report) = merge(base_model(), vec![other_model()]);
        assert!(report.is_clean());
        assert_eq!(report.nr_merged, 1);
        assert_eq!(merged.objects.len(), 2);
        assert_eq!(merged.vertices.len(), 6);

        let mut leaves = Vec::new();
        merged.objects["Y"].geometry[0]
            .boundaries()
            .unwrap()
            .for_each_leaf(&mut |vtx| leaves.push(vtx));
        assert_eq!(leaves, vec![3, 4, 5]);

        // Base had no appearance or templates, so every offset is zero.
        let appearance = merged.appearance.as_ref().unwrap();
        assert_eq!(appearance.materials.len(), 1);
        let mut indices = Vec::new();
        merged.objects["Y"].geometry[0].material["default"]
            .for_each_index(&mut |idx| indices.push(idx));
        assert_eq!(indices, vec![Some(0)]);
        match merged.objects["Y"].geometry[1].kind {
            GeometryKind::Instance { template, anchor } => {
                assert_eq!(template, 0);
                assert_eq!(anchor, 3);
            }
            _ => panic!("expected an instance"),
        }
    }

    #[test]
    fn test_merge_twice_offsets_appearance() {
        let (merged_once, _) = merge(base_model(), vec![other_model()]);
        let mut second = other_model();
        // Same content under a fresh id to avoid the collision path.
        let co = second.objects.remove("Y").unwrap();
        second.objects.insert("Z".to_string(), co);
        let (merged, report) = merge(merged_once, vec![second]);
        assert!(report.is_clean());

        let appearance = merged.appearance.as_ref().unwrap();
        assert_eq!(appearance.materials.len(), 2);
        assert_eq!(appearance.vertices_texture.len(), 6);
        let mut indices = Vec::new();
        merged.objects["Z"].geometry[0].material["default"]
            .for_each_index(&mut |idx| indices.push(idx));
        assert_eq!(indices, vec![Some(1)]);
        let mut tex_vertices = Vec::new();
        merged.objects["Z"].geometry[0].texture["default"]
            .for_each_texture_vertex(&mut |idx| tex_vertices.push(idx));
        assert_eq!(tex_vertices, vec![Some(3), Some(4), Some(5)]);
        let templates = merged.templates.as_ref().unwrap();
        assert_eq!(templates.templates.len(), 2);
        assert_eq!(templates.vertices_templates.len(), 2);
        match merged.objects["Z"].geometry[1].kind {
            GeometryKind::Instance { template, .. } => assert_eq!(template, 1),
            _ => panic!("expected an instance"),
        }
    }

    #[test]
    fn test_merge_collision_keeps_base() {
        let mut other = base_model();
        // Same id "X", different geometry.
        other.objects.get_mut("X").unwrap().geometry.clear();
        let (merged, report) = merge(base_model(), vec![other]);
        assert_eq!(report.collisions, vec!["X".to_string()]);
        assert_eq!(report.nr_merged, 0);
        // Base's X is unchanged and the other's arrays were not appended.
        assert_eq!(merged.objects["X"].geometry.len(), 1);
        assert_eq!(merged.vertices.len(), 3);
    }

    #[test]
    fn test_merge_decompresses_inputs() {
        let mut base = base_model();
        base.compress(3).unwrap();
        let mut other = other_model();
        other.compress(3).unwrap();
        let (merged, _) = merge(base, vec![other]);
        assert!(merged.vertices.transform().is_none());
        let v = merged.vertices.real_coords(3).unwrap();
        assert!((v[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_with_empty_subset_of_self_changes_nothing() {
        let cm = base_model();
        // An inverted subset of everything is an empty selection result.
        let empty = subset(
            &cm,
            &Selection::Ids(vec!["X".to_string()]),
            true,
        )
        .unwrap();
        assert!(empty.objects.is_empty());
        let (merged, report) = merge(base_model(), vec![empty]);
        assert_eq!(report.nr_merged, 0);
        assert_eq!(merged.objects, cm.objects);
        assert_eq!(merged.vertices, cm.vertices);
    }

    #[test]
    fn test_merge_conservation_roundtrip() {
        // Merge disjoint models, extract the base's ids back out: identical
        // content up to vertex relabeling (here even the labels survive
        // because the base's vertices come first).
        let (merged, _) = merge(base_model(), vec![other_model()]);
        let back = subset(&merged, &Selection::Ids(vec!["X".to_string()]), false).unwrap();
        let original = base_model();
        assert_eq!(back.objects, original.objects);
        assert_eq!(back.vertices, original.vertices);
    }
}
