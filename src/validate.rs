//! Structural validation of a model's index integrity.
//!
//! Every check walks references and bounds; nothing geometric (planarity,
//! winding, watertightness) is judged here. Broken references are errors,
//! redundancy (duplicate or orphaned vertices, features without geometry)
//! is reported as warnings. Validation never mutates the model and never
//! panics on malformed input, a broken model is precisely its input domain.

use std::collections::HashSet;
use std::fmt;

use log::debug;

use crate::geometry::GeometryKind;
use crate::model::Model;
use crate::vertices::VertexPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding, tied to a feature when one is responsible.
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub feature: Option<String>,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.feature {
            Some(id) => write!(f, "{}: feature {}: {}", tag, id, self.message),
            None => write!(f, "{}: {}", tag, self.message),
        }
    }
}

/// All findings of one validation pass, in feature order.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// No errors; warnings do not invalidate a model.
    pub fn is_valid(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|finding| finding.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Warning)
    }

    fn error(&mut self, feature: Option<&str>, message: String) {
        self.findings.push(Finding {
            severity: Severity::Error,
            feature: feature.map(str::to_string),
            message,
        });
    }

    fn warning(&mut self, feature: Option<&str>, message: String) {
        self.findings.push(Finding {
            severity: Severity::Warning,
            feature: feature.map(str::to_string),
            message,
        });
    }
}

/// Validate the structural integrity of a model: index bounds in every
/// namespace, parent/child symmetry, group membership, semantics shape.
pub fn validate(cm: &Model) -> ValidationReport {
    let mut report = ValidationReport::default();
    let nr_vertices = cm.vertices.len();
    let nr_templates = cm.templates.as_ref().map_or(0, |t| t.templates.len());
    let nr_materials = cm.appearance.as_ref().map_or(0, |a| a.materials.len());
    let nr_textures = cm.appearance.as_ref().map_or(0, |a| a.textures.len());
    let nr_tex_vertices = cm
        .appearance
        .as_ref()
        .map_or(0, |a| a.vertices_texture.len());

    let mut used: Vec<bool> = vec![false; nr_vertices];

    for (id, co) in cm.objects.iter() {
        let id = id.as_str();
        // Parent/child links must be symmetric.
        for child_id in co.children.iter() {
            match cm.objects.get(child_id) {
                None => report.error(Some(id), format!("child {} does not exist", child_id)),
                Some(child) if !child.parents.iter().any(|p| p == id) => report.error(
                    Some(id),
                    format!("child {} does not list it as a parent", child_id),
                ),
                Some(_) => {}
            }
        }
        for parent_id in co.parents.iter() {
            match cm.objects.get(parent_id) {
                None => report.error(Some(id), format!("parent {} does not exist", parent_id)),
                Some(parent) if !parent.children.iter().any(|c| c == id) => report.error(
                    Some(id),
                    format!("parent {} does not list it as a child", parent_id),
                ),
                Some(_) => {}
            }
        }
        for member_id in co.members.iter() {
            if !cm.objects.contains_key(member_id) {
                report.error(Some(id), format!("group member {} does not exist", member_id));
            }
        }

        if co.geometry.is_empty() && !co.is_group() {
            report.warning(Some(id), "feature has no geometry".to_string());
        }

        for (gi, geom) in co.geometry.iter().enumerate() {
            geom.for_each_vertex(&mut |vtx| {
                if vtx < nr_vertices {
                    used[vtx] = true;
                } else {
                    report.error(
                        Some(id),
                        format!(
                            "geometry {} references vertex {} of a pool of {}",
                            gi, vtx, nr_vertices
                        ),
                    );
                }
            });
            if let GeometryKind::Instance { template, .. } = &geom.kind {
                if *template >= nr_templates {
                    report.error(
                        Some(id),
                        format!(
                            "geometry {} references template {} of a library of {}",
                            gi, template, nr_templates
                        ),
                    );
                }
            }

            if let (Some(semantics), Some(boundaries)) = (&geom.semantics, geom.boundaries()) {
                if !semantics.values.matches_boundaries(boundaries) {
                    report.error(
                        Some(id),
                        format!(
                            "geometry {}: semantics values do not mirror the {} boundary shape",
                            gi,
                            boundaries.type_name()
                        ),
                    );
                }
                let nr_surfaces = semantics.surfaces.len();
                if let Some(max) = semantics.values.max_value() {
                    if max >= nr_surfaces {
                        report.error(
                            Some(id),
                            format!(
                                "geometry {}: semantics value {} of {} surfaces",
                                gi, max, nr_surfaces
                            ),
                        );
                    }
                }
                for (si, srf) in semantics.surfaces.iter().enumerate() {
                    if let Some(parent) = srf.parent {
                        if parent >= nr_surfaces {
                            report.error(
                                Some(id),
                                format!(
                                    "geometry {}: surface {} has parent {} of {} surfaces",
                                    gi, si, parent, nr_surfaces
                                ),
                            );
                        }
                    }
                    for child in srf.children.iter() {
                        if *child >= nr_surfaces {
                            report.error(
                                Some(id),
                                format!(
                                    "geometry {}: surface {} has child {} of {} surfaces",
                                    gi, si, child, nr_surfaces
                                ),
                            );
                        }
                    }
                }
            }

            for (theme, mat_ref) in geom.material.iter() {
                mat_ref.for_each_index(&mut |idx| {
                    if let Some(idx) = idx {
                        if idx >= nr_materials {
                            report.error(
                                Some(id),
                                format!(
                                    "geometry {} theme {}: material {} of {}",
                                    gi, theme, idx, nr_materials
                                ),
                            );
                        }
                    }
                });
            }
            for (theme, tex_ref) in geom.texture.iter() {
                tex_ref.for_each_texture(&mut |idx| {
                    if let Some(idx) = idx {
                        if idx >= nr_textures {
                            report.error(
                                Some(id),
                                format!(
                                    "geometry {} theme {}: texture {} of {}",
                                    gi, theme, idx, nr_textures
                                ),
                            );
                        }
                    }
                });
                tex_ref.for_each_texture_vertex(&mut |idx| {
                    if let Some(idx) = idx {
                        if idx >= nr_tex_vertices {
                            report.error(
                                Some(id),
                                format!(
                                    "geometry {} theme {}: texture vertex {} of {}",
                                    gi, theme, idx, nr_tex_vertices
                                ),
                            );
                        }
                    }
                });
            }
        }
    }

    // Template boundaries index the library's own pool.
    if let Some(templates) = &cm.templates {
        let nr_template_vertices = templates.vertices_templates.len();
        for (ti, template) in templates.templates.iter().enumerate() {
            if let Some(boundaries) = template.boundaries() {
                boundaries.for_each_leaf(&mut |vtx| {
                    if vtx >= nr_template_vertices {
                        report.error(
                            None,
                            format!(
                                "template {} references vertex {} of a pool of {}",
                                ti, vtx, nr_template_vertices
                            ),
                        );
                    }
                });
            }
        }
    }

    let nr_orphans = used.iter().filter(|u| !**u).count();
    if nr_orphans > 0 {
        report.warning(None, format!("{} vertices are not referenced", nr_orphans));
    }
    let duplicates = duplicate_vertices(&cm.vertices);
    if !duplicates.is_empty() {
        let listed: Vec<String> = duplicates
            .iter()
            .take(MAX_LISTED_DUPLICATES)
            .map(|idx| idx.to_string())
            .collect();
        let mut message = format!(
            "{} duplicate vertices, at indices {}",
            duplicates.len(),
            listed.join(", ")
        );
        if duplicates.len() > MAX_LISTED_DUPLICATES {
            message.push_str(&format!(
                " and {} more",
                duplicates.len() - MAX_LISTED_DUPLICATES
            ));
        }
        report.warning(None, message);
    }

    debug!(
        "validated {} features: {} errors, {} warnings",
        cm.objects.len(),
        report.errors().count(),
        report.warnings().count()
    );
    report
}

/// Only this many duplicate indices are spelled out in the warning; the
/// rest is a remainder count.
const MAX_LISTED_DUPLICATES: usize = 10;

/// Indices of the repeated occurrences of exact-representation duplicates,
/// the same canonical keys deduplication merges on.
fn duplicate_vertices(pool: &VertexPool) -> Vec<usize> {
    match pool {
        VertexPool::Real(v) => {
            let mut seen: HashSet<[u64; 3]> = HashSet::with_capacity(v.len());
            v.iter()
                .enumerate()
                .filter(|(_, [x, y, z])| !seen.insert([x.to_bits(), y.to_bits(), z.to_bits()]))
                .map(|(idx, _)| idx)
                .collect()
        }
        VertexPool::Quantized { vertices, .. } => {
            let mut seen: HashSet<[i64; 3]> = HashSet::with_capacity(vertices.len());
            vertices
                .iter()
                .enumerate()
                .filter(|(_, v)| !seen.insert(**v))
                .map(|(idx, _)| idx)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::model_from_json;

    #[test]
    fn test_clean_model_is_valid() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "children": ["a-part"], "geometry": [
                    {"type": "MultiPoint", "lod": "1", "boundaries": [0]}
                ]},
                "a-part": {"type": "BuildingPart", "parents": ["a"], "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2]]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]]
        }"#,
        );
        let report = validate(&cm);
        assert!(report.is_valid(), "{:?}", report.findings);
        assert_eq!(report.warnings().count(), 0);
    }

    #[test]
    fn test_vertex_out_of_bounds() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 7]]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]]
        }"#,
        );
        let report = validate(&cm);
        assert!(!report.is_valid());
        let errors: Vec<&Finding> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("vertex 7"));
        assert_eq!(errors[0].feature.as_deref(), Some("a"));
    }

    #[test]
    fn test_asymmetric_parent_child() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "children": ["a-part", "ghost"], "geometry": [
                    {"type": "MultiPoint", "lod": "1", "boundaries": [0]}
                ]},
                "a-part": {"type": "BuildingPart", "geometry": [
                    {"type": "MultiPoint", "lod": "1", "boundaries": [1]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0]]
        }"#,
        );
        let report = validate(&cm);
        let messages: Vec<&str> = report.errors().map(|f| f.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.contains("ghost does not exist")));
        assert!(messages
            .iter()
            .any(|m| m.contains("a-part does not list it as a parent")));
    }

    #[test]
    fn test_group_member_missing() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "g": {"type": "CityObjectGroup", "members": ["nope"]}
            },
            "vertices": []
        }"#,
        );
        let report = validate(&cm);
        assert!(!report.is_valid());
        assert!(report.errors().next().unwrap().message.contains("nope"));
    }

    #[test]
    fn test_semantics_shape_and_bounds() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1",
                     "boundaries": [[[0, 1, 2]], [[0, 2, 1]]],
                     "semantics": {
                        "surfaces": [{"type": "RoofSurface"}],
                        "values": [0, 5, null]
                     }}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]]
        }"#,
        );
        let report = validate(&cm);
        let messages: Vec<&str> = report.errors().map(|f| f.message.as_str()).collect();
        // Three values over two faces, and value 5 over one surface.
        assert!(messages.iter().any(|m| m.contains("do not mirror")));
        assert!(messages.iter().any(|m| m.contains("value 5 of 1 surfaces")));
    }

    #[test]
    fn test_appearance_and_template_bounds() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2]]],
                     "material": {"default": {"value": 3}},
                     "texture": {"default": {"values": [[[2, 0, 1, 9]]]}}},
                    {"type": "GeometryInstance", "template": 4, "boundaries": [0]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]],
            "geometry-templates": {
                "templates": [{"type": "MultiPoint", "lod": "1", "boundaries": [5]}],
                "vertices-templates": [[0.0, 0.0, 0.0]]
            },
            "appearance": {
                "materials": [{"name": "brick"}],
                "textures": [{"image": "wall.png"}],
                "vertices-texture": [[0.0,0.0], [1.0,0.0], [1.0,1.0]]
            }
        }"#,
        );
        let report = validate(&cm);
        let messages: Vec<&str> = report.errors().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("material 3 of 1")));
        assert!(messages.iter().any(|m| m.contains("texture 2 of 1")));
        assert!(messages.iter().any(|m| m.contains("texture vertex 9 of 3")));
        assert!(messages.iter().any(|m| m.contains("template 4 of a library of 1")));
        assert!(messages
            .iter()
            .any(|m| m.contains("template 0 references vertex 5")));
    }

    #[test]
    fn test_redundancy_warnings() {
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "geometry": [
                    {"type": "MultiPoint", "lod": "1", "boundaries": [0]}
                ]},
                "empty": {"type": "Road"}
            },
            "vertices": [[0.0,0.0,0.0], [0.0,0.0,0.0], [1.0,0.0,0.0]]
        }"#,
        );
        let report = validate(&cm);
        assert!(report.is_valid());
        let messages: Vec<&str> = report.warnings().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("no geometry")));
        assert!(messages.iter().any(|m| m.contains("2 vertices are not referenced")));
        // The repeated occurrence is named by index.
        assert!(messages
            .iter()
            .any(|m| m.contains("1 duplicate vertices, at indices 1")));
    }

    #[test]
    fn test_duplicate_listing_is_capped() {
        // 13 copies of the same vertex: 12 duplicates, 10 listed.
        let vertices: Vec<String> = (0..13).map(|_| "[0.0,0.0,0.0]".to_string()).collect();
        let cm = model_from_json(&format!(
            r#"{{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {{
                "a": {{"type": "Building", "geometry": [
                    {{"type": "MultiPoint", "lod": "1", "boundaries": [0]}}
                ]}}
            }},
            "vertices": [{}]
        }}"#,
            vertices.join(", ")
        ));
        let report = validate(&cm);
        let duplicates = report
            .warnings()
            .find(|f| f.message.contains("duplicate"))
            .unwrap();
        assert!(duplicates
            .message
            .contains("12 duplicate vertices, at indices 1, 2, 3, 4, 5, 6, 7, 8, 9, 10"));
        assert!(duplicates.message.ends_with("and 2 more"));
    }

    #[test]
    fn test_parent_without_geometry_warns() {
        // A parent that carries no geometry of its own still gets the
        // warning; only groups are exempt.
        let cm = model_from_json(
            r#"{
            "type": "CityJSON",
            "version": "1.1",
            "CityObjects": {
                "a": {"type": "Building", "children": ["a-part"]},
                "a-part": {"type": "BuildingPart", "parents": ["a"], "geometry": [
                    {"type": "MultiSurface", "lod": "1", "boundaries": [[[0, 1, 2]]]}
                ]}
            },
            "vertices": [[0.0,0.0,0.0], [1.0,0.0,0.0], [0.0,1.0,0.0]]
        }"#,
        );
        let report = validate(&cm);
        assert!(report.is_valid());
        let warnings: Vec<&Finding> = report.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].feature.as_deref(), Some("a"));
        assert!(warnings[0].message.contains("no geometry"));
    }
}
