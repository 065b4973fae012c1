//! Extract a subset of features into a new, self-consistent model.
//!
//! Selection picks an initial id set, the set is closed under group-member
//! and parent/child rules, and a reindexing pass then rebuilds every index
//! namespace (vertices, templates and their vertex pool, materials, textures
//! and texture vertices) from scratch for only the surviving features. The
//! source model is read-only throughout; the result owns all of its arrays.

use std::collections::{BTreeSet, HashMap};

use log::{info, warn};

use crate::appearance::Appearance;
use crate::error::CjError;
use crate::geometry::GeometryKind;
use crate::model::{CityObjectType, Model};
use crate::templates::GeometryTemplates;
use crate::vertices::VertexPool;

/// The mutually exclusive selection strategies.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Explicit feature ids.
    Ids(Vec<String>),
    /// 2D bounding box `[minx, miny, maxx, maxy)`, half-open: a feature is
    /// selected when its centroid falls inside.
    Bbox([f64; 4]),
    /// Feature types, expanded with their Part/Installation subtypes.
    Types(Vec<CityObjectType>),
    /// A fixed-size random sample over the features without a parent. The
    /// seed makes repeated runs reproducible.
    Random { count: usize, seed: u64 },
    /// Features whose centroid lies within `radius` of `center`.
    Radius { center: [f64; 2], radius: f64 },
}

/// First-seen-order mapping from old indices to a compacted namespace.
#[derive(Debug, Default)]
struct Reindexer {
    new_of_old: HashMap<usize, usize>,
    /// Old indices in first-visit order; position is the new index.
    order: Vec<usize>,
}

impl Reindexer {
    fn insert(&mut self, old: usize) -> usize {
        match self.new_of_old.get(&old) {
            Some(new) => *new,
            None => {
                let new = self.order.len();
                self.new_of_old.insert(old, new);
                self.order.push(old);
                new
            }
        }
    }

    fn get(&self, old: usize) -> Option<usize> {
        self.new_of_old.get(&old).copied()
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Extract the features matched by `selection` (complemented against all ids
/// when `exclude` is set) into a new model with freshly reindexed arrays.
pub fn subset(cm: &Model, selection: &Selection, exclude: bool) -> Result<Model, CjError> {
    let mut selected = initial_selection(cm, selection)?;
    if exclude {
        selected = cm
            .objects
            .keys()
            .filter(|id| !selected.contains(*id))
            .cloned()
            .collect();
    }
    close_selection(cm, &mut selected);
    info!(
        "selected {} of {} features",
        selected.len(),
        cm.objects.len()
    );
    Ok(reindex(cm, &selected))
}

fn initial_selection(cm: &Model, selection: &Selection) -> Result<BTreeSet<String>, CjError> {
    let mut selected: BTreeSet<String> = BTreeSet::new();
    match selection {
        Selection::Ids(ids) => {
            if ids.is_empty() {
                return Err(CjError::EmptySelection);
            }
            for id in ids {
                if cm.objects.contains_key(id) {
                    selected.insert(id.clone());
                } else {
                    warn!("feature {} is not in the model", id);
                }
            }
        }
        Selection::Bbox([minx, miny, maxx, maxy]) => {
            for id in cm.objects.keys() {
                if let Some([cx, cy]) = cm.feature_centroid(id) {
                    if *minx <= cx && cx < *maxx && *miny <= cy && cy < *maxy {
                        selected.insert(id.clone());
                    }
                }
            }
        }
        Selection::Types(cotypes) => {
            if cotypes.is_empty() {
                return Err(CjError::EmptySelection);
            }
            let mut wanted: Vec<CityObjectType> = cotypes.clone();
            for cotype in cotypes {
                wanted.extend(cotype.expansion());
            }
            for (id, co) in cm.objects.iter() {
                if wanted.contains(&co.cotype) {
                    selected.insert(id.clone());
                }
            }
        }
        Selection::Random { count, seed } => {
            if *count == 0 {
                return Err(CjError::EmptySelection);
            }
            // Features that already have a parent are excluded from the
            // candidates so the sample does not pick orphaned children.
            let mut candidates: Vec<&String> = cm
                .objects
                .iter()
                .filter(|(_, co)| co.parents.is_empty())
                .map(|(id, _)| id)
                .collect();
            let mut state = *seed;
            // Partial Fisher-Yates over the lexicographically ordered
            // candidates, deterministic for a fixed seed.
            let nr_sampled = (*count).min(candidates.len());
            for i in 0..nr_sampled {
                let j = i + (splitmix64(&mut state) as usize) % (candidates.len() - i);
                candidates.swap(i, j);
            }
            for id in candidates.into_iter().take(nr_sampled) {
                selected.insert(id.clone());
            }
        }
        Selection::Radius { center, radius } => {
            for id in cm.objects.keys() {
                if let Some([cx, cy]) = cm.feature_centroid(id) {
                    let dist = ((cx - center[0]).powi(2) + (cy - center[1]).powi(2)).sqrt();
                    if dist <= *radius {
                        selected.insert(id.clone());
                    }
                }
            }
        }
    }
    Ok(selected)
}

/// Close the id set under group membership and the parent/child rules:
/// members of a selected group come along, so do all descendants, and a
/// selected child carries its structural parent. The reverse does not hold,
/// a pulled-in parent never drags its other children along; subsets stay
/// minimal.
fn close_selection(cm: &Model, selected: &mut BTreeSet<String>) {
    // Groups of groups expand until the set stops growing.
    loop {
        let mut added: Vec<String> = Vec::new();
        for id in selected.iter() {
            if let Some(co) = cm.objects.get(id) {
                if co.is_group() {
                    for member in co.members.iter() {
                        if !selected.contains(member) && cm.objects.contains_key(member) {
                            added.push(member.clone());
                        }
                    }
                }
            }
        }
        if added.is_empty() {
            break;
        }
        selected.extend(added);
    }
    // All descendants of the selected features.
    let mut stack: Vec<String> = selected.iter().cloned().collect();
    while let Some(id) = stack.pop() {
        if let Some(co) = cm.objects.get(&id) {
            for child in co.children.iter() {
                if selected.insert(child.clone()) {
                    stack.push(child.clone());
                }
            }
        }
    }
    // The parent chain of every selected feature, added last so that a
    // parent pulled in here is never re-expanded into its descendants.
    let mut stack: Vec<String> = selected.iter().cloned().collect();
    while let Some(id) = stack.pop() {
        if let Some(co) = cm.objects.get(&id) {
            for parent in co.parents.iter() {
                if cm.objects.contains_key(parent) && selected.insert(parent.clone()) {
                    stack.push(parent.clone());
                }
            }
        }
    }
}

/// Copy the selected features and rebuild every index namespace for them.
/// All remaps start from offset 0 and are independent of each other.
fn reindex(cm: &Model, selected: &BTreeSet<String>) -> Model {
    let mut out = Model::new(&cm.version);
    out.metadata = cm.metadata.clone();
    for id in selected.iter() {
        if let Some(co) = cm.objects.get(id) {
            out.objects.insert(id.clone(), co.clone());
        }
    }

    // Vertices, in first-visit order over the kept features.
    let mut vertex_map = Reindexer::default();
    for co in out.objects.values() {
        for geom in co.geometry.iter() {
            geom.for_each_vertex(&mut |vtx| {
                vertex_map.insert(vtx);
            });
        }
    }
    out.vertices = match &cm.vertices {
        VertexPool::Real(v) => VertexPool::Real(
            vertex_map
                .order
                .iter()
                .filter_map(|old| v.get(*old).copied())
                .collect(),
        ),
        VertexPool::Quantized {
            vertices,
            transform,
        } => VertexPool::Quantized {
            vertices: vertex_map
                .order
                .iter()
                .filter_map(|old| vertices.get(*old).copied())
                .collect(),
            transform: transform.clone(),
        },
    };
    out.map_all_vertex_refs(&mut |vtx| vertex_map.get(vtx).unwrap_or(vtx));

    // Geometry templates referenced by the kept instances, plus their own
    // vertex pool.
    if let Some(templates) = &cm.templates {
        let mut template_map = Reindexer::default();
        for co in out.objects.values() {
            for geom in co.geometry.iter() {
                if let GeometryKind::Instance { template, .. } = &geom.kind {
                    template_map.insert(*template);
                }
            }
        }
        if !template_map.order.is_empty() {
            let mut kept = GeometryTemplates {
                templates: template_map
                    .order
                    .iter()
                    .filter_map(|old| templates.templates.get(*old).cloned())
                    .collect(),
                vertices_templates: Vec::new(),
            };
            let mut tvertex_map = Reindexer::default();
            for template in kept.templates.iter_mut() {
                if let Some(b) = template.boundaries_mut() {
                    b.map_leaves(&mut |vtx| tvertex_map.insert(vtx));
                }
            }
            kept.vertices_templates = tvertex_map
                .order
                .iter()
                .filter_map(|old| templates.vertices_templates.get(*old).copied())
                .collect();
            for co in out.objects.values_mut() {
                for geom in co.geometry.iter_mut() {
                    if let GeometryKind::Instance { template, .. } = &mut geom.kind {
                        *template = template_map.get(*template).unwrap_or(*template);
                    }
                }
            }
            out.templates = Some(kept);
        }
    }

    // Materials, textures and texture vertices, each its own namespace.
    if let Some(appearance) = &cm.appearance {
        let mut material_map = Reindexer::default();
        let mut texture_map = Reindexer::default();
        let mut tex_vertex_map = Reindexer::default();
        for co in out.objects.values_mut() {
            for geom in co.geometry.iter_mut() {
                for mat_ref in geom.material.values_mut() {
                    mat_ref.map_indices(&mut |idx| material_map.insert(idx));
                }
                for tex_ref in geom.texture.values_mut() {
                    tex_ref.map_textures(&mut |idx| texture_map.insert(idx));
                    tex_ref.map_texture_vertices(&mut |idx| tex_vertex_map.insert(idx));
                }
            }
        }
        let kept = Appearance {
            materials: material_map
                .order
                .iter()
                .filter_map(|old| appearance.materials.get(*old).cloned())
                .collect(),
            textures: texture_map
                .order
                .iter()
                .filter_map(|old| appearance.textures.get(*old).cloned())
                .collect(),
            vertices_texture: tex_vertex_map
                .order
                .iter()
                .filter_map(|old| appearance.vertices_texture.get(*old).copied())
                .collect(),
            default_theme_material: appearance.default_theme_material.clone(),
            default_theme_texture: appearance.default_theme_texture.clone(),
        };
        if !kept.is_empty() {
            out.appearance = Some(kept);
        }
    }

    out.update_extent();
    out
}
