//! Materials and textures of a model.
//!
//! Material and texture entries are opaque records in flat arrays;
//! geometries reference them per theme, either with a single whole-geometry
//! `value` or with a `values` array shaped like the boundary's face-level
//! nesting. Texture values additionally index a separate 2D vertex pool for
//! the texture coordinates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CjError;
use crate::geometry::{NestedIdx, SlicePolicy};

/// An opaque material record ("name", "diffuseColor", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Material(pub Value);

/// An opaque texture record ("image", "wrapMode", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Texture(pub Value);

/// Reference from a geometry to the material array, per theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialRef {
    /// One material for the whole geometry.
    Value { value: usize },
    /// One (optional) material per face, shaped like the face-level nesting.
    Values { values: NestedIdx },
}

impl MaterialRef {
    pub fn for_each_index(&self, f: &mut dyn FnMut(Option<usize>)) {
        match self {
            MaterialRef::Value { value } => f(Some(*value)),
            MaterialRef::Values { values } => values.for_each_leaf(SlicePolicy::All, f),
        }
    }

    pub fn map_indices(&mut self, f: &mut dyn FnMut(usize) -> usize) {
        match self {
            MaterialRef::Value { value } => *value = f(*value),
            MaterialRef::Values { values } => values.map_leaves(SlicePolicy::All, f),
        }
    }
}

/// Reference from a geometry to the texture array and the texture-vertex
/// pool. The innermost arrays interleave a texture index at position 0 with
/// texture-vertex indices at positions >= 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureRef {
    pub values: NestedIdx,
}

impl TextureRef {
    pub fn for_each_texture(&self, f: &mut dyn FnMut(Option<usize>)) {
        self.values.for_each_leaf(SlicePolicy::FirstOnly, f)
    }

    pub fn for_each_texture_vertex(&self, f: &mut dyn FnMut(Option<usize>)) {
        self.values.for_each_leaf(SlicePolicy::SkipFirst, f)
    }

    pub fn map_textures(&mut self, f: &mut dyn FnMut(usize) -> usize) {
        self.values.map_leaves(SlicePolicy::FirstOnly, f)
    }

    pub fn map_texture_vertices(&mut self, f: &mut dyn FnMut(usize) -> usize) {
        self.values.map_leaves(SlicePolicy::SkipFirst, f)
    }
}

/// The appearance member of a model: the material and texture arrays plus
/// the 2D vertex pool for texture coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<Texture>,
    #[serde(
        rename = "vertices-texture",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub vertices_texture: Vec<[f64; 2]>,
    #[serde(
        rename = "default-theme-material",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_theme_material: Option<String>,
    #[serde(
        rename = "default-theme-texture",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_theme_texture: Option<String>,
}

impl Appearance {
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty() && self.textures.is_empty()
    }

    /// Rewrite the directory part of every texture's `image` member.
    /// Fails when there are no textures to update.
    pub fn update_texture_location(&mut self, new_location: &str) -> Result<(), CjError> {
        if self.textures.is_empty() {
            return Err(CjError::NoTextures);
        }
        for texture in self.textures.iter_mut() {
            if let Some(image) = texture.0.get_mut("image") {
                if let Some(path) = image.as_str() {
                    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
                    *image = Value::String(format!(
                        "{}/{}",
                        new_location.trim_end_matches('/'),
                        file_name
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json};

    #[test]
    fn test_material_ref_forms() {
        let whole: MaterialRef = from_str(r#"{"value": 0}"#).unwrap();
        let mut seen = Vec::new();
        whole.for_each_index(&mut |idx| seen.push(idx));
        assert_eq!(seen, vec![Some(0)]);

        let mut per_face: MaterialRef = from_str(r#"{"values": [0, null, 1]}"#).unwrap();
        per_face.map_indices(&mut |idx| idx + 3);
        let expected: MaterialRef = from_str(r#"{"values": [3, null, 4]}"#).unwrap();
        assert_eq!(per_face, expected);
    }

    #[test]
    fn test_texture_ref_slices() {
        let mut tex: TextureRef = from_str(r#"{"values": [[[0, 10, 11, 12]]]}"#).unwrap();
        let mut textures = Vec::new();
        tex.for_each_texture(&mut |idx| textures.push(idx));
        assert_eq!(textures, vec![Some(0)]);
        tex.map_texture_vertices(&mut |idx| idx - 10);
        let expected: TextureRef = from_str(r#"{"values": [[[0, 0, 1, 2]]]}"#).unwrap();
        assert_eq!(tex, expected);
    }

    #[test]
    fn test_update_texture_location() {
        let mut appearance = Appearance {
            textures: vec![Texture(json!({"type": "PNG", "image": "old/dir/wall.png"}))],
            ..Default::default()
        };
        appearance.update_texture_location("https://example.com/tex").unwrap();
        assert_eq!(
            appearance.textures[0].0["image"],
            "https://example.com/tex/wall.png"
        );

        let mut empty = Appearance::default();
        assert!(matches!(
            empty.update_texture_location("x"),
            Err(CjError::NoTextures)
        ));
    }
}
