//! The city model: features, their geometries and the shared arrays they
//! index into.
//!
//! The persisted form is a [CityJSON object](https://www.cityjson.org/specs/1.1.3/#cityjson-object)
//! shaped document with the members `type`, `version`, `CityObjects`,
//! `vertices` and the optional `transform`, `metadata`,
//! `geometry-templates` and `appearance`. Features are stored in a B-tree
//! map so that every whole-model pass runs in one fixed, documented order,
//! lexicographic by feature id.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::appearance::Appearance;
use crate::error::CjError;
use crate::geometry::Geometry;
use crate::templates::GeometryTemplates;
use crate::vertices::{Transform, VertexPool};

/// The fixed vocabulary of feature types.
///
/// Tags are parsed once, case-insensitively, at model construction; no raw
/// string comparison happens downstream. Unknown `+`-prefixed tags are
/// extension types and keep their name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CityObjectType {
    Bridge,
    BridgePart,
    BridgeInstallation,
    BridgeConstructiveElement,
    BridgeRoom,
    BridgeFurniture,
    Building,
    BuildingPart,
    BuildingInstallation,
    BuildingConstructiveElement,
    BuildingFurniture,
    BuildingStorey,
    BuildingRoom,
    BuildingUnit,
    CityFurniture,
    CityObjectGroup,
    LandUse,
    OtherConstruction,
    PlantCover,
    SolitaryVegetationObject,
    TINRelief,
    WaterBody,
    Road,
    Railway,
    Waterway,
    TransportSquare,
    GenericCityObject,
    Extension(String),
}

impl CityObjectType {
    pub fn name(&self) -> &str {
        match self {
            CityObjectType::Bridge => "Bridge",
            CityObjectType::BridgePart => "BridgePart",
            CityObjectType::BridgeInstallation => "BridgeInstallation",
            CityObjectType::BridgeConstructiveElement => "BridgeConstructiveElement",
            CityObjectType::BridgeRoom => "BridgeRoom",
            CityObjectType::BridgeFurniture => "BridgeFurniture",
            CityObjectType::Building => "Building",
            CityObjectType::BuildingPart => "BuildingPart",
            CityObjectType::BuildingInstallation => "BuildingInstallation",
            CityObjectType::BuildingConstructiveElement => "BuildingConstructiveElement",
            CityObjectType::BuildingFurniture => "BuildingFurniture",
            CityObjectType::BuildingStorey => "BuildingStorey",
            CityObjectType::BuildingRoom => "BuildingRoom",
            CityObjectType::BuildingUnit => "BuildingUnit",
            CityObjectType::CityFurniture => "CityFurniture",
            CityObjectType::CityObjectGroup => "CityObjectGroup",
            CityObjectType::LandUse => "LandUse",
            CityObjectType::OtherConstruction => "OtherConstruction",
            CityObjectType::PlantCover => "PlantCover",
            CityObjectType::SolitaryVegetationObject => "SolitaryVegetationObject",
            CityObjectType::TINRelief => "TINRelief",
            CityObjectType::WaterBody => "WaterBody",
            CityObjectType::Road => "Road",
            CityObjectType::Railway => "Railway",
            CityObjectType::Waterway => "Waterway",
            CityObjectType::TransportSquare => "TransportSquare",
            CityObjectType::GenericCityObject => "+GenericCityObject",
            CityObjectType::Extension(name) => name,
        }
    }

    /// The Part/Installation/ConstructionElement subtypes a parent type
    /// expands to when subsetting by type.
    pub fn expansion(&self) -> Vec<CityObjectType> {
        match self {
            CityObjectType::Building => vec![
                CityObjectType::BuildingPart,
                CityObjectType::BuildingInstallation,
                CityObjectType::BuildingConstructiveElement,
                CityObjectType::BuildingFurniture,
                CityObjectType::BuildingStorey,
                CityObjectType::BuildingRoom,
                CityObjectType::BuildingUnit,
            ],
            CityObjectType::Bridge => vec![
                CityObjectType::BridgePart,
                CityObjectType::BridgeInstallation,
                CityObjectType::BridgeConstructiveElement,
                CityObjectType::BridgeRoom,
                CityObjectType::BridgeFurniture,
            ],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for CityObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CityObjectType {
    type Err = CjError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let cotype = match tag.to_lowercase().as_str() {
            "bridge" => CityObjectType::Bridge,
            "bridgepart" => CityObjectType::BridgePart,
            "bridgeinstallation" => CityObjectType::BridgeInstallation,
            "bridgeconstructiveelement" => CityObjectType::BridgeConstructiveElement,
            "bridgeroom" => CityObjectType::BridgeRoom,
            "bridgefurniture" => CityObjectType::BridgeFurniture,
            "building" => CityObjectType::Building,
            "buildingpart" => CityObjectType::BuildingPart,
            "buildinginstallation" => CityObjectType::BuildingInstallation,
            "buildingconstructiveelement" => CityObjectType::BuildingConstructiveElement,
            "buildingfurniture" => CityObjectType::BuildingFurniture,
            "buildingstorey" => CityObjectType::BuildingStorey,
            "buildingroom" => CityObjectType::BuildingRoom,
            "buildingunit" => CityObjectType::BuildingUnit,
            "cityfurniture" => CityObjectType::CityFurniture,
            "cityobjectgroup" => CityObjectType::CityObjectGroup,
            "landuse" => CityObjectType::LandUse,
            "otherconstruction" => CityObjectType::OtherConstruction,
            "plantcover" => CityObjectType::PlantCover,
            "solitaryvegetationobject" => CityObjectType::SolitaryVegetationObject,
            "tinrelief" => CityObjectType::TINRelief,
            "waterbody" => CityObjectType::WaterBody,
            "road" => CityObjectType::Road,
            "railway" => CityObjectType::Railway,
            "waterway" => CityObjectType::Waterway,
            "transportsquare" => CityObjectType::TransportSquare,
            "genericcityobject" | "+genericcityobject" => CityObjectType::GenericCityObject,
            _ if tag.starts_with('+') => CityObjectType::Extension(tag.to_string()),
            _ => return Err(CjError::UnknownCityObjectType(tag.to_string())),
        };
        Ok(cotype)
    }
}

impl TryFrom<String> for CityObjectType {
    type Error = CjError;
    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<CityObjectType> for String {
    fn from(cotype: CityObjectType) -> Self {
        cotype.name().to_string()
    }
}

/// A single feature of the model, a CityObject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityObject {
    #[serde(rename = "type")]
    pub cotype: CityObjectType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geometry: Vec<Geometry>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    /// Only meaningful on a CityObjectGroup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

impl CityObject {
    pub fn new(cotype: CityObjectType) -> Self {
        CityObject {
            cotype,
            geometry: Vec::new(),
            attributes: serde_json::Map::new(),
            children: Vec::new(),
            parents: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.cotype == CityObjectType::CityObjectGroup
    }
}

/// A complete city model. Owns its vertex pool, features, appearance tables
/// and template library; no array is ever shared by reference with another
/// model instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelDoc", into = "ModelDoc")]
pub struct Model {
    pub version: String,
    pub objects: BTreeMap<String, CityObject>,
    pub vertices: VertexPool,
    pub metadata: Option<Value>,
    pub templates: Option<GeometryTemplates>,
    pub appearance: Option<Appearance>,
}

impl Model {
    pub fn new(version: &str) -> Self {
        Model {
            version: version.to_string(),
            objects: BTreeMap::new(),
            vertices: VertexPool::default(),
            metadata: None,
            templates: None,
            appearance: None,
        }
    }

    /// The real-world bounding box of the vertex pool, or None for an empty
    /// pool.
    pub fn bbox(&self) -> Option<[f64; 6]> {
        let [mut x_min, mut y_min, mut z_min] = self.vertices.real_coords(0)?;
        let [mut x_max, mut y_max, mut z_max] = [x_min, y_min, z_min];
        for idx in 1..self.vertices.len() {
            let [x, y, z] = self
                .vertices
                .real_coords(idx)
                .expect("index is within the pool");
            if x < x_min {
                x_min = x
            } else if x > x_max {
                x_max = x
            }
            if y < y_min {
                y_min = y
            } else if y > y_max {
                y_max = y
            }
            if z < z_min {
                z_min = z
            } else if z > z_max {
                z_max = z
            }
        }
        Some([x_min, y_min, z_min, x_max, y_max, z_max])
    }

    /// Recompute the `geographicalExtent` member of the metadata from the
    /// current vertex pool. The extent is always derived, never copied from
    /// a source model.
    pub fn update_extent(&mut self) {
        let Some(bbox) = self.bbox() else {
            if let Some(Value::Object(meta)) = &mut self.metadata {
                meta.remove("geographicalExtent");
            }
            return;
        };
        let extent = serde_json::json!(bbox);
        match &mut self.metadata {
            Some(Value::Object(meta)) => {
                meta.insert("geographicalExtent".to_string(), extent);
            }
            _ => {
                self.metadata = Some(serde_json::json!({ "geographicalExtent": extent }));
            }
        }
    }

    /// The 2D centroid of a feature, the average over the distinct vertices
    /// its geometries reference, in first-visit order. None when the feature
    /// has no geometry or references nothing.
    pub fn feature_centroid(&self, id: &str) -> Option<[f64; 2]> {
        let co = self.objects.get(id)?;
        let mut seen: Vec<bool> = vec![false; self.vertices.len()];
        let mut x_sum = 0.0_f64;
        let mut y_sum = 0.0_f64;
        let mut nr_used = 0_usize;
        for geom in co.geometry.iter() {
            geom.for_each_vertex(&mut |vtx| {
                if vtx < seen.len() && !seen[vtx] {
                    seen[vtx] = true;
                    let [x, y, _z] = self
                        .vertices
                        .real_coords(vtx)
                        .expect("index is within the pool");
                    x_sum += x;
                    y_sum += y;
                    nr_used += 1;
                }
            });
        }
        if nr_used == 0 {
            return None;
        }
        Some([x_sum / nr_used as f64, y_sum / nr_used as f64])
    }

    /// Number of features per type, keyed by the canonical type name.
    pub fn feature_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for co in self.objects.values() {
            *counts.entry(co.cotype.name().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Keep only the geometries whose level-of-detail label equals `lod`,
    /// then compact the vertex pool. Features are kept even when all their
    /// geometries are dropped.
    pub fn filter_lod(&mut self, lod: &str) {
        let mut nr_dropped = 0_usize;
        for co in self.objects.values_mut() {
            let before = co.geometry.len();
            co.geometry.retain(|geom| geom.lod.as_deref() == Some(lod));
            nr_dropped += before - co.geometry.len();
        }
        info!("dropped {} geometries with lod != {}", nr_dropped, lod);
        self.remove_orphans();
        self.update_extent();
    }
}

/// The document form of a [Model].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelDoc {
    #[serde(rename = "type")]
    doc_type: String,
    version: String,
    #[serde(rename = "CityObjects")]
    city_objects: BTreeMap<String, CityObject>,
    vertices: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<Transform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(rename = "geometry-templates", skip_serializing_if = "Option::is_none")]
    geometry_templates: Option<GeometryTemplates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    appearance: Option<Appearance>,
}

impl TryFrom<ModelDoc> for Model {
    type Error = CjError;

    fn try_from(doc: ModelDoc) -> Result<Self, Self::Error> {
        if doc.doc_type != "CityJSON" {
            return Err(CjError::InvalidDocument(format!(
                "expected type CityJSON, got {}",
                doc.doc_type
            )));
        }
        // With an active transform the vertices must be integers; without
        // one they are floating point.
        let vertices = match doc.transform {
            Some(transform) => {
                let vertices: Vec<[i64; 3]> = serde_json::from_value(doc.vertices)
                    .map_err(|e| CjError::InvalidDocument(format!("quantized vertices: {}", e)))?;
                VertexPool::Quantized {
                    vertices,
                    transform,
                }
            }
            None => {
                let vertices: Vec<[f64; 3]> = serde_json::from_value(doc.vertices)
                    .map_err(|e| CjError::InvalidDocument(format!("vertices: {}", e)))?;
                VertexPool::Real(vertices)
            }
        };
        Ok(Model {
            version: doc.version,
            objects: doc.city_objects,
            vertices,
            metadata: doc.metadata,
            templates: doc.geometry_templates,
            appearance: doc.appearance,
        })
    }
}

impl From<Model> for ModelDoc {
    fn from(cm: Model) -> Self {
        let (vertices, transform) = match cm.vertices {
            VertexPool::Real(v) => (serde_json::json!(v), None),
            VertexPool::Quantized {
                vertices,
                transform,
            } => (serde_json::json!(vertices), Some(transform)),
        };
        ModelDoc {
            doc_type: "CityJSON".to_string(),
            version: cm.version,
            city_objects: cm.objects,
            vertices,
            transform,
            metadata: cm.metadata,
            geometry_templates: cm.templates,
            appearance: cm.appearance,
        }
    }
}
