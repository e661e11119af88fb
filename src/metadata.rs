use crate::octree::aabb::Aabb;
use crate::octree::node::{NodeType, OctreeNode};
use glam::DVec3;
use serde::Deserialize;

/// Content of a Potree 2.0 `metadata.json`.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub projection: String,
    pub hierarchy: HierarchyMetadata,
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    pub spacing: f64,
    pub bounding_box: BoundingBox,
    pub encoding: String,
    pub attributes: Vec<AttributeMetadata>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyMetadata {
    pub first_chunk_size: u64,
    pub step_size: u16,
    pub depth: u16,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// One attribute descriptor. The type stays textual until the schema is built.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size: u16,
    pub num_elements: u16,
    #[serde(default)]
    pub element_size: u16,
    pub r#type: String,
    #[serde(default)]
    pub min: Vec<f64>,
    #[serde(default)]
    pub max: Vec<f64>,
}

impl Metadata {
    pub fn scale(&self) -> DVec3 {
        DVec3::from_array(self.scale)
    }

    pub fn offset(&self) -> DVec3 {
        DVec3::from_array(self.offset)
    }

    /// Root of the octree: a proxy pointing at the first hierarchy chunk.
    pub(crate) fn create_root_node(&self) -> OctreeNode {
        OctreeNode {
            name: String::new(),
            bounding_box: self.bounding_box.clone().into(),
            spacing: self.spacing,
            node_type: NodeType::Proxy,
            hierarchy_byte_offset: 0,
            hierarchy_byte_size: self.hierarchy.first_chunk_size,
            ..Default::default()
        }
    }
}

impl From<BoundingBox> for Aabb {
    fn from(bounding_box: BoundingBox) -> Self {
        Aabb::new(bounding_box.min.into(), bounding_box.max.into())
    }
}
