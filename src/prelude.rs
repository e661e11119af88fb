pub use crate::config::{PotreeConfig, WorkerPolicy};
pub use crate::decode::{AttributeBuffer, DecodedPoints, Encoding};
pub use crate::octree::node::{LoadState, NodeType};
pub use crate::octree::snapshot::OctreeNodeSnapshot;
pub use crate::octree::NodeId;
pub use crate::point_cloud::PotreePointCloud;
pub use crate::resource::{ResourceClient, ResourceLoader};

// Error types
pub use crate::decode::{ConfigurationError, DecodeError};
pub use crate::hierarchy::HierarchyFormatError;
pub use crate::octree::point_attributes::SchemaError;
pub use crate::point_cloud::LoadPointsError;
pub use crate::point_cloud::LoadPotreePointCloudError;
pub use crate::point_cloud::ReadHierarchyError;
pub use crate::resource::ResourceError;
