//! Streaming reader for Potree 2.0 point clouds.
//!
//! The octree hierarchy is read chunk by chunk from `hierarchy.bin` as nodes
//! are requested, and point data is fetched from `octree.bin` with byte-range
//! reads, then decoded on a pool of worker threads.

pub mod config;
pub mod decode;
pub mod hierarchy;
pub mod metadata;
pub mod octree;
pub mod point_cloud;
pub mod prelude;
pub mod resource;

pub use config::{PotreeConfig, WorkerPolicy};
pub use metadata::{AttributeMetadata, Metadata};
pub use point_cloud::PotreePointCloud;
