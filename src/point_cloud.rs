use crate::config::PotreeConfig;
use crate::decode::{ConfigurationError, DecodeError, DecodePool, DecodeRequest, DecodedPoints, Encoding};
use crate::hierarchy::{parse_hierarchy, HierarchyFormatError};
use crate::metadata::Metadata;
use crate::octree::loader::InFlight;
use crate::octree::node::{LoadState, NodeType, OctreeNode};
use crate::octree::point_attributes::{PointAttributes, SchemaError};
use crate::octree::snapshot::OctreeNodeSnapshot;
use crate::octree::{FlatOctree, NodeId};
use crate::resource::{ResourceError, ResourceLoader};
use futures::FutureExt;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum LoadPotreePointCloudError {
    #[error("Error loading metadatas: {0}")]
    LoadMetadataError(ResourceError),

    #[error("Invalid attribute schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Error loading hierarchy: {0}")]
    ReadHierarchyError(#[from] ReadHierarchyError),
}

#[derive(Error, Debug, Clone)]
pub enum ReadHierarchyError {
    #[error("Node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("Resource error: {0}")]
    Resource(Arc<ResourceError>),

    #[error("Invalid hierarchy chunk: {0}")]
    Format(#[from] HierarchyFormatError),
}

impl From<ResourceError> for ReadHierarchyError {
    fn from(error: ResourceError) -> Self {
        Self::Resource(Arc::new(error))
    }
}

#[derive(Error, Debug, Clone)]
pub enum LoadPointsError {
    #[error("Node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("Error loading hierarchy: {0}")]
    Hierarchy(#[from] ReadHierarchyError),

    #[error("Resource error: {0}")]
    Resource(Arc<ResourceError>),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl From<ResourceError> for LoadPointsError {
    fn from(error: ResourceError) -> Self {
        Self::Resource(Arc::new(error))
    }
}

/// What a running load needs, shared with the futures it spawns.
#[derive(Clone, Debug)]
struct NodeSource {
    octree: Arc<RwLock<FlatOctree<OctreeNode>>>,
    resource_loader: ResourceLoader,
    hierarchy_url: String,
    octree_url: String,
    attributes: Arc<PointAttributes>,
    encoding: Encoding,
    pool: Arc<DecodePool>,
    metadata: Arc<Metadata>,
    strict_hierarchy: bool,
}

impl NodeSource {
    /// Fetches and applies the hierarchy chunk of a proxy node.
    #[instrument(level = "debug", skip(self))]
    async fn read_hierarchy(self, node_id: NodeId) -> Result<(), ReadHierarchyError> {
        let result = self.fetch_hierarchy(node_id).await;

        let octree = self.octree.read();
        if let Some(node) = octree.node(node_id) {
            match &result {
                Ok(()) => node.state.set(LoadState::HierarchyLoaded),
                Err(error) => {
                    warn!(name = %node.name, %error, "hierarchy load failed");
                    node.state.set(LoadState::Failed);
                }
            }
        }

        result
    }

    async fn fetch_hierarchy(&self, node_id: NodeId) -> Result<(), ReadHierarchyError> {
        let (offset, size) = {
            let octree = self.octree.read();
            let node = octree
                .node(node_id)
                .ok_or(ReadHierarchyError::NodeNotFound(node_id))?;
            (node.hierarchy_byte_offset, node.hierarchy_byte_size)
        };

        let data = if size == 0 {
            Vec::new()
        } else {
            self.resource_loader
                .get_range(&self.hierarchy_url, offset, size, None)
                .await?
        };

        let mut octree = self.octree.write();
        let created = parse_hierarchy(&mut octree, node_id, &data, self.strict_hierarchy)?;
        debug!(?node_id, created = created.len(), "loaded hierarchy chunk");

        Ok(())
    }

    /// Fetches the point data of a node and decodes it on the pool.
    #[instrument(level = "debug", skip(self))]
    async fn read_points(self, node_id: NodeId) -> Result<Arc<DecodedPoints>, LoadPointsError> {
        let result = self.fetch_points(node_id).await;

        let octree = self.octree.read();
        if let Some(node) = octree.node(node_id) {
            match &result {
                Ok(_) => node.state.set(LoadState::PointsLoaded),
                Err(error) => {
                    warn!(name = %node.name, %error, "points load failed");
                    node.state.set(LoadState::Failed);
                }
            }
        }

        result
    }

    async fn fetch_points(&self, node_id: NodeId) -> Result<Arc<DecodedPoints>, LoadPointsError> {
        let (offset, size, num_points, bounding_box) = {
            let octree = self.octree.read();
            let node = octree
                .node(node_id)
                .ok_or(LoadPointsError::NodeNotFound(node_id))?;
            (
                node.byte_offset,
                node.byte_size,
                node.num_points,
                node.bounding_box.clone(),
            )
        };

        let buffer = if size == 0 {
            Vec::new()
        } else {
            self.resource_loader
                .get_range(&self.octree_url, offset, size, None)
                .await?
        };

        let request = DecodeRequest {
            buffer,
            attributes: self.attributes.clone(),
            scale: self.metadata.scale(),
            offset: self.metadata.offset(),
            min: bounding_box.min,
            max: bounding_box.max,
            num_points,
        };
        let points = self.pool.decode(self.encoding, request).await?;
        debug!(?node_id, num_points, density = points.density, "decoded points");

        Ok(Arc::new(points))
    }
}

/// A Potree 2.0 point cloud whose hierarchy and points are loaded on demand.
///
/// Clones share the same octree, worker pool and running loads.
#[derive(Clone, Debug)]
pub struct PotreePointCloud {
    source: NodeSource,
    hierarchy_loads: Arc<InFlight<Result<(), ReadHierarchyError>>>,
    point_loads: Arc<InFlight<Result<Arc<DecodedPoints>, LoadPointsError>>>,
}

impl PotreePointCloud {
    /// Load a Potree point cloud from a URL.
    /// Relatives urls works only if the provided client supports it.
    /// Metadatas, hierarchy and octree are supposed to be accessible relatively to the provided url:
    ///  - Metadata: `<url>/<config.metadata_file>`
    ///  - Hierarchy: `<url>/hierarchy.bin`
    ///  - Octree: `<url>/octree.bin`
    pub async fn from_url(
        url: &str,
        resource_loader: ResourceLoader,
        config: PotreeConfig,
    ) -> Result<PotreePointCloud, LoadPotreePointCloudError> {
        let metadata_url = format!("{}/{}", url, config.metadata_file);
        let headers = (!config.headers.is_empty()).then(|| config.headers.clone());

        let metadata: Metadata = resource_loader
            .get_json(&metadata_url, headers)
            .await
            .map_err(LoadPotreePointCloudError::LoadMetadataError)?;

        Self::from_metadata(metadata, url, resource_loader, config).await
    }

    /// Builds the point cloud from an already parsed metadata document and
    /// loads the root hierarchy chunk.
    pub async fn from_metadata(
        metadata: Metadata,
        url: &str,
        resource_loader: ResourceLoader,
        config: PotreeConfig,
    ) -> Result<PotreePointCloud, LoadPotreePointCloudError> {
        let encoding: Encoding = metadata.encoding.parse()?;
        let attributes = PointAttributes::build(&metadata.attributes)?;

        let mut octree = FlatOctree::with_root(metadata.create_root_node());
        let root_id = octree.root_id();
        if let Some(root) = octree.node_mut(root_id) {
            root.id = Some(root_id);
        }

        let this = Self {
            source: NodeSource {
                octree: Arc::new(RwLock::new(octree)),
                resource_loader: resource_loader.with_headers(config.headers),
                hierarchy_url: format!("{}/hierarchy.bin", url),
                octree_url: format!("{}/octree.bin", url),
                attributes: Arc::new(attributes),
                encoding,
                pool: Arc::new(DecodePool::new(config.worker_policy)),
                metadata: Arc::new(metadata),
                strict_hierarchy: config.strict_hierarchy,
            },
            hierarchy_loads: Default::default(),
            point_loads: Default::default(),
        };

        this.load_octree(root_id).await?;
        debug!(url, %encoding, nodes = this.octree().len(), "opened point cloud");

        Ok(this)
    }

    /// Makes sure the children of `node_id` are known, fetching its
    /// hierarchy chunk if it is still a proxy. Concurrent calls for the same
    /// node share one fetch.
    pub async fn load_octree(&self, node_id: NodeId) -> Result<(), ReadHierarchyError> {
        let load = {
            let mut loads = self.hierarchy_loads.lock();
            match loads.join(node_id) {
                Some(load) => load,
                None => {
                    let octree = self.source.octree.read();
                    let node = octree
                        .node(node_id)
                        .ok_or(ReadHierarchyError::NodeNotFound(node_id))?;

                    let state = node.state.get();
                    if state.hierarchy_loaded() {
                        return Ok(());
                    }
                    if node.node_type != NodeType::Proxy {
                        // children are already materialized
                        let _ = node.state.transition(state, LoadState::HierarchyLoaded);
                        return Ok(());
                    }
                    if node
                        .state
                        .transition(state, LoadState::HierarchyLoading)
                        .is_err()
                    {
                        return Ok(());
                    }

                    loads.start(node_id, self.source.clone().read_hierarchy(node_id).boxed())
                }
            }
        };

        let result = load.clone().await;
        self.hierarchy_loads.finish(node_id, &load);
        result
    }

    /// Walks the whole tree and loads every hierarchy chunk, depth first.
    pub async fn load_entire_hierarchy(&self) -> Result<(), ReadHierarchyError> {
        let mut stack = vec![self.root_id()];

        while let Some(node_id) = stack.pop() {
            self.load_octree(node_id).await?;

            let octree = self.source.octree.read();
            if let Some(node) = octree.node(node_id) {
                stack.extend(node.child_ids().map(|(_, child)| child).rev());
            }
        }

        Ok(())
    }

    /// Loads the hierarchy of `node_id` if needed, then fetches and decodes
    /// its points. A call made while the same node is already loading joins
    /// that load.
    pub async fn load(&self, node_id: NodeId) -> Result<Arc<DecodedPoints>, LoadPointsError> {
        self.load_octree(node_id).await?;

        let load = {
            let mut loads = self.point_loads.lock();
            match loads.join(node_id) {
                Some(load) => load,
                None => {
                    let octree = self.source.octree.read();
                    let node = octree
                        .node(node_id)
                        .ok_or(LoadPointsError::NodeNotFound(node_id))?;

                    let state = node.state.get();
                    if node
                        .state
                        .transition(state, LoadState::PointsLoading)
                        .is_err()
                    {
                        warn!(name = %node.name, "node state changed while starting a load");
                    }

                    loads.start(node_id, self.source.clone().read_points(node_id).boxed())
                }
            }
        };

        let result = load.clone().await;
        self.point_loads.finish(node_id, &load);
        result
    }

    /// Takes a snapshot of the current loaded hierarchy and return it
    pub fn hierarchy_snapshot(&self) -> OctreeNodeSnapshot {
        let octree = self.source.octree.read();
        OctreeNodeSnapshot::capture(&octree, octree.root_id()).unwrap_or_default()
    }

    /// Fields of a single node, without its subtree.
    pub fn node_snapshot(&self, node_id: NodeId) -> Option<OctreeNodeSnapshot> {
        self.source
            .octree
            .read()
            .node(node_id)
            .map(OctreeNodeSnapshot::from)
    }

    pub fn root_id(&self) -> NodeId {
        self.source.octree.read().root_id()
    }

    pub fn children(&self, node_id: NodeId) -> Vec<NodeId> {
        self.source
            .octree
            .read()
            .node(node_id)
            .map(|node| node.child_ids().map(|(_, child)| child).collect())
            .unwrap_or_default()
    }

    pub fn load_state(&self, node_id: NodeId) -> Option<LoadState> {
        self.source
            .octree
            .read()
            .node(node_id)
            .map(|node| node.state.get())
    }

    /// Resolves a node path such as `"046"` among the loaded nodes.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let octree = self.source.octree.read();
        let mut node_id = octree.root_id();

        for digit in path.chars() {
            let index = digit.to_digit(8)? as usize;
            node_id = octree.node(node_id)?.children[index]?;
        }

        Some(node_id)
    }

    // Functions to access the octree
    pub fn octree(&self) -> RwLockReadGuard<'_, FlatOctree<OctreeNode>> {
        self.source.octree.read()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.source.metadata
    }

    pub fn attributes(&self) -> &PointAttributes {
        &self.source.attributes
    }

    pub fn encoding(&self) -> Encoding {
        self.source.encoding
    }

    pub fn pool(&self) -> &DecodePool {
        &self.source.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPolicy;
    use crate::decode::AttributeBuffer;
    use crate::hierarchy::{write_hierarchy, HierarchyNodeEntry, BYTES_PER_NODE};
    use crate::resource::memory::MemoryClient;
    use crate::resource::{Headers, ResourceClient};
    use async_trait::async_trait;
    use glam::Vec3;
    use tokio::sync::Notify;

    const URL: &str = "mem://cloud";
    const HIERARCHY: &str = "mem://cloud/hierarchy.bin";
    const OCTREE: &str = "mem://cloud/octree.bin";
    const STRIDE: i64 = 14;

    fn metadata_json(encoding: &str, first_chunk_size: usize) -> String {
        format!(
            r#"{{
                "version": "2.0",
                "hierarchy": {{ "firstChunkSize": {first_chunk_size}, "stepSize": 4, "depth": 4 }},
                "offset": [0, 0, 0],
                "scale": [0.01, 0.01, 0.01],
                "spacing": 1.0,
                "boundingBox": {{ "min": [0, 0, 0], "max": [8, 8, 8] }},
                "encoding": "{encoding}",
                "attributes": [
                    {{ "name": "position", "size": 12, "numElements": 3, "elementSize": 4,
                       "type": "int32", "min": [0, 0, 0], "max": [8, 8, 8] }},
                    {{ "name": "intensity", "size": 2, "numElements": 1, "elementSize": 2,
                       "type": "uint16", "min": [0], "max": [100] }}
                ]
            }}"#
        )
    }

    fn entry(r#type: u8, child_mask: u8, num_points: u32, byte_offset: i64, byte_size: i64) -> HierarchyNodeEntry {
        HierarchyNodeEntry {
            r#type,
            child_mask,
            num_points,
            byte_offset,
            byte_size,
        }
    }

    /// Root with children 0, 2 and 3. Child 2 is a proxy on a second chunk,
    /// child 3 reports points but no bytes.
    fn hierarchy() -> Vec<u8> {
        let first = [
            entry(0, 0b1101, 2, 0, 2 * STRIDE),
            entry(1, 0, 1, 2 * STRIDE, STRIDE),
            entry(2, 0, 0, 4 * BYTES_PER_NODE as i64, BYTES_PER_NODE as i64),
            entry(1, 0, 500, 0, 0),
        ];
        let second = [entry(1, 0, 3, 3 * STRIDE, 3 * STRIDE)];

        let mut data = write_hierarchy(&first).unwrap();
        data.extend(write_hierarchy(&second).unwrap());
        data
    }

    /// Six raw points: two for the root, one for child 0, three for child 2.
    fn octree_data() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..6i32 {
            for value in [100 * i, 200 + 100 * i, 50] {
                data.extend_from_slice(&value.to_le_bytes());
            }
            data.extend_from_slice(&(10 * i as u16).to_le_bytes());
        }
        data
    }

    fn client() -> MemoryClient {
        let client = MemoryClient::new();
        client.insert(format!("{URL}/metadata.json"), metadata_json("DEFAULT", 4 * BYTES_PER_NODE));
        client.insert(HIERARCHY, hierarchy());
        client.insert(OCTREE, octree_data());
        client
    }

    async fn open(client: impl ResourceClient + 'static) -> PotreePointCloud {
        PotreePointCloud::from_url(URL, ResourceLoader::new(client), PotreeConfig::default())
            .await
            .unwrap()
    }

    fn hierarchy_reads(client: &MemoryClient, first: u64) -> usize {
        client
            .requests()
            .iter()
            .filter(|request| request.url == HIERARCHY && request.range.is_some_and(|(start, _)| start == first))
            .count()
    }

    #[tokio::test]
    async fn opening_loads_the_root_chunk() {
        let client = client();
        let cloud = open(client.clone()).await;

        let root = cloud.node_snapshot(cloud.root_id()).unwrap();
        assert_eq!(root.node_type, NodeType::Normal);
        assert_eq!(root.child_mask, 0b1101);
        assert_eq!((root.num_points, root.byte_offset, root.byte_size), (2, 0, 28));
        assert_eq!(root.state, LoadState::HierarchyLoaded);
        assert_eq!(cloud.children(cloud.root_id()).len(), 3);

        let proxy = cloud.node_snapshot(cloud.find("2").unwrap()).unwrap();
        assert_eq!(proxy.node_type, NodeType::Proxy);
        assert_eq!(proxy.hierarchy_byte_offset, 88);
        assert_eq!(proxy.hierarchy_byte_size, 22);
        assert_eq!(proxy.state, LoadState::Unloaded);

        // byte size 0 wins over the point count
        let empty = cloud.node_snapshot(cloud.find("3").unwrap()).unwrap();
        assert_eq!(empty.num_points, 0);

        assert_eq!(hierarchy_reads(&client, 0), 1);
        assert_eq!(client.requests()[1].range, Some((0, 87)));
    }

    #[tokio::test]
    async fn find_and_snapshot() {
        let cloud = open(client()).await;

        assert_eq!(cloud.find(""), Some(cloud.root_id()));
        assert!(cloud.find("1").is_none());
        assert!(cloud.find("9").is_none());
        assert!(cloud.find("20").is_none());

        let snapshot = cloud.hierarchy_snapshot();
        let names: Vec<_> = snapshot.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, ["", "0", "2", "3"]);
        assert_eq!(snapshot.children[1].bounding_box.min, glam::DVec3::new(0.0, 4.0, 0.0));
    }

    /// Holds range reads of `url` starting at or after `from` until released.
    struct GatedClient {
        inner: MemoryClient,
        gate: Arc<Notify>,
        url: &'static str,
        from: u64,
    }

    #[async_trait]
    impl ResourceClient for GatedClient {
        async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
            self.inner.get(url, headers).await
        }

        async fn get_range(
            &self,
            url: &str,
            offset: u64,
            length: u64,
            headers: Option<Headers>,
        ) -> Result<Vec<u8>, ResourceError> {
            if url == self.url && offset >= self.from {
                self.gate.notified().await;
            }
            self.inner.get_range(url, offset, length, headers).await
        }
    }

    #[tokio::test]
    async fn concurrent_hierarchy_loads_fetch_once() {
        let client = client();
        let gate = Arc::new(Notify::new());
        let cloud = open(GatedClient {
            inner: client.clone(),
            gate: gate.clone(),
            url: HIERARCHY,
            from: 1,
        })
        .await;
        let proxy = cloud.find("2").unwrap();

        let (first, second, ()) = futures::join!(cloud.load_octree(proxy), cloud.load_octree(proxy), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });
        first.unwrap();
        second.unwrap();

        assert_eq!(hierarchy_reads(&client, 88), 1);
        assert_eq!(cloud.load_state(proxy), Some(LoadState::HierarchyLoaded));

        // already loaded
        cloud.load_octree(proxy).await.unwrap();
        assert_eq!(hierarchy_reads(&client, 88), 1);

        let node = cloud.node_snapshot(proxy).unwrap();
        assert_eq!(node.node_type, NodeType::Leaf);
        assert_eq!((node.num_points, node.byte_offset, node.byte_size), (3, 42, 42));
    }

    #[tokio::test]
    async fn failed_hierarchy_loads_can_be_retried() {
        let client = client();
        let data = hierarchy();
        client.insert(HIERARCHY, data[..4 * BYTES_PER_NODE].to_vec());
        let cloud = open(client.clone()).await;
        let proxy = cloud.find("2").unwrap();

        let error = cloud.load_octree(proxy).await.unwrap_err();
        assert!(matches!(error, ReadHierarchyError::Resource(_)));
        assert_eq!(cloud.load_state(proxy), Some(LoadState::Failed));
        assert!(cloud.children(proxy).is_empty());

        client.insert(HIERARCHY, data);
        cloud.load_octree(proxy).await.unwrap();
        assert_eq!(cloud.load_state(proxy), Some(LoadState::HierarchyLoaded));
        assert_eq!(hierarchy_reads(&client, 88), 2);
        assert_eq!(cloud.node_snapshot(proxy).unwrap().node_type, NodeType::Leaf);
    }

    #[tokio::test]
    async fn concurrent_point_loads_fetch_once() {
        let client = client();
        let gate = Arc::new(Notify::new());
        let cloud = open(GatedClient {
            inner: client.clone(),
            gate: gate.clone(),
            url: OCTREE,
            from: 0,
        })
        .await;
        let root_id = cloud.root_id();

        let (first, second, ()) = futures::join!(cloud.load(root_id), cloud.load(root_id), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.num_points, 2);
        assert_eq!(client.request_count(OCTREE), 1);
        assert_eq!(cloud.load_state(root_id), Some(LoadState::PointsLoaded));
        assert_eq!(cloud.pool().spawned_workers(Encoding::Raw), 1);
    }

    #[tokio::test]
    async fn load_decodes_points() {
        let client = client();
        let cloud = open(client.clone()).await;

        let root = cloud.load(cloud.root_id()).await.unwrap();
        assert_eq!(root.num_points, 2);
        let positions = root.positions().unwrap();
        assert!(positions[0].abs_diff_eq(Vec3::new(0.0, 2.0, 0.5), 1e-5));
        assert!(positions[1].abs_diff_eq(Vec3::new(1.0, 3.0, 0.5), 1e-5));
        let Some(AttributeBuffer::Scalar(intensity)) = root.get("intensity") else {
            panic!("missing intensity");
        };
        assert_eq!(intensity.precise, vec![0.0, 10.0]);
        assert_eq!(cloud.load_state(cloud.root_id()), Some(LoadState::PointsLoaded));

        // loads the second hierarchy chunk on the way
        let proxy = cloud.find("2").unwrap();
        let points = cloud.load(proxy).await.unwrap();
        assert_eq!(points.num_points, 3);
        // relative to the child box, which starts at y = 4
        assert!(points.positions().unwrap()[0].abs_diff_eq(Vec3::new(3.0, 1.0, 0.5), 1e-5));
        assert_eq!(cloud.load_state(proxy), Some(LoadState::PointsLoaded));
        assert_eq!(hierarchy_reads(&client, 88), 1);

        assert_eq!(cloud.pool().spawned_workers(Encoding::Raw), 1);
        assert_eq!(cloud.pool().idle_workers(Encoding::Raw), 1);
    }

    #[tokio::test]
    async fn zero_byte_nodes_skip_the_fetch() {
        let client = client();
        let cloud = open(client.clone()).await;
        let before = client.request_count(OCTREE);

        let points = cloud.load(cloud.find("3").unwrap()).await.unwrap();
        assert_eq!(points.num_points, 0);
        assert!(points.positions().unwrap().is_empty());
        assert_eq!(client.request_count(OCTREE), before);
    }

    #[tokio::test]
    async fn failed_loads_can_be_retried() {
        let client = client();
        let data = octree_data();
        client.insert(OCTREE, data[..20].to_vec());
        let cloud = open(client.clone()).await;
        let root_id = cloud.root_id();

        let error = cloud.load(root_id).await.unwrap_err();
        assert!(matches!(error, LoadPointsError::Resource(_)));
        assert_eq!(cloud.load_state(root_id), Some(LoadState::Failed));
        assert_eq!(cloud.pool().spawned_workers(Encoding::Raw), 0);

        client.insert(OCTREE, data);
        let points = cloud.load(root_id).await.unwrap();
        assert_eq!(points.num_points, 2);
        assert_eq!(cloud.load_state(root_id), Some(LoadState::PointsLoaded));
        // the hierarchy was not fetched again
        assert_eq!(hierarchy_reads(&client, 0), 1);
    }

    #[tokio::test]
    async fn entire_hierarchy() {
        let client = client();
        let cloud = open(client.clone()).await;

        cloud.load_entire_hierarchy().await.unwrap();

        let snapshot = cloud.hierarchy_snapshot();
        assert!(snapshot.iter().all(|node| node.state.hierarchy_loaded()));
        assert!(snapshot.iter().all(|node| node.node_type != NodeType::Proxy));
        assert_eq!(hierarchy_reads(&client, 88), 1);
    }

    /// Records the headers sent with every request.
    struct HeaderLog {
        inner: MemoryClient,
        seen: Arc<parking_lot::Mutex<Vec<(String, Headers)>>>,
    }

    #[async_trait]
    impl ResourceClient for HeaderLog {
        async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
            self.seen.lock().push((url.to_string(), headers.clone().unwrap_or_default()));
            self.inner.get(url, headers).await
        }

        async fn get_range(
            &self,
            url: &str,
            offset: u64,
            length: u64,
            headers: Option<Headers>,
        ) -> Result<Vec<u8>, ResourceError> {
            self.seen.lock().push((url.to_string(), headers.clone().unwrap_or_default()));
            self.inner.get_range(url, offset, length, headers).await
        }
    }

    #[tokio::test]
    async fn configured_headers_reach_every_request() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = HeaderLog {
            inner: client(),
            seen: seen.clone(),
        };
        let config = PotreeConfig {
            headers: Headers::from([("Authorization".to_string(), "Bearer token".to_string())]),
            ..Default::default()
        };

        let cloud = PotreePointCloud::from_url(URL, ResourceLoader::new(log), config)
            .await
            .unwrap();
        cloud.load(cloud.root_id()).await.unwrap();

        let seen = seen.lock();
        let urls: Vec<_> = seen.iter().map(|(url, _)| url.as_str()).collect();
        assert_eq!(urls, [format!("{URL}/metadata.json").as_str(), HIERARCHY, OCTREE]);
        for (_, headers) in seen.iter() {
            assert_eq!(headers["Authorization"], "Bearer token");
        }
        assert_eq!(seen[0].1.len(), 1);
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected() {
        let client = MemoryClient::new();
        client.insert(format!("{URL}/metadata.json"), metadata_json("LAZ", 22));
        let error = PotreePointCloud::from_url(URL, ResourceLoader::new(client.clone()), PotreeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(error, LoadPotreePointCloudError::Configuration(_)));

        let error = PotreePointCloud::from_url("mem://missing", ResourceLoader::new(client), PotreeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(error, LoadPotreePointCloudError::LoadMetadataError(_)));
    }

    #[tokio::test]
    async fn strict_hierarchy_rejects_undescribed_children() {
        let client = MemoryClient::new();
        client.insert(format!("{URL}/metadata.json"), metadata_json("DEFAULT", BYTES_PER_NODE));
        client.insert(HIERARCHY, write_hierarchy(&[entry(0, 0b101, 100, 10, 200)]).unwrap());

        let config = PotreeConfig {
            strict_hierarchy: true,
            worker_policy: WorkerPolicy::Bounded { max_workers: 2 },
            ..Default::default()
        };
        let error = PotreePointCloud::from_url(URL, ResourceLoader::new(client.clone()), config)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            LoadPotreePointCloudError::ReadHierarchyError(ReadHierarchyError::Format(
                HierarchyFormatError::UnconsumedNodes(2)
            ))
        ));

        // the lenient default keeps both children
        let cloud = open(client).await;
        assert_eq!(cloud.children(cloud.root_id()).len(), 2);
    }
}
