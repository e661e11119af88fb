use crate::octree::aabb::Aabb;
use crate::octree::NodeId;
use std::sync::atomic::{AtomicU8, Ordering};

/// Kind of a hierarchy record, as stored in its first byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeType {
    #[default]
    Normal = 0,
    Leaf = 1,
    /// Only the location of the next hierarchy chunk is known.
    Proxy = 2,
}

impl NodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Leaf),
            2 => Some(Self::Proxy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoadState {
    #[default]
    Unloaded = 0,
    HierarchyLoading = 1,
    HierarchyLoaded = 2,
    PointsLoading = 3,
    PointsLoaded = 4,
    Failed = 5,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::HierarchyLoading,
            2 => Self::HierarchyLoaded,
            3 => Self::PointsLoading,
            4 => Self::PointsLoaded,
            5 => Self::Failed,
            _ => Self::Unloaded,
        }
    }

    /// True once the subtree below this node is materialized.
    pub fn hierarchy_loaded(self) -> bool {
        matches!(
            self,
            Self::HierarchyLoaded | Self::PointsLoading | Self::PointsLoaded
        )
    }
}

/// Load state of a node, shared by every task that reads the arena.
#[derive(Debug, Default)]
pub struct AtomicLoadState(AtomicU8);

impl AtomicLoadState {
    pub fn get(&self) -> LoadState {
        LoadState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LoadState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `current` to `new`, returning the observed state on failure.
    pub fn transition(&self, current: LoadState, new: LoadState) -> Result<(), LoadState> {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(LoadState::from_u8)
    }
}

#[derive(Debug, Default)]
pub struct OctreeNode {
    pub id: Option<NodeId>,
    /// Path from the root, one octal digit per level. The root is the empty path.
    pub name: String,
    pub bounding_box: Aabb,
    pub spacing: f64,
    pub node_type: NodeType,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,
    pub hierarchy_byte_offset: u64,
    pub hierarchy_byte_size: u64,
    pub parent: Option<NodeId>,
    pub children: [Option<NodeId>; 8],
    pub state: AtomicLoadState,
}

impl OctreeNode {
    pub fn level(&self) -> u32 {
        depth(&self.name)
    }

    pub fn child_name(&self, index: usize) -> String {
        child_name(&self.name, index)
    }

    pub fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    /// Existing children with their octant index.
    pub fn child_ids(&self) -> impl DoubleEndedIterator<Item = (usize, NodeId)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(index, child)| child.map(|id| (index, id)))
    }
}

pub fn depth(name: &str) -> u32 {
    name.len() as u32
}

pub fn child_name(parent: &str, index: usize) -> String {
    debug_assert!(index < 8);
    format!("{parent}{index}")
}
