pub mod aabb;
pub mod loader;
pub mod node;
pub mod point_attributes;
pub mod snapshot;

use slab::Slab;

/// Stable handle of a node inside a [`FlatOctree`].
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Arena of octree nodes. Nodes reference each other by [`NodeId`] and are
/// never removed individually.
#[derive(Debug)]
pub struct FlatOctree<T> {
    storage: Slab<T>,
    root_id: NodeId,
}

impl<T> FlatOctree<T> {
    pub fn with_root(root: T) -> Self {
        let mut storage = Slab::new();
        let root_id = NodeId(storage.insert(root));

        Self { storage, root_id }
    }

    pub fn root(&self) -> &T {
        self.storage
            .get(self.root_id.0)
            .expect("root node not found - invariant broken")
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn node(&self, node_id: NodeId) -> Option<&T> {
        self.storage.get(node_id.0)
    }

    pub(crate) fn node_mut(&mut self, node_id: NodeId) -> Option<&mut T> {
        self.storage.get_mut(node_id.0)
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.storage.reserve(additional);
    }

    pub(crate) fn insert(&mut self, node: T) -> NodeId {
        NodeId(self.storage.insert(node))
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl<T: Default> Default for FlatOctree<T> {
    fn default() -> Self {
        Self::with_root(T::default())
    }
}
