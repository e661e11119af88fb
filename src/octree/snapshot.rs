use crate::octree::aabb::Aabb;
use crate::octree::node::{LoadState, NodeType, OctreeNode};
use crate::octree::{FlatOctree, NodeId};

/// Owned copy of a node and, optionally, of the subtree below it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OctreeNodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub bounding_box: Aabb,
    pub spacing: f64,
    pub level: u32,
    pub node_type: NodeType,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,
    pub hierarchy_byte_offset: u64,
    pub hierarchy_byte_size: u64,
    pub state: LoadState,
    pub children: Vec<OctreeNodeSnapshot>,
}

impl From<&OctreeNode> for OctreeNodeSnapshot {
    fn from(node: &OctreeNode) -> Self {
        Self {
            id: node.id.unwrap_or_default(),
            name: node.name.clone(),
            bounding_box: node.bounding_box.clone(),
            spacing: node.spacing,
            level: node.level(),
            node_type: node.node_type,
            child_mask: node.child_mask,
            num_points: node.num_points,
            byte_offset: node.byte_offset,
            byte_size: node.byte_size,
            hierarchy_byte_offset: node.hierarchy_byte_offset,
            hierarchy_byte_size: node.hierarchy_byte_size,
            state: node.state.get(),
            children: Vec::new(),
        }
    }
}

impl OctreeNodeSnapshot {
    /// Copies `node_id` and every node below it, children in octant order.
    pub fn capture(octree: &FlatOctree<OctreeNode>, node_id: NodeId) -> Option<Self> {
        let node = octree.node(node_id)?;
        let mut snapshot = Self::from(node);
        snapshot.children = node
            .child_ids()
            .filter_map(|(_, child)| Self::capture(octree, child))
            .collect();
        Some(snapshot)
    }

    /// Pre-order traversal, starting with this node.
    pub fn iter(&self) -> SnapshotIter<'_> {
        SnapshotIter { stack: vec![self] }
    }
}

pub struct SnapshotIter<'a> {
    stack: Vec<&'a OctreeNodeSnapshot>,
}

impl<'a> Iterator for SnapshotIter<'a> {
    type Item = &'a OctreeNodeSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::aabb::create_child_aabb;
    use glam::DVec3;

    fn add_child(octree: &mut FlatOctree<OctreeNode>, parent_id: NodeId, index: usize) -> NodeId {
        let parent = octree.node(parent_id).unwrap();
        let child = OctreeNode {
            name: parent.child_name(index),
            bounding_box: create_child_aabb(&parent.bounding_box, index),
            spacing: parent.spacing / 2.0,
            parent: Some(parent_id),
            ..Default::default()
        };
        let child_id = octree.insert(child);
        octree.node_mut(child_id).unwrap().id = Some(child_id);
        octree.node_mut(parent_id).unwrap().children[index] = Some(child_id);
        child_id
    }

    #[test]
    fn captures_the_subtree_in_pre_order() {
        let mut octree = FlatOctree::with_root(OctreeNode {
            bounding_box: Aabb::new(DVec3::ZERO, DVec3::splat(8.0)),
            spacing: 1.0,
            ..Default::default()
        });
        let root_id = octree.root_id();
        octree.node_mut(root_id).unwrap().id = Some(root_id);

        let four = add_child(&mut octree, root_id, 4);
        let one = add_child(&mut octree, root_id, 1);
        add_child(&mut octree, four, 7);
        octree.node(one).unwrap().state.set(LoadState::HierarchyLoaded);

        let snapshot = OctreeNodeSnapshot::capture(&octree, root_id).unwrap();
        let names: Vec<_> = snapshot.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, ["", "1", "4", "47"]);
        assert_eq!(snapshot.iter().count(), 4);

        let one = &snapshot.children[0];
        assert_eq!(one.level, 1);
        assert_eq!(one.spacing, 0.5);
        assert_eq!(one.state, LoadState::HierarchyLoaded);
        assert_eq!(snapshot.children[1].children[0].level, 2);
    }
}
