use crate::octree::aabb::create_child_aabb;
use crate::octree::node::{NodeType, OctreeNode};
use crate::octree::{FlatOctree, NodeId};
use binrw::{binrw, BinReaderExt};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

pub const BYTES_PER_NODE: usize = 22;

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct HierarchyNodeEntry {
    pub r#type: u8,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: i64,
    pub byte_size: i64,
}

#[derive(Error, Debug, Clone)]
pub enum HierarchyFormatError {
    #[error("Hierarchy chunk of {0} bytes is not a multiple of {BYTES_PER_NODE}")]
    InvalidLength(usize),

    #[error("Node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("Record {0} has no node left to describe")]
    QueueExhausted(usize),

    #[error("{0} nodes were announced but never described")]
    UnconsumedNodes(usize),

    #[error("Record {record} has unknown node type {value}")]
    UnknownNodeType { record: usize, value: u8 },

    #[error("Record {0} has a negative byte offset or size")]
    NegativeRange(usize),

    #[error("Invalid binary data: {0}")]
    InvalidBinaryData(Arc<binrw::Error>),
}

impl From<binrw::Error> for HierarchyFormatError {
    fn from(error: binrw::Error) -> Self {
        Self::InvalidBinaryData(Arc::new(error))
    }
}

/// A record whose fields passed validation.
struct Record {
    node_type: NodeType,
    child_mask: u8,
    num_points: u32,
    byte_offset: u64,
    byte_size: u64,
}

fn read_records(buf: &[u8]) -> Result<Vec<Record>, HierarchyFormatError> {
    if buf.len() % BYTES_PER_NODE != 0 {
        return Err(HierarchyFormatError::InvalidLength(buf.len()));
    }

    let num_nodes = buf.len() / BYTES_PER_NODE;
    let mut cursor = Cursor::new(buf);
    let mut records = Vec::with_capacity(num_nodes);

    for index in 0..num_nodes {
        let entry: HierarchyNodeEntry = cursor.read_le()?;

        let node_type = NodeType::from_u8(entry.r#type).ok_or(
            HierarchyFormatError::UnknownNodeType {
                record: index,
                value: entry.r#type,
            },
        )?;
        let (Ok(byte_offset), Ok(byte_size)) = (
            u64::try_from(entry.byte_offset),
            u64::try_from(entry.byte_size),
        ) else {
            return Err(HierarchyFormatError::NegativeRange(index));
        };

        records.push(Record {
            node_type,
            child_mask: entry.child_mask,
            num_points: entry.num_points,
            byte_offset,
            byte_size,
        });
    }

    Ok(records)
}

/// Replays the breadth-first assignment without touching the tree, so a
/// malformed chunk is rejected before any node is modified.
fn check_queue(records: &[Record], strict: bool) -> Result<(), HierarchyFormatError> {
    let mut pending = 1usize;

    for (index, record) in records.iter().enumerate() {
        if pending == 0 {
            return Err(HierarchyFormatError::QueueExhausted(index));
        }
        pending -= 1;

        if record.node_type != NodeType::Proxy {
            pending += record.child_mask.count_ones() as usize;
        }
    }

    if strict && pending > 0 {
        return Err(HierarchyFormatError::UnconsumedNodes(pending));
    }

    Ok(())
}

/// Applies a hierarchy chunk to the subtree rooted at `node_id`.
///
/// Records are assigned to nodes in breadth-first order starting with
/// `node_id`; every non-proxy record materializes the children set in its
/// mask. Returns the ids of the nodes created.
pub fn parse_hierarchy(
    octree: &mut FlatOctree<OctreeNode>,
    node_id: NodeId,
    buf: &[u8],
    strict: bool,
) -> Result<Vec<NodeId>, HierarchyFormatError> {
    let records = read_records(buf)?;

    if octree.node(node_id).is_none() {
        return Err(HierarchyFormatError::NodeNotFound(node_id));
    }

    if records.is_empty() {
        return Ok(Vec::new());
    }

    check_queue(&records, strict)?;

    let num_children: usize = records
        .iter()
        .filter(|record| record.node_type != NodeType::Proxy)
        .map(|record| record.child_mask.count_ones() as usize)
        .sum();
    octree.reserve(num_children);

    let mut created = Vec::with_capacity(num_children);
    let mut queue = VecDeque::with_capacity(num_children + 1);
    queue.push_back(node_id);

    for record in &records {
        let Some(current_id) = queue.pop_front() else {
            // checked by check_queue
            break;
        };
        let Some(current) = octree.node_mut(current_id) else {
            return Err(HierarchyFormatError::NodeNotFound(current_id));
        };

        if current.node_type == NodeType::Proxy {
            // the proxy is replaced by the node it stood for
            current.byte_offset = record.byte_offset;
            current.byte_size = record.byte_size;
        } else if record.node_type == NodeType::Proxy {
            current.hierarchy_byte_offset = record.byte_offset;
            current.hierarchy_byte_size = record.byte_size;
        } else {
            current.byte_offset = record.byte_offset;
            current.byte_size = record.byte_size;
        }
        current.num_points = record.num_points;

        if current.byte_size == 0 {
            // workaround for issue https://github.com/potree/potree/issues/1125
            // some inner nodes erroneously report >0 points even though have 0 points
            // however, they still report a ByteSize of 0, so based on that we now set node.NumPoints to 0
            current.num_points = 0;
        }

        current.node_type = record.node_type;
        current.child_mask = record.child_mask;

        if current.node_type == NodeType::Proxy {
            continue;
        }

        let parent_name = current.name.clone();
        let parent_box = current.bounding_box.clone();
        let parent_spacing = current.spacing;

        for child_index in 0..8 {
            let child_exists = ((1 << child_index) & record.child_mask) != 0;
            if !child_exists {
                continue;
            }

            let child_id = octree.insert(OctreeNode {
                name: format!("{}{}", parent_name, child_index),
                bounding_box: create_child_aabb(&parent_box, child_index),
                spacing: parent_spacing / 2.0,
                parent: Some(current_id),
                ..Default::default()
            });

            if let Some(child) = octree.node_mut(child_id) {
                child.id = Some(child_id);
            }
            if let Some(parent) = octree.node_mut(current_id) {
                parent.children[child_index] = Some(child_id);
            }

            created.push(child_id);
            queue.push_back(child_id);
        }
    }

    trace!(
        records = records.len(),
        created = created.len(),
        unconsumed = queue.len(),
        "parsed hierarchy chunk"
    );

    Ok(created)
}

/// Serializes records in the layout read by [`parse_hierarchy`].
pub fn write_hierarchy(entries: &[HierarchyNodeEntry]) -> binrw::BinResult<Vec<u8>> {
    use binrw::BinWriterExt;

    let mut cursor = Cursor::new(Vec::with_capacity(entries.len() * BYTES_PER_NODE));
    for entry in entries {
        cursor.write_le(entry)?;
    }
    Ok(cursor.into_inner())
}
