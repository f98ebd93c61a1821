//! Fixed-capacity tree tables
//!
//! A [`TreeTable`] holds exactly one tree as a flat array of slots. The root
//! is always slot 0 and the children of a split always occupy two adjacent
//! slots, so a single index locates both. Capacity is fixed at creation.

use crate::errors::{DtreeError, Result};
use crate::node::{NodeId, NodeRecord, NodeSlot};
use serde::{Deserialize, Serialize};

/// One tree stored as a fixed-size array of node slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<NodeRecord>", try_from = "Vec<NodeRecord>")]
pub struct TreeTable {
    slots: Vec<NodeSlot>,
}

impl TreeTable {
    /// Create a table for `capacity` nodes.
    ///
    /// Slot 0 starts reserved for the root; every other slot starts free.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(DtreeError::InvalidArgument(
                "tree table needs at least one node".to_string(),
            ));
        }

        let mut slots = vec![NodeSlot::Free; capacity];
        slots[0] = NodeSlot::Reserved;
        Ok(Self { slots })
    }

    /// Number of slots, fixed for the table's lifetime
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Get the slot at `id`
    pub fn get(&self, id: NodeId) -> Result<&NodeSlot> {
        self.slots.get(id).ok_or_else(|| {
            DtreeError::InvalidArgument(format!(
                "node {id} out of range for tree of capacity {}",
                self.slots.len()
            ))
        })
    }

    pub(crate) fn set(&mut self, id: NodeId, slot: NodeSlot) -> Result<()> {
        let capacity = self.slots.len();
        let target = self.slots.get_mut(id).ok_or_else(|| {
            DtreeError::InvalidArgument(format!(
                "node {id} out of range for tree of capacity {capacity}"
            ))
        })?;
        *target = slot;
        Ok(())
    }

    /// First free slot at or after `start`
    pub fn first_free_from(&self, start: NodeId) -> Option<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, slot)| slot.is_free())
            .map(|(id, _)| id)
    }

    /// All slots in index order
    pub fn slots(&self) -> &[NodeSlot] {
        &self.slots
    }

    /// Root slot
    pub fn root(&self) -> &NodeSlot {
        &self.slots[0]
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }

    pub fn leaf_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_leaf()).count()
    }

    pub fn split_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_split()).count()
    }

    /// Flatten into storage records
    pub fn to_records(&self) -> Vec<NodeRecord> {
        self.slots.iter().map(NodeSlot::to_record).collect()
    }

    /// Rebuild a table from storage records
    pub fn from_records(records: &[NodeRecord]) -> Result<Self> {
        if records.is_empty() {
            return Err(DtreeError::InvalidArgument(
                "tree table needs at least one node".to_string(),
            ));
        }

        let slots = records
            .iter()
            .map(NodeSlot::from_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    /// Check if the table holds a finished tree
    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate that the table holds one finished tree.
    ///
    /// The root must be written, every split must own a written pair
    /// `left, left + 1` inside the table, every written node must be reachable
    /// from the root exactly once, and no reserved slot may remain.
    pub fn validate(&self) -> Result<()> {
        let capacity = self.slots.len();
        if !self.root().is_active() {
            return Err(DtreeError::InvalidTreeState(
                "root node has not been written".to_string(),
            ));
        }

        let mut visited = vec![false; capacity];
        let mut stack = vec![0usize];
        visited[0] = true;

        while let Some(id) = stack.pop() {
            if !self.slots[id].is_split() {
                continue;
            }

            let left = self.slots[id].left_child().ok_or_else(|| {
                DtreeError::InvalidTreeState(format!("split node {id} has no children"))
            })?;
            if left == 0 || left >= capacity - 1 {
                return Err(DtreeError::InvalidTreeState(format!(
                    "split node {id} has invalid left child {left}"
                )));
            }

            for child in [left, left + 1] {
                if !self.slots[child].is_active() {
                    return Err(DtreeError::InvalidTreeState(format!(
                        "child {child} of split node {id} has not been written"
                    )));
                }
                if visited[child] {
                    return Err(DtreeError::InvalidTreeState(format!(
                        "node {child} is referenced by more than one parent"
                    )));
                }
                visited[child] = true;
                stack.push(child);
            }
        }

        for (id, slot) in self.slots.iter().enumerate() {
            if slot.is_reserved() {
                return Err(DtreeError::InvalidTreeState(format!(
                    "node {id} is still reserved"
                )));
            }
            if slot.is_active() && !visited[id] {
                return Err(DtreeError::InvalidTreeState(format!(
                    "node {id} is not reachable from the root"
                )));
            }
        }

        Ok(())
    }
}

impl From<TreeTable> for Vec<NodeRecord> {
    fn from(table: TreeTable) -> Self {
        table.to_records()
    }
}

impl TryFrom<Vec<NodeRecord>> for TreeTable {
    type Error = DtreeError;

    fn try_from(records: Vec<NodeRecord>) -> Result<Self> {
        TreeTable::from_records(&records)
    }
}
