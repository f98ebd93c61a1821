//! Decision tree node encoding
//!
//! A tree node lives in one of four states. Inside the crate the state is the
//! tagged [`NodeSlot`]; at the storage boundary every slot is flattened into
//! the fixed three-field [`NodeRecord`] that downstream readers understand:
//!
//! | `feature_index` | meaning                    | `left_index_or_class` | `feature_value_or_response` |
//! |-----------------|----------------------------|-----------------------|-----------------------------|
//! | `>= 0`          | split on that feature      | left child (`0` = none yet) | threshold             |
//! | `-1`            | leaf                       | class label           | response                    |
//! | `-2`            | reserved for a sibling     | `0`                   | `0.0`                       |
//! | `-3`            | free                       | `0`                   | `0.0`                       |
//!
//! The right child of a split is always `left + 1`.

use crate::errors::{DtreeError, Result};
use serde::{Deserialize, Serialize};

/// Index of a node inside its tree table
pub type NodeId = usize;

/// Index of a tree inside a model store
pub type TreeId = usize;

/// Parent id marking a node as the root of its tree
pub const NO_PARENT: NodeId = NodeId::MAX;

/// `feature_index` marker of a leaf record
pub const LEAF_ID: i32 = -1;

/// `feature_index` marker of a slot held for a sibling not yet written
pub const RESERVED_ID: i32 = -2;

/// `feature_index` marker of an unused slot
pub const FREE_ID: i32 = -3;

/// Fixed in-memory layout of one node, field order is part of the format
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub feature_index: i32,
    pub left_index_or_class: u64,
    pub feature_value_or_response: f64,
}

impl NodeRecord {
    /// Check if the record is a leaf as readers interpret it
    pub fn is_leaf(&self) -> bool {
        self.feature_index < 0
    }

    /// Right child index of a split record
    pub fn right_index(&self) -> Option<u64> {
        if self.feature_index >= 0 && self.left_index_or_class > 0 {
            self.left_index_or_class.checked_add(1)
        } else {
            None
        }
    }
}

/// Which child of a split a node becomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Left = 0,
    Right = 1,
}

impl Position {
    /// Numeric position, `0` for left and `1` for right
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for Position {
    type Error = DtreeError;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            0 => Ok(Position::Left),
            1 => Ok(Position::Right),
            other => Err(DtreeError::InvalidArgument(format!(
                "position must be 0 (left) or 1 (right), got {other}"
            ))),
        }
    }
}

/// State of one slot in a tree table
///
/// Slots move `Free -> Reserved -> Leaf|Split` or straight from `Free`
/// (or the reserved root) to an active node. Active states are terminal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeSlot {
    Free,
    Reserved,
    Leaf {
        class: usize,
        response: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Option<NodeId>,
    },
}

impl NodeSlot {
    /// Leaf carrying a class label
    pub fn leaf(class: usize) -> Self {
        NodeSlot::Leaf {
            class,
            response: 0.0,
        }
    }

    /// Split with no children attached yet
    pub fn split(feature: usize, threshold: f64) -> Self {
        NodeSlot::Split {
            feature,
            threshold,
            left: None,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, NodeSlot::Free)
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, NodeSlot::Reserved)
    }

    /// Check if the slot holds a written leaf or split
    pub fn is_active(&self) -> bool {
        matches!(self, NodeSlot::Leaf { .. } | NodeSlot::Split { .. })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeSlot::Leaf { .. })
    }

    pub fn is_split(&self) -> bool {
        matches!(self, NodeSlot::Split { .. })
    }

    /// Left child of a split whose pair has been placed
    pub fn left_child(&self) -> Option<NodeId> {
        match self {
            NodeSlot::Split { left, .. } => *left,
            _ => None,
        }
    }

    /// Right child of a split whose pair has been placed
    pub fn right_child(&self) -> Option<NodeId> {
        self.left_child().and_then(|left| left.checked_add(1))
    }

    /// Flatten into the storage record.
    ///
    /// Feature indices are bounded by `i32::MAX` when nodes enter a table
    /// through [`crate::TreeBuilder`] or [`NodeSlot::from_record`].
    pub fn to_record(&self) -> NodeRecord {
        match *self {
            NodeSlot::Free => NodeRecord {
                feature_index: FREE_ID,
                left_index_or_class: 0,
                feature_value_or_response: 0.0,
            },
            NodeSlot::Reserved => NodeRecord {
                feature_index: RESERVED_ID,
                left_index_or_class: 0,
                feature_value_or_response: 0.0,
            },
            NodeSlot::Leaf { class, response } => NodeRecord {
                feature_index: LEAF_ID,
                left_index_or_class: class as u64,
                feature_value_or_response: response,
            },
            NodeSlot::Split {
                feature,
                threshold,
                left,
            } => NodeRecord {
                feature_index: i32::try_from(feature).unwrap_or(i32::MAX),
                left_index_or_class: left.unwrap_or(0) as u64,
                feature_value_or_response: threshold,
            },
        }
    }

    /// Decode a storage record
    pub fn from_record(record: &NodeRecord) -> Result<Self> {
        let to_usize = |value: u64| {
            usize::try_from(value).map_err(|_| {
                DtreeError::InvalidArgument(format!("index {value} does not fit in usize"))
            })
        };

        if !record.feature_value_or_response.is_finite() {
            return Err(DtreeError::InvalidArgument(format!(
                "node value {} is not finite",
                record.feature_value_or_response
            )));
        }

        match record.feature_index {
            FREE_ID => Ok(NodeSlot::Free),
            RESERVED_ID => Ok(NodeSlot::Reserved),
            LEAF_ID => Ok(NodeSlot::Leaf {
                class: to_usize(record.left_index_or_class)?,
                response: record.feature_value_or_response,
            }),
            feature if feature >= 0 => {
                let left = to_usize(record.left_index_or_class)?;
                Ok(NodeSlot::Split {
                    feature: feature as usize,
                    threshold: record.feature_value_or_response,
                    left: (left > 0).then_some(left),
                })
            }
            other => Err(DtreeError::InvalidArgument(format!(
                "unknown node marker {other}"
            ))),
        }
    }
}

impl From<NodeSlot> for NodeRecord {
    fn from(slot: NodeSlot) -> Self {
        slot.to_record()
    }
}

impl TryFrom<NodeRecord> for NodeSlot {
    type Error = DtreeError;

    fn try_from(record: NodeRecord) -> Result<Self> {
        NodeSlot::from_record(&record)
    }
}
