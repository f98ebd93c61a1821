//! Incremental decision forest builder
//!
//! Trees are written node by node into pre-sized [`TreeTable`]s. Callers name
//! each node by its parent and position, and may supply the two children of a
//! split in either order. Because the children must land in adjacent slots
//! `left, left + 1`, the first child to arrive claims the pair: it takes the
//! first free slot after its parent for the left child and marks the sibling
//! slot reserved. The second child is then written into the reserved slot.
//!
//! ```rust
//! use dforest_dtrees::{TreeBuilder, NO_PARENT};
//!
//! let mut builder = TreeBuilder::new(2, 1)?;
//! let tree = builder.create_tree(3)?;
//! let root = builder.add_split_node(tree, NO_PARENT, 0, 2, 1.5)?;
//! let right = builder.add_leaf_node(tree, root, 1, 0)?;
//! let left = builder.add_leaf_node(tree, root, 0, 1)?;
//! assert_eq!((root, left, right), (0, 1, 2));
//!
//! let model = builder.into_model()?;
//! assert_eq!(model.tree_count(), 1);
//! # Ok::<(), dforest_dtrees::DtreeError>(())
//! ```
//!
//! A builder owns its model exclusively; concurrent forest construction uses
//! one builder per thread.

use crate::arena::Arena;
use crate::config::BuilderConfig;
use crate::errors::{DtreeError, Result};
use crate::node::{NodeId, NodeSlot, Position, TreeId, NO_PARENT};
use crate::store::ModelStore;
use crate::table::TreeTable;
use tracing::{debug, trace};

/// Builds classification forests node by node
#[derive(Debug)]
pub struct TreeBuilder {
    model: ModelStore,
    n_classes: usize,
    config: BuilderConfig,
    scratch: Arena,
}

impl TreeBuilder {
    /// Create a builder for `n_trees` trees over `n_classes` classes
    pub fn new(n_classes: usize, n_trees: usize) -> Result<Self> {
        Self::with_config(BuilderConfig::default(), n_classes, n_trees)
    }

    /// Create a builder with explicit configuration
    pub fn with_config(config: BuilderConfig, n_classes: usize, n_trees: usize) -> Result<Self> {
        config.validate()?;
        let mut scratch = Arena::new(config.arena.chunk_size)?;
        if config.arena.preallocate {
            scratch.preallocate()?;
        }

        let mut builder = Self {
            model: ModelStore::new(),
            n_classes: 0,
            config,
            scratch,
        };
        builder.initialize(n_classes, n_trees)?;
        Ok(builder)
    }

    /// Start a fresh model holding exactly `n_trees` trees.
    ///
    /// All trees count as declared immediately. Built models carry no
    /// training statistics, so the auxiliary tables are dropped.
    pub fn initialize(&mut self, n_classes: usize, n_trees: usize) -> Result<()> {
        if n_classes == 0 {
            return Err(DtreeError::InvalidArgument(
                "a classification model needs at least one class".to_string(),
            ));
        }
        if n_trees > self.config.limits.max_trees {
            return Err(DtreeError::InvalidArgument(format!(
                "{n_trees} trees exceed the limit of {}",
                self.config.limits.max_trees
            )));
        }

        let mut model = ModelStore::new();
        model.resize(n_trees)?;
        model.drop_auxiliary();
        model.set_tree_count(n_trees);

        self.model = model;
        self.n_classes = n_classes;
        self.scratch.reset();
        debug!(n_classes, n_trees, "tree builder initialized");
        Ok(())
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Model being built
    pub fn model(&self) -> &ModelStore {
        &self.model
    }

    /// Scratch arena for the current build pass, rewound by [`Self::initialize`]
    pub fn scratch(&mut self) -> &mut Arena {
        &mut self.scratch
    }

    /// Allocate a table of `n_nodes` slots in the first empty tree slot
    pub fn create_tree(&mut self, n_nodes: usize) -> Result<TreeId> {
        if n_nodes == 0 {
            return Err(DtreeError::InvalidArgument(
                "tree must have at least one node".to_string(),
            ));
        }
        if n_nodes > self.config.limits.max_nodes_per_tree {
            return Err(DtreeError::InvalidArgument(format!(
                "{n_nodes} nodes exceed the per-tree limit of {}",
                self.config.limits.max_nodes_per_tree
            )));
        }

        let tree_id = self.model.first_empty_slot().ok_or_else(|| {
            DtreeError::CapacityExhausted(format!(
                "all {} tree slots already hold a tree",
                self.model.declared_len()
            ))
        })?;
        self.model.set_tree(tree_id, TreeTable::new(n_nodes)?)?;
        debug!(tree_id, n_nodes, "tree created");
        Ok(tree_id)
    }

    /// Write a split node under `parent_id` at `position` (0 left, 1 right).
    ///
    /// With `parent_id == NO_PARENT` the node becomes the root.
    pub fn add_split_node(
        &mut self,
        tree_id: TreeId,
        parent_id: NodeId,
        position: usize,
        feature_index: usize,
        threshold: f64,
    ) -> Result<NodeId> {
        if feature_index > i32::MAX as usize {
            return Err(DtreeError::InvalidArgument(format!(
                "feature index {feature_index} does not fit a node record"
            )));
        }
        if !threshold.is_finite() {
            return Err(DtreeError::InvalidArgument(format!(
                "split threshold must be finite, got {threshold}"
            )));
        }
        self.add_node(
            tree_id,
            parent_id,
            position,
            NodeSlot::split(feature_index, threshold),
        )
    }

    /// Write a leaf predicting `class_label` under `parent_id` at `position`.
    ///
    /// With `parent_id == NO_PARENT` the leaf becomes the root.
    pub fn add_leaf_node(
        &mut self,
        tree_id: TreeId,
        parent_id: NodeId,
        position: usize,
        class_label: usize,
    ) -> Result<NodeId> {
        if class_label >= self.n_classes {
            return Err(DtreeError::InvalidArgument(format!(
                "class label {class_label} out of range for {} classes",
                self.n_classes
            )));
        }
        self.add_node(tree_id, parent_id, position, NodeSlot::leaf(class_label))
    }

    fn add_node(
        &mut self,
        tree_id: TreeId,
        parent_id: NodeId,
        position: usize,
        node: NodeSlot,
    ) -> Result<NodeId> {
        let table = self.model.tree_mut(tree_id)?;
        let position = Position::try_from(position)?;

        let node_id = if parent_id == NO_PARENT {
            place_root(table, node)?
        } else {
            place_child(table, parent_id, position, node)?
        };
        trace!(tree_id, node_id, ?position, leaf = node.is_leaf(), "node written");
        Ok(node_id)
    }

    /// Validate that tree `tree_id` is finished
    pub fn validate_tree(&self, tree_id: TreeId) -> Result<()> {
        self.model
            .tree(tree_id)?
            .ok_or_else(|| DtreeError::InvalidTreeState(format!("tree {tree_id} has no table")))?
            .validate()
    }

    /// Hand over the finished model.
    ///
    /// Every created tree must be complete; declared slots never created
    /// stay empty.
    pub fn into_model(self) -> Result<ModelStore> {
        self.model.validate()?;
        Ok(self.model)
    }
}

fn place_root(table: &mut TreeTable, node: NodeSlot) -> Result<NodeId> {
    if table.root().is_active() {
        return Err(DtreeError::InvalidTreeState(
            "root node is already written".to_string(),
        ));
    }
    table.set(0, node)?;
    Ok(0)
}

fn place_child(
    table: &mut TreeTable,
    parent_id: NodeId,
    position: Position,
    node: NodeSlot,
) -> Result<NodeId> {
    let NodeSlot::Split {
        feature,
        threshold,
        left,
    } = *table.get(parent_id)?
    else {
        return Err(DtreeError::InvalidTreeState(format!(
            "parent {parent_id} is not a split node"
        )));
    };

    // Pair already placed: the child goes into its reserved slot
    if let Some(left) = left {
        let target = left.checked_add(position.index()).ok_or_else(|| {
            DtreeError::InvalidTreeState(format!("node {parent_id} has invalid left child {left}"))
        })?;
        if !table.get(target)?.is_reserved() {
            return Err(DtreeError::InvalidTreeState(format!(
                "slot {target} for child {} of node {parent_id} is not reserved",
                position.index()
            )));
        }
        table.set(target, node)?;
        return Ok(target);
    }

    let left = table.first_free_from(parent_id + 1).ok_or_else(|| {
        DtreeError::CapacityExhausted(format!(
            "no free slot after node {parent_id} for its children"
        ))
    })?;
    let right = left + 1;
    if !table.slots().get(right).is_some_and(NodeSlot::is_free) {
        return Err(DtreeError::CapacityExhausted(format!(
            "no room for the sibling of slot {left} under node {parent_id}"
        )));
    }

    let (written, reserved) = match position {
        Position::Left => (left, right),
        Position::Right => (right, left),
    };
    table.set(written, node)?;
    table.set(reserved, NodeSlot::Reserved)?;
    table.set(
        parent_id,
        NodeSlot::Split {
            feature,
            threshold,
            left: Some(left),
        },
    )?;
    Ok(written)
}
