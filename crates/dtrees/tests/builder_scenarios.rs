//! End-to-end builder scenarios
//!
//! Builds small forests through the public API and checks the resulting node
//! layout the way downstream readers see it: as flat node records.

use anyhow::Result;
use dforest_dtrees::{
    DtreeError, ModelStore, NodeRecord, TreeBuilder, TreeTable, LEAF_ID, NO_PARENT,
};

const LEFT: usize = 0;
const RIGHT: usize = 1;

fn records(model: &ModelStore, tree: usize) -> Vec<NodeRecord> {
    model
        .tree(tree)
        .expect("tree id in range")
        .expect("tree created")
        .to_records()
}

/// Walk a finished tree the way a predictor would
fn predict(records: &[NodeRecord], features: &[f64]) -> u64 {
    let mut idx = 0usize;
    loop {
        let node = &records[idx];
        if node.feature_index == LEAF_ID {
            return node.left_index_or_class;
        }
        let value = features[node.feature_index as usize];
        idx = if value <= node.feature_value_or_response {
            node.left_index_or_class as usize
        } else {
            node.right_index().expect("split has children") as usize
        };
    }
}

#[test]
fn test_stump_left_then_right() -> Result<()> {
    let mut builder = TreeBuilder::new(2, 1)?;
    let tree = builder.create_tree(3)?;

    assert_eq!(builder.add_split_node(tree, NO_PARENT, LEFT, 2, 1.5)?, 0);
    assert_eq!(builder.add_leaf_node(tree, 0, LEFT, 1)?, 1);
    assert!(builder.model().tree(tree)?.unwrap().slots()[2].is_reserved());
    assert_eq!(builder.add_leaf_node(tree, 0, RIGHT, 0)?, 2);

    let model = builder.into_model()?;
    let nodes = records(&model, tree);
    assert_eq!(nodes[0].feature_index, 2);
    assert_eq!(nodes[0].left_index_or_class, 1);
    assert_eq!(nodes[0].feature_value_or_response, 1.5);
    assert_eq!((nodes[1].feature_index, nodes[1].left_index_or_class), (LEAF_ID, 1));
    assert_eq!((nodes[2].feature_index, nodes[2].left_index_or_class), (LEAF_ID, 0));
    Ok(())
}

#[test]
fn test_stump_order_does_not_change_layout() -> Result<()> {
    let mut forward = TreeBuilder::new(2, 1)?;
    let tree = forward.create_tree(3)?;
    forward.add_split_node(tree, NO_PARENT, LEFT, 2, 1.5)?;
    forward.add_leaf_node(tree, 0, LEFT, 1)?;
    forward.add_leaf_node(tree, 0, RIGHT, 0)?;

    let mut reversed = TreeBuilder::new(2, 1)?;
    let tree = reversed.create_tree(3)?;
    reversed.add_split_node(tree, NO_PARENT, LEFT, 2, 1.5)?;
    assert_eq!(reversed.add_leaf_node(tree, 0, RIGHT, 0)?, 2);
    assert!(reversed.model().tree(tree)?.unwrap().slots()[1].is_reserved());
    assert_eq!(reversed.add_leaf_node(tree, 0, LEFT, 1)?, 1);

    let forward = forward.into_model()?;
    let reversed = reversed.into_model()?;
    assert_eq!(records(&forward, 0), records(&reversed, 0));
    assert_eq!(forward.fingerprint_hex()?, reversed.fingerprint_hex()?);
    Ok(())
}

#[test]
fn test_depth_two_tree_right_subtree_first() -> Result<()> {
    // x0 <= 0.5 ? (x1 <= 2.0 ? 0 : 1) : (x2 <= -1.0 ? 2 : 0)
    let mut builder = TreeBuilder::new(3, 1)?;
    let tree = builder.create_tree(7)?;

    let root = builder.add_split_node(tree, NO_PARENT, LEFT, 0, 0.5)?;
    let right = builder.add_split_node(tree, root, RIGHT, 2, -1.0)?;
    let right_right = builder.add_leaf_node(tree, right, RIGHT, 0)?;
    let right_left = builder.add_leaf_node(tree, right, LEFT, 2)?;
    let left = builder.add_split_node(tree, root, LEFT, 1, 2.0)?;
    let left_left = builder.add_leaf_node(tree, left, LEFT, 0)?;
    let left_right = builder.add_leaf_node(tree, left, RIGHT, 1)?;

    assert_eq!((root, left, right), (0, 1, 2));
    assert_eq!((right_left, right_right), (3, 4));
    assert_eq!((left_left, left_right), (5, 6));

    let model = builder.into_model()?;
    let nodes = records(&model, tree);
    assert_eq!(predict(&nodes, &[0.0, 1.0, 0.0]), 0);
    assert_eq!(predict(&nodes, &[0.0, 3.0, 0.0]), 1);
    assert_eq!(predict(&nodes, &[1.0, 0.0, -2.0]), 2);
    assert_eq!(predict(&nodes, &[1.0, 0.0, 5.0]), 0);
    Ok(())
}

#[test]
fn test_forest_fills_tree_slots_in_order() -> Result<()> {
    let mut builder = TreeBuilder::new(2, 3)?;
    for expected in 0..3 {
        let tree = builder.create_tree(1)?;
        assert_eq!(tree, expected);
        assert_eq!(builder.add_leaf_node(tree, NO_PARENT, LEFT, tree % 2)?, 0);
    }
    assert!(matches!(
        builder.create_tree(1),
        Err(DtreeError::CapacityExhausted(_))
    ));

    let model = builder.into_model()?;
    assert_eq!(model.tree_count(), 3);
    assert_eq!(model.trees().count(), 3);
    Ok(())
}

#[test]
fn test_unfinished_declared_trees_are_allowed() -> Result<()> {
    // Trees count as declared at initialize; uncreated slots stay empty
    let mut builder = TreeBuilder::new(2, 2)?;
    let tree = builder.create_tree(1)?;
    builder.add_leaf_node(tree, NO_PARENT, LEFT, 0)?;

    let model = builder.into_model()?;
    assert_eq!(model.tree_count(), 2);
    assert!(model.tree(1)?.is_none());
    assert!(model.impurity(0)?.is_none());
    Ok(())
}

#[test]
fn test_reinitialize_discards_previous_model() -> Result<()> {
    let mut builder = TreeBuilder::new(2, 1)?;
    let tree = builder.create_tree(3)?;
    builder.add_split_node(tree, NO_PARENT, LEFT, 0, 0.0)?;

    builder.initialize(4, 2)?;
    assert_eq!(builder.n_classes(), 4);
    assert_eq!(builder.model().declared_len(), 2);
    assert!(builder.model().tree(0)?.is_none());
    assert_eq!(builder.create_tree(3)?, 0);
    Ok(())
}

#[test]
fn test_failed_writes_leave_table_untouched() -> Result<()> {
    let mut builder = TreeBuilder::new(2, 1)?;
    let tree = builder.create_tree(4)?;
    builder.add_split_node(tree, NO_PARENT, LEFT, 0, 0.0)?;
    builder.add_split_node(tree, 0, LEFT, 1, 0.0)?;
    let before: TreeTable = builder.model().tree(tree)?.unwrap().clone();

    // Slot 3 is the only free slot left, so node 1 cannot get a pair
    assert!(builder.add_leaf_node(tree, 1, RIGHT, 0).is_err());
    assert!(builder.add_leaf_node(tree, 1, LEFT, 0).is_err());
    assert_eq!(builder.model().tree(tree)?.unwrap(), &before);
    Ok(())
}
