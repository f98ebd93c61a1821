//! Model store: the trees of one forest plus per-tree training statistics
//!
//! The store keeps three collections aligned by tree id: the tree tables,
//! per-node impurity tables and per-node sample-count tables. All three are
//! allocated together by [`ModelStore::reserve`] or [`ModelStore::resize`],
//! which are one-shot until [`ModelStore::clear`] releases everything.

use crate::errors::{DtreeError, Result};
use crate::node::TreeId;
use crate::table::TreeTable;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type AuxTables<T> = Option<Vec<Option<Vec<T>>>>;

/// Container of all trees in a forest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredModel")]
pub struct ModelStore {
    /// One slot per declared tree id, empty until a tree is installed
    trees: Option<Vec<Option<TreeTable>>>,

    /// Per-node impurity, aligned with `trees`
    impurity: AuxTables<f64>,

    /// Per-node training sample counts, aligned with `trees`
    n_node_samples: AuxTables<u64>,

    /// Number of trees the model declares
    n_trees: usize,
}

/// Unchecked persisted form of a [`ModelStore`]
#[derive(Deserialize)]
struct StoredModel {
    trees: Option<Vec<Option<TreeTable>>>,
    impurity: AuxTables<f64>,
    n_node_samples: AuxTables<u64>,
    n_trees: usize,
}

impl TryFrom<StoredModel> for ModelStore {
    type Error = DtreeError;

    fn try_from(stored: StoredModel) -> Result<Self> {
        let store = ModelStore {
            trees: stored.trees,
            impurity: stored.impurity,
            n_node_samples: stored.n_node_samples,
            n_trees: stored.n_trees,
        };
        let len = store.declared_len();

        let has_stats = store.impurity.is_some() || store.n_node_samples.is_some();
        if store.trees.is_none() && has_stats {
            return Err(DtreeError::InvalidArgument(
                "statistics present without tree storage".to_string(),
            ));
        }
        if store.n_trees > len {
            return Err(DtreeError::InvalidArgument(format!(
                "tree counter {} exceeds {len} tree slots",
                store.n_trees
            )));
        }
        check_aux_alignment(&store, store.impurity.as_deref(), "impurity")?;
        check_aux_alignment(&store, store.n_node_samples.as_deref(), "sample count")?;
        Ok(store)
    }
}

fn check_aux_alignment<T>(
    store: &ModelStore,
    tables: Option<&[Option<Vec<T>>]>,
    name: &str,
) -> Result<()> {
    let Some(tables) = tables else {
        return Ok(());
    };
    let len = store.declared_len();
    if tables.len() != len {
        return Err(DtreeError::InvalidArgument(format!(
            "{name} tables hold {} entries for {len} tree slots",
            tables.len()
        )));
    }

    for (id, values) in tables.iter().enumerate() {
        let Some(values) = values else {
            continue;
        };
        let capacity = store.tree(id)?.map(TreeTable::capacity).ok_or_else(|| {
            DtreeError::InvalidArgument(format!("{name} table recorded for empty tree slot {id}"))
        })?;
        if values.len() != capacity {
            return Err(DtreeError::InvalidArgument(format!(
                "{name} table of tree {id} has {} entries for {capacity} nodes",
                values.len()
            )));
        }
    }
    Ok(())
}

impl ModelStore {
    /// Create an empty, unallocated store
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate slots for `n_trees` trees, growing the collections in place.
    ///
    /// Fails without touching the store if it is already allocated.
    pub fn reserve(&mut self, n_trees: usize) -> Result<()> {
        self.ensure_unallocated()?;

        let mut trees = Vec::with_capacity(n_trees);
        trees.resize_with(n_trees, || None);
        let mut impurity = Vec::with_capacity(n_trees);
        impurity.resize_with(n_trees, || None);
        let mut n_node_samples = Vec::with_capacity(n_trees);
        n_node_samples.resize_with(n_trees, || None);

        self.install(trees, impurity, n_node_samples);
        Ok(())
    }

    /// Allocate slots for `n_trees` trees in one step.
    ///
    /// Fails without touching the store if it is already allocated.
    pub fn resize(&mut self, n_trees: usize) -> Result<()> {
        self.ensure_unallocated()?;
        self.install(
            (0..n_trees).map(|_| None).collect(),
            (0..n_trees).map(|_| None).collect(),
            (0..n_trees).map(|_| None).collect(),
        );
        Ok(())
    }

    /// Release all collections and reset the tree counter
    pub fn clear(&mut self) {
        self.trees = None;
        self.impurity = None;
        self.n_node_samples = None;
        self.n_trees = 0;
        debug!("model store cleared");
    }

    fn ensure_unallocated(&self) -> Result<()> {
        if self.trees.is_some() {
            warn!("model store allocation requested twice without clear");
            return Err(DtreeError::InvalidArgument(
                "model store is already allocated".to_string(),
            ));
        }
        Ok(())
    }

    fn install(
        &mut self,
        trees: Vec<Option<TreeTable>>,
        impurity: Vec<Option<Vec<f64>>>,
        n_node_samples: Vec<Option<Vec<u64>>>,
    ) {
        debug!(n_trees = trees.len(), "model store allocated");
        self.trees = Some(trees);
        self.impurity = Some(impurity);
        self.n_node_samples = Some(n_node_samples);
        self.n_trees = 0;
    }

    /// Check if tree storage has been allocated
    pub fn is_allocated(&self) -> bool {
        self.trees.is_some()
    }

    /// Number of tree slots allocated
    pub fn declared_len(&self) -> usize {
        self.trees.as_ref().map_or(0, Vec::len)
    }

    /// Value of the tree counter
    pub fn tree_count(&self) -> usize {
        self.n_trees
    }

    pub(crate) fn set_tree_count(&mut self, n_trees: usize) {
        self.n_trees = n_trees;
    }

    /// Check if the impurity and sample-count collections are present
    pub fn has_auxiliary(&self) -> bool {
        self.impurity.is_some() && self.n_node_samples.is_some()
    }

    pub(crate) fn drop_auxiliary(&mut self) {
        self.impurity = None;
        self.n_node_samples = None;
    }

    fn check_id(&self, id: TreeId) -> Result<()> {
        let len = self.declared_len();
        if id >= len {
            return Err(DtreeError::InvalidArgument(format!(
                "tree id {id} out of range for model with {len} tree slots"
            )));
        }
        Ok(())
    }

    /// Tree table at `id`, `None` while the slot is empty
    pub fn tree(&self, id: TreeId) -> Result<Option<&TreeTable>> {
        self.check_id(id)?;
        Ok(self
            .trees
            .as_ref()
            .and_then(|trees| trees.get(id))
            .and_then(Option::as_ref))
    }

    pub(crate) fn tree_mut(&mut self, id: TreeId) -> Result<&mut TreeTable> {
        self.check_id(id)?;
        self.trees
            .as_mut()
            .and_then(|trees| trees.get_mut(id))
            .and_then(Option::as_mut)
            .ok_or_else(|| DtreeError::InvalidTreeState(format!("tree {id} has no table")))
    }

    /// Install `table` at `id`, replacing any previous table
    pub fn set_tree(&mut self, id: TreeId, table: TreeTable) -> Result<()> {
        self.check_id(id)?;
        let slot = self
            .trees
            .as_mut()
            .and_then(|trees| trees.get_mut(id))
            .ok_or_else(|| DtreeError::InvalidArgument(format!("tree id {id} out of range")))?;
        *slot = Some(table);
        Ok(())
    }

    /// First tree id whose slot is still empty
    pub fn first_empty_slot(&self) -> Option<TreeId> {
        self.trees
            .as_ref()
            .and_then(|trees| trees.iter().position(Option::is_none))
    }

    /// Installed trees with their ids
    pub fn trees(&self) -> impl Iterator<Item = (TreeId, &TreeTable)> + '_ {
        self.trees
            .iter()
            .flatten()
            .enumerate()
            .filter_map(|(id, tree)| tree.as_ref().map(|tree| (id, tree)))
    }

    /// Per-node impurity of tree `id`, if recorded
    pub fn impurity(&self, id: TreeId) -> Result<Option<&[f64]>> {
        self.check_id(id)?;
        Ok(self
            .impurity
            .as_ref()
            .and_then(|tables| tables.get(id))
            .and_then(Option::as_deref))
    }

    /// Per-node training sample counts of tree `id`, if recorded
    pub fn n_node_samples(&self, id: TreeId) -> Result<Option<&[u64]>> {
        self.check_id(id)?;
        Ok(self
            .n_node_samples
            .as_ref()
            .and_then(|tables| tables.get(id))
            .and_then(Option::as_deref))
    }

    /// Record per-node impurity for an installed tree
    pub fn set_impurity(&mut self, id: TreeId, values: Vec<f64>) -> Result<()> {
        check_finite(&values)?;
        let capacity = self.installed_capacity(id)?;
        set_aux(&mut self.impurity, id, capacity, values, "impurity")
    }

    /// Record per-node sample counts for an installed tree
    pub fn set_n_node_samples(&mut self, id: TreeId, values: Vec<u64>) -> Result<()> {
        let capacity = self.installed_capacity(id)?;
        set_aux(&mut self.n_node_samples, id, capacity, values, "sample count")
    }

    fn installed_capacity(&self, id: TreeId) -> Result<usize> {
        self.tree(id)?
            .map(TreeTable::capacity)
            .ok_or_else(|| DtreeError::InvalidTreeState(format!("tree {id} has no table")))
    }

    /// Append a trained tree at the slot named by the tree counter.
    ///
    /// Statistics, when given, must hold one entry per node.
    pub fn add(
        &mut self,
        table: TreeTable,
        impurity: Option<Vec<f64>>,
        n_node_samples: Option<Vec<u64>>,
    ) -> Result<TreeId> {
        let id = self.n_trees;
        if id >= self.declared_len() {
            return Err(DtreeError::CapacityExhausted(format!(
                "all {} tree slots are in use",
                self.declared_len()
            )));
        }
        if self.tree(id)?.is_some() {
            return Err(DtreeError::InvalidTreeState(format!(
                "tree slot {id} is already occupied"
            )));
        }

        if let Some(values) = &impurity {
            check_finite(values)?;
        }
        let capacity = table.capacity();
        for (name, len, allocated) in [
            (
                "impurity",
                impurity.as_ref().map(Vec::len),
                self.impurity.is_some(),
            ),
            (
                "sample count",
                n_node_samples.as_ref().map(Vec::len),
                self.n_node_samples.is_some(),
            ),
        ] {
            if let Some(len) = len {
                if !allocated {
                    return Err(DtreeError::InvalidTreeState(format!(
                        "{name} tables are not allocated"
                    )));
                }
                if len != capacity {
                    return Err(DtreeError::InvalidArgument(format!(
                        "{name} table has {len} entries for a tree of {capacity} nodes"
                    )));
                }
            }
        }

        self.set_tree(id, table)?;
        if let Some(values) = impurity {
            self.set_impurity(id, values)?;
        }
        if let Some(values) = n_node_samples {
            self.set_n_node_samples(id, values)?;
        }
        self.n_trees += 1;
        debug!(tree_id = id, nodes = capacity, "tree added to model");
        Ok(id)
    }

    /// Validate every installed tree
    pub fn validate(&self) -> Result<()> {
        for (id, tree) in self.trees() {
            tree.validate().map_err(|e| {
                DtreeError::InvalidTreeState(format!("tree {id} validation failed: {e}"))
            })?;
        }
        Ok(())
    }

    /// Serialize to canonical JSON (sorted keys, no whitespace)
    pub fn to_canonical_json(&self) -> Result<String> {
        // serde_json's `Value` map is a BTreeMap, so every object comes out sorted
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&value)?)
    }

    /// BLAKE3 digest of the canonical JSON form
    pub fn fingerprint(&self) -> Result<[u8; 32]> {
        let json = self.to_canonical_json()?;
        Ok(*blake3::hash(json.as_bytes()).as_bytes())
    }

    /// BLAKE3 digest of the canonical JSON form, as lowercase hex
    pub fn fingerprint_hex(&self) -> Result<String> {
        Ok(hex::encode(self.fingerprint()?))
    }
}

fn set_aux<T>(
    tables: &mut AuxTables<T>,
    id: TreeId,
    capacity: usize,
    values: Vec<T>,
    name: &str,
) -> Result<()> {
    if values.len() != capacity {
        return Err(DtreeError::InvalidArgument(format!(
            "{name} table has {} entries for a tree of {capacity} nodes",
            values.len()
        )));
    }
    let slot = tables
        .as_mut()
        .ok_or_else(|| DtreeError::InvalidTreeState(format!("{name} tables are not allocated")))?
        .get_mut(id)
        .ok_or_else(|| {
            DtreeError::InvalidTreeState(format!("{name} tables have no entry for tree {id}"))
        })?;
    *slot = Some(values);
    Ok(())
}

fn check_finite(values: &[f64]) -> Result<()> {
    match values.iter().position(|value| !value.is_finite()) {
        Some(node) => Err(DtreeError::InvalidArgument(format!(
            "impurity of node {node} is not finite"
        ))),
        None => Ok(()),
    }
}
