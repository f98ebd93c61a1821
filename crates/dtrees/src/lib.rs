//! Decision forest storage and incremental tree building
//!
//! Trees are stored as flat, fixed-capacity node tables with no pointers:
//! the root sits at slot 0 and the two children of every split occupy
//! adjacent slots, so one index locates both.
//!
//! Modules:
//! - `node`: Node record encoding and slot states
//! - `table`: Fixed-capacity tree tables
//! - `store`: Model store holding a forest and its per-tree statistics
//! - `builder`: Node-by-node tree builder with sibling slot reservation
//! - `arena`: Chunked bump arena for build scratch memory
//! - `config`: Builder configuration (TOML and environment)

pub mod arena;
pub mod builder;
pub mod config;
pub mod errors;
pub mod node;
pub mod store;
pub mod table;

pub use arena::{Arena, ArenaBlock, DEFAULT_CHUNK_SIZE};
pub use builder::TreeBuilder;
pub use config::{ArenaConfig, BuilderConfig, LimitsConfig};
pub use errors::{DtreeError, Result};
pub use node::{
    NodeId, NodeRecord, NodeSlot, Position, TreeId, FREE_ID, LEAF_ID, NO_PARENT, RESERVED_ID,
};
pub use store::ModelStore;
pub use table::TreeTable;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
