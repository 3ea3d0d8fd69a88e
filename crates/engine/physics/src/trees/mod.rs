//! Destructible trees as collision partners
//!
//! Trees are far too numerous for the global broadphase. The terrain provider
//! hands out [`TreeBatch`]es for the cells a body's query touches, each tree
//! gets a capsule proxy on first use, and a body near a trunk gets a
//! [`TreeCollisionPair`] that lives as long as it keeps being near.
//!
//! # Architecture
//!
//! - [`tree`] - per-tree data and the shared [`BreakState`] bytes
//! - [`batch`] - per-cell batches and their capsule proxies
//! - [`cache`] - generation-checked batch storage and [`TreeRef`] packing
//! - [`pairs`] - mark-and-sweep pair table
//! - [`flex`] - impact stress, yield and the per-pair state machine
//! - [`deflection`] - the [`TreeDeflection`] seam and [`BrakingDeflection`]

pub mod batch;
pub mod cache;
pub mod deflection;
pub mod flex;
pub mod pairs;
pub mod tree;

pub use batch::{CellKey, TreeBatch, TreeProxy, TREES_PER_BATCH};
pub use cache::{BatchHandle, BatchInsertion, TreeBatchCache, TreeRef};
pub use deflection::{BrakingDeflection, TreeDeflection};
pub use flex::{assess_impact, FlexPhase, ImpactAssessment, TreeCollisionContext};
pub use pairs::{CandidateQuery, TreeCollisionPair, TreeCollisionPairTable};
pub use tree::{BreakState, Tree};
