//! # RLCF Weights - Bounded, Versioned Control Weights
//!
//! The weight document is the contract between the feedback learning loop and
//! the retrieval and expert-routing subsystems. This crate owns its shape, its
//! invariants, its persistence and the process-wide runtime state around it.
//!
//! ## Purpose
//!
//! 1. **Learnable weights** - named scalars with a default, inclusive bounds
//!    and a learning rate. Updates are clamped, never rejected.
//!
//! 2. **Weight documents** - `retrieval`, `expert_traversal`, `rlcf` and
//!    `gating` categories, each independently addressable.
//!
//! 3. **Versioned persistence** - every save appends a new revision (with the
//!    outcome metrics that justified it) to a Sled database.
//!
//! 4. **Resolution** - experiment version > runtime override > promoted
//!    default > static default, served from a linearizable cache.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────────┐
//!                 │    WeightStore     │
//!                 │      (Facade)      │
//!                 └─────────┬──────────┘
//!                           │
//!        ┌──────────────────┼──────────────────┐
//!        ▼                  ▼                  ▼
//!  ┌───────────┐     ┌─────────────┐    ┌─────────────┐
//!  │  Storage  │     │  Runtime    │    │ Fingerprint │
//!  │  (Sled)   │     │  Weights    │    │  (SHA-256)  │
//!  └───────────┘     └─────────────┘    └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rlcf_weights::{WeightStore, WeightConfig};
//! use std::collections::BTreeMap;
//!
//! let store = WeightStore::temporary().unwrap();
//! let config = store.get_config(None).unwrap();
//! assert_eq!(config.rlcf.track_record_update_factor, 0.05);
//!
//! let mut promoted = WeightConfig::default();
//! promoted.gating.expert_priors.get_mut("literal").unwrap().set_value(0.35);
//! let version = store.save(promoted, None, BTreeMap::new()).unwrap();
//! assert_eq!(version.revision, 1);
//! ```

pub mod canonicalize;
pub mod models;
pub mod runtime;
pub mod storage;
pub mod store;

pub use models::{
    CategoryWeights, ExpertTraversal, GatingWeights, LearnableWeight, Result, RetrievalWeights,
    RlcfWeights, TraversalWeight, WeightCategory, WeightConfig, WeightError,
};
pub use runtime::{ReloadEvent, ReloadKind, RuntimeWeights, SubscriptionId};
pub use storage::{Scope, Storage, WeightVersion};
pub use store::{ConfigSource, ResolvedConfig, WeightStore};

#[cfg(test)]
mod tests;
