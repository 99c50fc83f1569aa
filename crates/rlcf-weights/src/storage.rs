//! # Persistent Weight Versions
//!
//! Sled-backed, append-only storage of weight document versions. Every save
//! produces a new [`WeightVersion`]; nothing is overwritten, so the full
//! history of learned weights (and the metrics that justified each step)
//! survives restarts and remains auditable.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `weight_versions` | `scope ++ 0x00 ++ revision (u64, big-endian)` | JSON `WeightVersion` |
//!
//! Big-endian revisions keep each scope's versions in ascending order, so the
//! latest version is the last key under the scope prefix.
//!
//! ## References
//!
//! - Sled documentation: <https://sled.rs/>

use crate::models::{Result, WeightConfig, WeightError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Tree name for storing weight versions.
const VERSION_TREE: &str = "weight_versions";

/// Scope label for the promoted default document.
const DEFAULT_SCOPE: &str = "default";

/// Namespace a weight version belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// The persisted default (promoted experiment winners).
    Default,
    /// Versions saved under one experiment.
    Experiment(String),
}

impl Scope {
    /// Maps an optional experiment id to its scope.
    pub fn from_experiment(experiment_id: Option<&str>) -> Self {
        match experiment_id {
            Some(id) => Scope::Experiment(id.to_string()),
            None => Scope::Default,
        }
    }

    /// The experiment id, if this is an experiment scope.
    pub fn experiment_id(&self) -> Option<&str> {
        match self {
            Scope::Default => None,
            Scope::Experiment(id) => Some(id),
        }
    }

    /// Rejects experiment ids containing the key separator.
    pub fn validate(&self) -> Result<()> {
        match self {
            Scope::Experiment(id) if id.contains('\0') => {
                Err(WeightError::InvalidScope(id.clone()))
            }
            _ => Ok(()),
        }
    }

    fn prefix(&self) -> Vec<u8> {
        let mut prefix = match self {
            Scope::Default => DEFAULT_SCOPE.as_bytes().to_vec(),
            Scope::Experiment(id) => format!("experiment:{}", id).into_bytes(),
        };
        prefix.push(0);
        prefix
    }

    fn key(&self, revision: u64) -> Vec<u8> {
        let mut key = self.prefix();
        key.extend_from_slice(&revision.to_be_bytes());
        key
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Default => f.write_str(DEFAULT_SCOPE),
            Scope::Experiment(id) => write!(f, "experiment:{}", id),
        }
    }
}

/// One persisted version of a weight document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVersion {
    /// Namespace of the version.
    pub scope: Scope,
    /// Monotone revision within the scope, starting at 1.
    pub revision: u64,
    /// The document itself.
    pub config: WeightConfig,
    /// Outcome metrics that justified the save.
    pub metrics: BTreeMap<String, f64>,
    /// SHA-256 of the canonical document.
    pub fingerprint: String,
    /// When the version was written.
    pub saved_at: DateTime<Utc>,
}

/// Wrapper around a Sled database for weight versions.
///
/// The underlying Sled database is thread-safe. Revision assignment is not:
/// callers that append concurrently to the same scope must serialize
/// `next_revision` + `append` themselves (the [`WeightStore`](crate::WeightStore)
/// does).
#[derive(Clone)]
pub struct Storage {
    /// The underlying Sled database.
    db: sled::Db,

    /// Tree of versions.
    versions: sled::Tree,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `WeightError::Database` if the path is unusable or the
    /// database is corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let versions = db.open_tree(VERSION_TREE)?;
        Ok(Storage { db, versions })
    }

    /// Creates a temporary in-memory storage, discarded on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let versions = db.open_tree(VERSION_TREE)?;
        Ok(Storage { db, versions })
    }

    /// Appends a version under its scope and revision.
    pub fn append(&self, version: &WeightVersion) -> Result<()> {
        let key = version.scope.key(version.revision);
        let bytes = serde_json::to_vec(version)?;
        self.versions.insert(key, bytes)?;
        Ok(())
    }

    /// Loads the latest version of a scope.
    pub fn latest(&self, scope: &Scope) -> Result<Option<WeightVersion>> {
        match self.versions.scan_prefix(scope.prefix()).next_back() {
            Some(entry) => {
                let (_, bytes) = entry?;
                Ok(Some(decode(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Revision the next append to `scope` should use.
    pub fn next_revision(&self, scope: &Scope) -> Result<u64> {
        Ok(self.latest(scope)?.map_or(1, |v| v.revision + 1))
    }

    /// All versions of a scope in ascending revision order.
    pub fn history(&self, scope: &Scope) -> Result<Vec<WeightVersion>> {
        let mut versions = Vec::new();
        for entry in self.versions.scan_prefix(scope.prefix()) {
            let (_, bytes) = entry?;
            versions.push(decode(&bytes)?);
        }
        Ok(versions)
    }

    /// Number of stored versions across all scopes.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if no versions are stored.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Flushes all pending writes to disk, returning the bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

fn decode(bytes: &[u8]) -> Result<WeightVersion> {
    serde_json::from_slice(bytes).map_err(|e| WeightError::Corrupted(e.to_string()))
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("versions", &self.len())
            .finish()
    }
}
