//! Feature records — the project's durable plan.
//!
//! `feature_list.json` holds an ordered array of [`FeatureRecord`]. The
//! collection is append-only in identity: automated roles must never remove
//! or reorder records, only flip the `passes` flag or append new records.
//! [`FeatureList::merge_update`] enforces that contract; a violation is a
//! correctness bug surfaced as [`FeatureListViolation`], not a style issue.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One planned feature with its verification steps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// What the feature is.
    pub description: String,
    /// Ordered verification steps.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Whether the feature currently passes verification.
    #[serde(default)]
    pub passes: bool,
}

/// Rejected mutation of the feature list.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureListViolation {
    /// The update dropped records that existed before.
    #[error("feature list update removed {removed} of {existing} records")]
    RecordsRemoved {
        /// Records present before the update.
        existing: usize,
        /// Records missing after the update.
        removed: usize,
    },
    /// The update changed the description of an existing position.
    #[error("feature list update reordered or rewrote record {index}: {existing:?} != {updated:?}")]
    RecordsReordered {
        /// Position of the mismatch.
        index: usize,
        /// Description previously at that position.
        existing: String,
        /// Description the update put there.
        updated: String,
    },
}

/// The ordered, append-only collection of feature records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureList {
    records: Vec<FeatureRecord>,
}

impl FeatureList {
    /// Build a list from records (initial plan creation).
    pub fn new(records: Vec<FeatureRecord>) -> Self {
        Self { records }
    }

    /// The records, in plan order.
    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records exist yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when the list is non-empty and every record passes.
    ///
    /// An empty list never counts as all-passing; it would otherwise trigger
    /// a manager review before the plan exists.
    pub fn all_passing(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.passes)
    }

    /// Count of passing records.
    pub fn passing_count(&self) -> usize {
        self.records.iter().filter(|r| r.passes).count()
    }

    /// Apply an updated list, enforcing append-only identity.
    ///
    /// Every existing record must reappear at the same position with the
    /// same description; only `passes` and `steps` may change, and new
    /// records may be appended at the end.
    pub fn merge_update(&mut self, updated: FeatureList) -> Result<(), FeatureListViolation> {
        if updated.records.len() < self.records.len() {
            return Err(FeatureListViolation::RecordsRemoved {
                existing: self.records.len(),
                removed: self.records.len() - updated.records.len(),
            });
        }
        for (index, (existing, new)) in self.records.iter().zip(&updated.records).enumerate() {
            if existing.description != new.description {
                return Err(FeatureListViolation::RecordsReordered {
                    index,
                    existing: existing.description.clone(),
                    updated: new.description.clone(),
                });
            }
        }
        self.records = updated.records;
        Ok(())
    }

    /// Flip one record's `passes` flag. Returns false if the index is out of range.
    pub fn set_passes(&mut self, index: usize, passes: bool) -> bool {
        match self.records.get_mut(index) {
            Some(record) => {
                record.passes = passes;
                true
            }
            None => false,
        }
    }
}
