//! Incremental index maintenance.
//!
//! For one entity mutation, [`diff_index`] works out which entries an index
//! gains and loses. "Data present" means the entity has a value for at least
//! one of the index's key fields:
//!
//! | old present | new present | changes                                  |
//! |-------------|-------------|------------------------------------------|
//! | yes         | yes         | insert `new - old`, remove `old - new`   |
//! | no          | yes         | insert every new entry                   |
//! | yes         | no          | remove every old entry                   |
//! | no          | no          | nothing                                  |
//!
//! Entries compare as whole keys, value fields included. An entry whose
//! indexed fields are unchanged but whose carried value changed is removed
//! and re-inserted.

use crate::entity::Entity;
use crate::error::CoreResult;
use crate::index::Index;
use crate::key::{Key, KeyInfo};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Entries one index gains and loses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexChanges {
    /// Entries to add.
    pub inserts: BTreeSet<Key>,
    /// Entries to drop.
    pub removes: BTreeSet<Key>,
}

impl IndexChanges {
    /// Whether the index is left untouched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removes.is_empty()
    }
}

/// Computes the changes moving an entity from `old` to `new` causes in the
/// index described by `key_info`. `None` stands for "no entity".
pub fn diff_index(
    key_info: &KeyInfo,
    old: Option<&Entity>,
    new: Option<&Entity>,
) -> CoreResult<IndexChanges> {
    let old = old.filter(|e| key_info.is_any_data_present(e));
    let new = new.filter(|e| key_info.is_any_data_present(e));

    let changes = match (old, new) {
        (Some(old), Some(new)) => {
            let old_keys = key_info.entity_keys(old)?;
            let new_keys = key_info.entity_keys(new)?;
            IndexChanges {
                inserts: new_keys.difference(&old_keys).cloned().collect(),
                removes: old_keys.difference(&new_keys).cloned().collect(),
            }
        }
        (None, Some(new)) => IndexChanges {
            inserts: key_info.entity_keys(new)?,
            removes: BTreeSet::new(),
        },
        (Some(old), None) => IndexChanges {
            inserts: BTreeSet::new(),
            removes: key_info.entity_keys(old)?,
        },
        (None, None) => IndexChanges::default(),
    };
    Ok(changes)
}

/// Changes for every index of a bag, derived before any is applied.
#[derive(Debug, Default)]
pub struct BagChanges {
    changes: Vec<(Arc<Index>, IndexChanges)>,
}

impl BagChanges {
    /// Derives the changes of every index in `indexes`.
    ///
    /// Fails on the first index whose keys cannot be derived.
    pub fn derive<'a>(
        indexes: impl IntoIterator<Item = &'a Arc<Index>>,
        old: Option<&Entity>,
        new: Option<&Entity>,
    ) -> CoreResult<Self> {
        let mut changes = Vec::new();
        for index in indexes {
            let diff = diff_index(index.key_info(), old, new)?;
            if !diff.is_empty() {
                changes.push((Arc::clone(index), diff));
            }
        }
        Ok(Self { changes })
    }

    /// Verifies uniqueness for every index before anything is written.
    pub fn check(&self) -> CoreResult<()> {
        for (index, diff) in &self.changes {
            index.check(diff)?;
        }
        Ok(())
    }

    /// Applies every index's removals and insertions.
    pub fn apply(&self) -> CoreResult<()> {
        for (index, diff) in &self.changes {
            debug!(
                index = index.name(),
                inserts = diff.inserts.len(),
                removes = diff.removes.len(),
                "applying index changes"
            );
            index.apply(diff)?;
        }
        Ok(())
    }

    /// Whether no index changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
