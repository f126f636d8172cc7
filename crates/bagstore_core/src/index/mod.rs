//! Secondary indexes.
//!
//! An [`Index`] is an ordered set of entries derived from entities through
//! its [`KeyInfo`]. Indexes are never the source of truth: every one of them
//! can be rebuilt from a full record scan.

mod definition;
mod manager;
pub mod persistence;

pub use definition::{IndexDefinition, IndexType};
pub use manager::{DefaultIndexManager, IndexManager};

use crate::diff::{diff_index, IndexChanges};
use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyInfo, KeyValue};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// A named secondary index over one bag.
#[derive(Debug)]
pub struct Index {
    name: String,
    key_info: KeyInfo,
    unique: bool,
    index_type: IndexType,
    entries: RwLock<BTreeSet<Key>>,
    stale: AtomicBool,
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new(name: impl Into<String>, key_info: KeyInfo, unique: bool) -> Self {
        Self {
            name: name.into(),
            key_info,
            unique,
            index_type: IndexType::BTree,
            entries: RwLock::new(BTreeSet::new()),
            stale: AtomicBool::new(false),
        }
    }

    /// Recreates an index from its persisted definition.
    ///
    /// The index starts out stale: its contents must come from a snapshot or
    /// a rebuild before it can serve searches.
    pub fn from_definition(definition: &IndexDefinition) -> CoreResult<Self> {
        let index = Self::new(
            definition.name.clone(),
            definition.key_info()?,
            definition.unique,
        );
        index.stale.store(true, Ordering::Release);
        Ok(index)
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index schema.
    #[must_use]
    pub fn key_info(&self) -> &KeyInfo {
        &self.key_info
    }

    /// Whether two entities may not share the key fields.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Index structure.
    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Metadata describing this index.
    #[must_use]
    pub fn definition(&self) -> IndexDefinition {
        IndexDefinition::new(self.name.clone(), &self.key_info, self.unique)
    }

    /// Whether the contents are known not to match the records.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether `key` is an entry.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.read().contains(key)
    }

    /// Ordered copy of every entry.
    #[must_use]
    pub fn entries(&self) -> Vec<Key> {
        self.entries.read().iter().cloned().collect()
    }

    /// Inserts one entry.
    pub fn insert(&self, key: Key) -> CoreResult<bool> {
        self.key_info.encode(&key)?;
        let mut entries = self.entries.write();
        self.check_unique(&entries, &key, &BTreeSet::new())?;
        Ok(entries.insert(key))
    }

    /// Removes one entry, returning whether it existed.
    pub fn remove(&self, key: &Key) -> bool {
        self.entries.write().remove(key)
    }

    /// Checks that applying `changes` would not break uniqueness.
    pub fn check(&self, changes: &IndexChanges) -> CoreResult<()> {
        let entries = self.entries.read();
        for key in &changes.inserts {
            self.check_unique(&entries, key, &changes.removes)?;
        }
        Ok(())
    }

    /// Applies removals, then insertions, as one step.
    ///
    /// Nothing changes when an insertion would break uniqueness.
    pub fn apply(&self, changes: &IndexChanges) -> CoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        for key in &changes.inserts {
            self.check_unique(&entries, key, &changes.removes)?;
        }
        for key in &changes.removes {
            entries.remove(key);
        }
        entries.extend(changes.inserts.iter().cloned());
        Ok(())
    }

    /// Re-derives every entry from `entities`.
    ///
    /// With `force` the new entries replace the current contents; without
    /// it they are added to contents assumed to be empty. On error the index
    /// keeps its previous contents. Returns the number of entries built.
    pub fn rebuild<I>(&self, entities: I, force: bool) -> CoreResult<usize>
    where
        I: IntoIterator<Item = CoreResult<Entity>>,
    {
        let mut built = BTreeSet::new();
        for entity in entities {
            let changes = diff_index(&self.key_info, None, Some(&entity?))?;
            for key in changes.inserts {
                self.check_unique(&built, &key, &BTreeSet::new())?;
                built.insert(key);
            }
        }

        let count = built.len();
        let mut entries = self.entries.write();
        if force {
            *entries = built;
        } else {
            entries.extend(built);
        }
        self.stale.store(false, Ordering::Release);
        Ok(count)
    }

    /// Replaces the contents with entries loaded from a snapshot.
    pub(crate) fn restore(&self, keys: BTreeSet<Key>) {
        *self.entries.write() = keys;
        self.stale.store(false, Ordering::Release);
    }

    /// Entries whose first key field lies within `lower..upper`.
    #[must_use]
    pub fn range(&self, lower: Bound<&KeyValue>, upper: Bound<&KeyValue>) -> Vec<Key> {
        let entries = self.entries.read();
        let leading = |key: &Key| key.value_at(0).cloned().unwrap_or(KeyValue::Null);

        let start = match lower {
            Bound::Included(v) | Bound::Excluded(v) => {
                Bound::Included(self.key_info.lower_bound(v.clone()))
            }
            Bound::Unbounded => Bound::Unbounded,
        };
        entries
            .range((start, Bound::Unbounded))
            .skip_while(|key| match lower {
                Bound::Excluded(v) => leading(*key) == *v,
                _ => false,
            })
            .take_while(|key| match upper {
                Bound::Included(v) => leading(*key) <= *v,
                Bound::Excluded(v) => leading(*key) < *v,
                Bound::Unbounded => true,
            })
            .cloned()
            .collect()
    }

    /// Entity ids referenced by `keys`, first occurrence first.
    #[must_use]
    pub fn references(&self, keys: &[Key]) -> Vec<EntityId> {
        let mut seen = std::collections::HashSet::new();
        keys.iter()
            .filter_map(|key| self.key_info.reference(key))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    fn check_unique(
        &self,
        entries: &BTreeSet<Key>,
        key: &Key,
        ignoring: &BTreeSet<Key>,
    ) -> CoreResult<()> {
        if !self.unique {
            return Ok(());
        }
        let reference = self.key_info.reference(key);
        let prefix = self.key_info.key_part(key);
        let conflict = entries
            .range(self.key_info.prefix_bound(key)..)
            .take_while(|existing| self.key_info.key_part(existing) == prefix)
            .filter(|existing| !ignoring.contains(*existing))
            .any(|existing| self.key_info.reference(existing) != reference);
        if conflict {
            return Err(CoreError::UniqueViolation {
                index: self.name.clone(),
                key: Key::Composite(prefix.to_vec()).to_string(),
            });
        }
        Ok(())
    }
}
