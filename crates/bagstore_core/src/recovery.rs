//! Crash recovery and index rebuilds.
//!
//! Recovery runs in two phases. Primary verification re-reads every record
//! and rebuilds the store's key structure from the ids inside the payloads.
//! Only once it has finished, every index is rebuilt from a full record scan
//! on a dedicated worker pool. Rebuilds of different indexes run
//! concurrently and in no particular order; the coordinator waits for all of
//! them and reports the first failure.

use crate::entity::{decode_entity, extract_id};
use crate::error::{CoreError, CoreResult};
use crate::index::Index;
use crate::metadata::MetadataStore;
use bagstore_storage::{RecordStore, StorageError};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a full recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Live records found by primary verification.
    pub records: u64,
    /// Index entries rebuilt, summed over every index.
    pub entries: usize,
}

/// Runs primary verification and index rebuilds for one bag.
pub struct RecoveryCoordinator {
    pool: ThreadPool,
    workers: usize,
}

impl RecoveryCoordinator {
    /// Creates a coordinator with `workers` rebuild threads.
    pub fn new(workers: usize) -> CoreResult<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("bagstore-rebuild-{i}"))
            .build()
            .map_err(|e| CoreError::configuration(format!("rebuild pool: {e}")))?;
        Ok(Self { pool, workers })
    }

    /// Number of rebuild threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Re-validates the primary key structure of `store`.
    ///
    /// Every record must decode far enough to yield its entity id; the first
    /// one that does not aborts verification.
    pub fn verify_primary(&self, store: &dyn RecordStore) -> CoreResult<u64> {
        let extract = |data: &[u8]| {
            extract_id(data)
                .map(|id| id.as_str().to_string())
                .map_err(|e| StorageError::corrupted(e.to_string()))
        };
        let records = store.verify(&extract)?;
        debug!(records, "verified primary keys");
        Ok(records)
    }

    /// Rebuilds every index in `indexes` from a full scan of `store`.
    ///
    /// Each index scans the store on its own. With `force` the rebuilt
    /// contents replace what the index holds. Tasks already running finish
    /// even after one has failed; their results are discarded.
    pub fn rebuild_all(
        &self,
        store: &dyn RecordStore,
        indexes: &[Arc<Index>],
        force: bool,
    ) -> CoreResult<usize> {
        if indexes.is_empty() {
            return Ok(0);
        }
        info!(
            indexes = indexes.len(),
            workers = self.workers,
            force,
            "scheduling index rebuilds"
        );

        let results: Vec<(String, CoreResult<usize>)> = self.pool.install(|| {
            indexes
                .par_iter()
                .map(|index| (index.name().to_string(), rebuild_task(store, index, force)))
                .collect()
        });

        let mut entries = 0;
        let mut first_failure = None;
        for (name, result) in results {
            match result {
                Ok(count) => {
                    debug!(index = %name, entries = count, "rebuilt index");
                    entries += count;
                }
                Err(e) => {
                    if first_failure.is_none() {
                        first_failure = Some(CoreError::rebuild_failed(format!(
                            "index {name}: {e}"
                        )));
                    }
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(entries),
        }
    }

    /// Verifies the primary structure, then rebuilds every index.
    ///
    /// Any failure is fatal for the bag being opened.
    pub fn recover(
        &self,
        store: &dyn RecordStore,
        indexes: &[Arc<Index>],
        force: bool,
    ) -> CoreResult<RecoveryReport> {
        let records = self.verify_primary(store).map_err(|e| {
            CoreError::rebuild_failed(format!("primary verification: {e}"))
        })?;
        let entries = self.rebuild_all(store, indexes, force)?;
        Ok(RecoveryReport { records, entries })
    }

    /// Populates a newly declared index from the records already stored.
    ///
    /// The index definition must already be persisted; otherwise nothing is
    /// rebuilt and [`CoreError::IndexNotPersisted`] is returned. Existing
    /// contents are replaced.
    pub fn initialize_index(
        &self,
        store: &dyn RecordStore,
        metadata: &dyn MetadataStore,
        instance: &str,
        bag: &str,
        index: &Arc<Index>,
    ) -> CoreResult<usize> {
        if !metadata.contains_index(instance, bag, &index.definition()) {
            return Err(CoreError::IndexNotPersisted {
                name: index.name().to_string(),
            });
        }
        self.rebuild_all(store, std::slice::from_ref(index), true)
    }
}

fn rebuild_task(store: &dyn RecordStore, index: &Index, force: bool) -> CoreResult<usize> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> CoreResult<usize> {
        let scan = store.read_all_records()?;
        index.rebuild(scan.map(|record| decode_entity(&record.data)), force)
    }));
    outcome.unwrap_or_else(|_| Err(CoreError::rebuild_failed("rebuild task panicked")))
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}
