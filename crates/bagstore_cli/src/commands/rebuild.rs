//! Rebuild command implementation.

use super::open_instance;
use bagstore_core::BagConfig;
use std::path::Path;

/// Runs the rebuild command: opens `bag` with a forced rebuild, then flushes
/// the fresh index snapshots and closes the instance cleanly.
pub fn run(path: &Path, bag: &str, workers: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = BagConfig::default()
        .force_rebuild(true)
        .rebuild_workers(workers);
    let instance = open_instance(path, config)?;
    if !instance.bag_names()?.iter().any(|name| name == bag) {
        return Err(format!("No bag named {bag:?} at {}", path.display()).into());
    }

    let opened = instance.bag(bag)?;
    let report = opened.recovery_report().unwrap_or_default();
    let indexes = opened.index_names()?.len();
    opened.flush()?;
    instance.close()?;

    println!(
        "Rebuilt {indexes} indexes of bag {bag}: {} records, {} entries",
        report.records,
        report.entries
    );
    Ok(())
}
