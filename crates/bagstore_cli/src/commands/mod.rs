//! CLI command implementations.

pub mod inspect;
pub mod rebuild;
pub mod verify;

use bagstore_core::{BagConfig, Instance};
use std::path::Path;

/// Opens an existing instance; maintenance commands never create one.
fn open_instance(path: &Path, config: BagConfig) -> Result<Instance, Box<dyn std::error::Error>> {
    Ok(Instance::open(path, config.create_if_missing(false))?)
}
