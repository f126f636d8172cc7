//! Instance directory management.
//!
//! An on-disk instance is laid out as:
//!
//! ```text
//! <instance>/
//! ├─ MANIFEST                  # Shutdown marker and index definitions
//! ├─ LOCK                      # Advisory lock for single-process access
//! ├─ bags/<bag>.records        # Record log per bag
//! └─ indexes/<bag>/<index>.idx # Index snapshots
//! ```
//!
//! The LOCK file ensures only one process opens the instance at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const BAGS_DIR: &str = "bags";
const INDEXES_DIR: &str = "indexes";
const RECORDS_EXTENSION: &str = "records";

/// Owns an instance directory and its advisory lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct InstanceDir {
    path: PathBuf,
    _lock_file: File,
}

impl InstanceDir {
    /// Opens or creates an instance directory.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Configuration`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - [`CoreError::InstanceLocked`] if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::configuration(format!(
                    "instance directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::configuration(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::InstanceLocked);
        }

        fs::create_dir_all(path.join(BAGS_DIR))?;
        fs::create_dir_all(path.join(INDEXES_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the instance.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Directory holding the record logs.
    #[must_use]
    pub fn bags_dir(&self) -> PathBuf {
        self.path.join(BAGS_DIR)
    }

    /// Directory holding index snapshots.
    #[must_use]
    pub fn indexes_dir(&self) -> PathBuf {
        self.path.join(INDEXES_DIR)
    }

    /// Names of the bags with a record log, sorted.
    pub fn bag_names(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.bags_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORDS_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Whether `name` can name a bag: it becomes a file name.
#[must_use]
pub fn is_valid_bag_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_layout() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("instance");

        let dir = InstanceDir::open(&root, true).unwrap();
        assert!(dir.bags_dir().is_dir());
        assert!(dir.indexes_dir().is_dir());
        assert_eq!(dir.manifest_path(), root.join("MANIFEST"));
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = InstanceDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _first = InstanceDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            InstanceDir::open(temp.path(), true),
            Err(CoreError::InstanceLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _dir = InstanceDir::open(temp.path(), true).unwrap();
        }
        let _again = InstanceDir::open(temp.path(), true).unwrap();
    }

    #[test]
    fn bag_names_lists_record_logs() {
        let temp = tempdir().unwrap();
        let dir = InstanceDir::open(temp.path(), true).unwrap();
        fs::write(dir.bags_dir().join("people.records"), b"").unwrap();
        fs::write(dir.bags_dir().join("orders.records"), b"").unwrap();
        fs::write(dir.bags_dir().join("notes.txt"), b"").unwrap();
        assert_eq!(dir.bag_names().unwrap(), ["orders", "people"]);
    }

    #[test]
    fn bag_names_must_be_file_safe() {
        assert!(is_valid_bag_name("people"));
        assert!(is_valid_bag_name("order-lines_2"));
        assert!(!is_valid_bag_name(""));
        assert!(!is_valid_bag_name("../etc"));
        assert!(!is_valid_bag_name(".hidden"));
        assert!(!is_valid_bag_name("a/b"));
    }
}
