//! Verify command implementation.

use super::open_instance;
use bagstore_core::BagConfig;
use std::path::Path;

/// Outcome of verifying one bag.
#[derive(Debug)]
pub struct VerifyResult {
    /// Bag name.
    pub bag: String,
    /// Live records checked, or the failure.
    pub outcome: Result<u64, String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs the verify command.
///
/// Records are decoded without opening the bags, so no index is rebuilt.
pub fn run(path: &Path, bag: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying instance at {}", path.display());
    println!();

    let instance = open_instance(path, BagConfig::default())?;
    let names = instance.bag_names()?;
    let names = match bag {
        Some(name) if names.iter().any(|n| n == name) => vec![name.to_string()],
        Some(name) => return Err(format!("No bag named {name:?} at {}", path.display()).into()),
        None => names,
    };

    let results: Vec<VerifyResult> = names
        .into_iter()
        .map(|name| VerifyResult {
            outcome: instance.verify_bag(&name).map_err(|e| e.to_string()),
            bag: name,
        })
        .collect();
    instance.close()?;

    for result in &results {
        print_result(result);
    }

    println!();
    if results.iter().all(VerifyResult::is_ok) {
        println!("✓ Instance verification passed");
        Ok(())
    } else {
        println!("✗ Instance verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(result: &VerifyResult) {
    match &result.outcome {
        Ok(records) => println!("  {:<24} ✓ {records} records", result.bag),
        Err(e) => println!("  {:<24} ✗ {e}", result.bag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagstore_core::{Entity, Instance};
    use tempfile::tempdir;

    #[test]
    fn healthy_instance_passes() {
        let temp = tempdir().unwrap();
        {
            let instance = Instance::open(temp.path(), BagConfig::default()).unwrap();
            instance
                .bag("people")
                .unwrap()
                .insert(Entity::new().with("age", 1))
                .unwrap();
            instance.close().unwrap();
        }
        run(temp.path(), None).unwrap();
        run(temp.path(), Some("people")).unwrap();
    }

    #[test]
    fn missing_instance_fails() {
        let temp = tempdir().unwrap();
        assert!(run(&temp.path().join("missing"), None).is_err());
    }
}
