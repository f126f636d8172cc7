//! Inspect command implementation.

use super::open_instance;
use bagstore_core::{Bag, BagConfig};
use serde::Serialize;
use std::path::Path;

/// Instance inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Instance path.
    pub path: String,
    /// Whether the previous session closed the instance cleanly.
    pub last_shutdown_clean: bool,
    /// Per-bag statistics.
    pub bags: Vec<BagStats>,
}

/// Statistics for a single bag.
#[derive(Debug, Serialize)]
pub struct BagStats {
    /// Bag name.
    pub name: String,
    /// Number of live entities.
    pub entity_count: u64,
    /// Bytes used by the record log.
    pub disk_size: u64,
    /// Whether opening the bag ran recovery.
    pub recovered: bool,
    /// Declared indexes.
    pub indexes: Vec<IndexStats>,
}

/// Statistics for a single index.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    /// Index name.
    pub name: String,
    /// Key header, e.g. `age(long)`.
    pub key: String,
    /// Value header, empty without value fields.
    pub value: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Number of entries.
    pub entries: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, bag: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let instance = open_instance(path, BagConfig::from_env())?;
    let names = instance.bag_names()?;

    let selected: Vec<String> = match bag {
        Some(name) if names.iter().any(|n| n == name) => vec![name.to_string()],
        Some(name) => return Err(format!("No bag named {name:?} at {path:?}").into()),
        None => names,
    };

    let mut result = InspectResult {
        path: path.display().to_string(),
        last_shutdown_clean: instance.was_last_shutdown_clean(),
        bags: Vec::with_capacity(selected.len()),
    };
    for name in &selected {
        let bag = instance.bag(name)?;
        result.bags.push(bag_stats(&bag)?);
    }
    instance.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn bag_stats(bag: &Bag) -> Result<BagStats, Box<dyn std::error::Error>> {
    let mut indexes = Vec::new();
    for name in bag.index_names()? {
        let index = bag.index(&name)?;
        indexes.push(IndexStats {
            key: index.key_info().key_as_header(),
            value: index.key_info().value_as_header(),
            unique: index.is_unique(),
            entries: index.len(),
            name,
        });
    }
    Ok(BagStats {
        name: bag.name().to_string(),
        entity_count: bag.size()?,
        disk_size: bag.disk_size()?,
        recovered: bag.recovery_report().is_some(),
        indexes,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("BagStore Instance: {}", result.path);
    println!("═══════════════════════════════════════");
    println!(
        "Last shutdown: {}",
        if result.last_shutdown_clean {
            "clean"
        } else {
            "unclean"
        }
    );
    println!("Bags: {}", result.bags.len());

    for bag in &result.bags {
        println!();
        println!("Bag {}", bag.name);
        println!("  Entities:  {}", bag.entity_count);
        println!("  Disk size: {}", format_bytes(bag.disk_size));
        if bag.recovered {
            println!("  Indexes were rebuilt on open");
        }
        if bag.indexes.is_empty() {
            println!("  No indexes");
        }
        for index in &bag.indexes {
            let value = if index.value.is_empty() {
                String::new()
            } else {
                format!(" -> {}", index.value)
            };
            println!(
                "  Index {:<20} {}{}{}  ({} entries)",
                index.name,
                index.key,
                value,
                if index.unique { " unique" } else { "" },
                index.entries
            );
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagstore_core::{Entity, Instance, KeyField};
    use tempfile::tempdir;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn stats_cover_indexes() {
        let temp = tempdir().unwrap();
        let instance = Instance::open(temp.path(), BagConfig::default()).unwrap();
        let bag = instance.bag("people").unwrap();
        bag.ensure_index(&[KeyField::long("age")], false, &[KeyField::text("name", 16)])
            .unwrap();
        bag.insert(Entity::new().with("age", 30).with("name", "ann"))
            .unwrap();

        let stats = bag_stats(&bag).unwrap();
        assert_eq!(stats.entity_count, 1);
        assert_eq!(stats.indexes.len(), 1);
        assert_eq!(stats.indexes[0].key, "age(long)");
        assert_eq!(stats.indexes[0].entries, 1);
    }

    #[test]
    fn missing_bag_is_an_error() {
        let temp = tempdir().unwrap();
        Instance::open(temp.path(), BagConfig::default())
            .unwrap()
            .close()
            .unwrap();
        assert!(run(temp.path(), Some("nope"), "text").is_err());
    }
}
