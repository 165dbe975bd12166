//! `etl-sync check` command implementation
//!
//! Validates a schema file and shows how each entity is matched.

use colored::Colorize;
use etl_core::schema::{Cardinality, SchemaRegistry};
use std::path::Path;

use crate::error::Result;

/// Print every entity with its persistence key, then check the keys a
/// load of `entity` would need
pub fn run(schema: &Path, entity: Option<&str>, key: Option<&[String]>) -> Result<()> {
    let registry = SchemaRegistry::from_path(schema)?;

    println!("{}", "Entities:".cyan().bold());
    for def in registry.entities() {
        let key_text = match registry.persistence_key(&def.name, None) {
            Ok(key) if key.is_empty() => "(none, always created)".dimmed().to_string(),
            Ok(key) => key.fields().join(", "),
            Err(err) => format!("{}", err.to_string().red()),
        };
        println!("  {} [{}]", def.name.green(), key_text);
        for rel in &def.relationships {
            let arrow = match rel.cardinality {
                Cardinality::ToOne => "->",
                Cardinality::ToMany => "->>",
            };
            match rel.through {
                Some(ref through) => println!("    {} {} {} (via {})", rel.name, arrow, rel.target, through.entity),
                None => println!("    {} {} {}", rel.name, arrow, rel.target),
            }
        }
    }

    if let Some(root) = entity {
        registry.check_keys(root, key)?;
        let reachable = registry.reachable(root)?;
        println!();
        println!(
            "{} {} can be loaded ({} entities reachable)",
            "✓".green(),
            root,
            reachable.len()
        );
    }

    Ok(())
}
