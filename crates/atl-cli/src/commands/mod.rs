//! Command handler modules for atl-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod jobs;
pub mod users;

use std::sync::Arc;

use anyhow::{Context, Result};
use atl_config::{load_layered_yaml, report_unused_keys, UnusedKeyPolicy, WorkshopConfig};
use atl_db::{PgStore, Store};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Typed settings from layered YAML; built-in defaults when no path is given.
pub fn load_settings(paths: &[String]) -> Result<WorkshopConfig> {
    if paths.is_empty() {
        return Ok(WorkshopConfig::default());
    }
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_layered_yaml(&refs)?;
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for p in &report.unused_leaf_pointers {
        eprintln!("warning: unused config key {p}");
    }
    loaded.settings()
}

pub fn config_hash(paths: &[String], strict: bool) -> Result<()> {
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_layered_yaml(&refs)?;
    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(&loaded.config_json, policy)?;
    // Schema check: the hash of a config the daemon would refuse is useless.
    loaded.settings().context("config does not validate")?;

    println!("config_hash={}", loaded.config_hash);
    if !report.is_clean() {
        println!("unused_keys={}", report.unused_leaf_pointers.join(","));
    }
    println!("{}", loaded.canonical_json);
    Ok(())
}

pub async fn open_store() -> Result<Arc<dyn Store>> {
    let pool = atl_db::connect_from_env().await?;
    Ok(Arc::new(PgStore::new(pool)))
}
