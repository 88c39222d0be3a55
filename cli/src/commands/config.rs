//! `bastionctl config {set|show}` -- edits the daemon configuration
//! document in place, atomically, with a reload check so a bad value
//! never lands.

use crate::error::{BadConfigKey, Result};
use upgrade_daemon::{common::file, config::UpgradeConfig, workdir::WorkDir};

pub fn show(workdir: &WorkDir) -> Result<()> {
    let config = UpgradeConfig::load(workdir)?;
    println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
    Ok(())
}

/// Set one field by dotted key, e.g. `workers.pool_size 8`. The value is
/// parsed as JSON first so numbers and booleans keep their types.
pub fn set(workdir: &WorkDir, key: &str, value: &str) -> Result<()> {
    let path = workdir.config_file();
    let mut document: serde_json::Value =
        file::read_json_opt(&path)?.unwrap_or_else(|| serde_json::json!({}));

    let parsed: serde_json::Value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    let mut cursor = &mut document;
    let segments: Vec<&str> = key.split('.').collect();
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return BadConfigKey { key }.fail();
        }
        if idx == segments.len() - 1 {
            let object = cursor.as_object_mut().ok_or_else(|| {
                BadConfigKey { key }.build()
            })?;
            object.insert(segment.to_string(), parsed.clone());
        } else {
            let object = cursor.as_object_mut().ok_or_else(|| {
                BadConfigKey { key }.build()
            })?;
            cursor = object
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::json!({}));
        }
    }

    // Round-trip through the typed config so an invalid edit is rejected
    // before it reaches the daemon.
    let reparsed: std::result::Result<UpgradeConfig, _> =
        serde_json::from_value(document.clone());
    if reparsed.is_err() {
        return BadConfigKey { key }.fail();
    }

    file::write_json_atomic(&path, &document)?;
    console_logger::info_with_data("Configuration updated:", key);
    Ok(())
}
