//! Plan files: a target tree stored as JSON or TOML.
//!
//! ```toml
//! [[serial]]
//! leaf = "app:build"
//!
//! [[serial]]
//! [serial.parallel]
//! max_parallel = "cpuCount / 2"
//! children = [{ leaf = "app:test" }, { leaf = "app:lint" }]
//! ```

use std::fs;
use std::path::Path;

use crate::core::tree::TargetNode;
use crate::{mlog_debug, Error, Result};

/// Load a tree from a `.json` or `.toml` file.
pub fn load(path: &Path) -> Result<TargetNode> {
    mlog_debug!("plan::load path={}", path.display());
    let text = fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&text),
        Some("toml") => parse_toml(&text),
        other => Err(Error::Validation(format!(
            "Unsupported plan format {:?} for {}: expected .json or .toml",
            other.unwrap_or(""),
            path.display()
        ))),
    }
}

pub fn parse_json(text: &str) -> Result<TargetNode> {
    Ok(serde_json::from_str(text)?)
}

pub fn parse_toml(text: &str) -> Result<TargetNode> {
    Ok(toml::from_str(text)?)
}
