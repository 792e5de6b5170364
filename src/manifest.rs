//! YAML manifest of resources used as the initial listing.
//!
//! ```yaml
//! items:
//!   - metadata:
//!       namespace: default
//!       name: example
//!     spec:
//!       replicas: 3
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::sample::SampleResource;

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    items: Vec<SampleResource>,
}

/// Parse a manifest document.
///
/// # Errors
///
/// Returns an error if the document is not valid manifest YAML.
pub fn parse(raw: &str) -> Result<Vec<SampleResource>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let manifest: Manifest = serde_yaml::from_str(raw).context("Invalid manifest YAML")?;
    Ok(manifest.items)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load(path: &Path) -> Result<Vec<SampleResource>> {
    debug!(path = %path.display(), "Loading manifest");
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    parse(&raw).with_context(|| format!("Failed to parse manifest {}", path.display()))
}
