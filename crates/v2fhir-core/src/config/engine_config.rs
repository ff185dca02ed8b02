//! Engine configuration structure

use crate::error::{Result, V2FhirError};
use crate::resources::IdStrategy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const BUNDLE_TYPES: &[&str] = &[
    "document",
    "message",
    "transaction",
    "transaction-response",
    "batch",
    "batch-response",
    "history",
    "searchset",
    "collection",
];

/// Settings that shape one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How process-local resource ids are assigned
    pub id_strategy: IdStrategy,

    /// Move links of a merged record onto its survivor
    pub merge_role_indices: bool,

    /// Reject temporal values that are not real calendar dates
    pub validate_calendar: bool,

    /// `Bundle.type` of the rendered output
    pub bundle_type: String,

    /// Filter used by [`crate::init_tracing`] when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::Sequential,
            merge_role_indices: true,
            validate_calendar: true,
            bundle_type: "message".to_string(),
            log_filter: "v2fhir=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a `.toml`, `.yaml`/`.yml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path).map_err(|e| {
            V2FhirError::config_error(format!(
                "Failed to load config from '{}': {:#}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).context("cannot read file")?;
        let ext = path.extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => toml::from_str(&content).context("invalid TOML"),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).context("invalid YAML"),
            Some("json") => serde_json::from_str(&content).context("invalid JSON"),
            _ => anyhow::bail!("unsupported file extension (expected .toml, .yaml, .yml, or .json)"),
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if !BUNDLE_TYPES.contains(&self.bundle_type.as_str()) {
            return Err(V2FhirError::config_error(format!(
                "Unknown bundle type '{}'",
                self.bundle_type
            )));
        }
        if self.log_filter.trim().is_empty() {
            return Err(V2FhirError::config_error("logFilter must not be empty"));
        }
        Ok(())
    }
}
