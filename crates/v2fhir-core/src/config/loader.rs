//! Configuration file discovery and loading

use super::engine_config::EngineConfig;
use crate::error::{Result, V2FhirError};
use std::path::{Path, PathBuf};

const CONFIG_FILES: &[&str] = &["v2fhir.toml", "v2fhir.yaml", "v2fhir.yml", "v2fhir.json"];

/// Configuration loader for discovering and loading config files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Auto-discover a config file by traversing upward from `start_path`
    ///
    /// Searches each directory for, in order: `v2fhir.toml`, `v2fhir.yaml`,
    /// `v2fhir.yml`, `v2fhir.json`.
    pub fn auto_discover(start_path: &Path) -> Result<Option<PathBuf>> {
        let mut current = start_path
            .canonicalize()
            .map_err(|e| V2FhirError::config_error(format!("Invalid path: {e}")))?;

        loop {
            for filename in CONFIG_FILES {
                let config_path = current.join(filename);
                if config_path.is_file() {
                    tracing::debug!("Found config: {}", config_path.display());
                    return Ok(Some(config_path));
                }
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<EngineConfig> {
        EngineConfig::load(path)
    }

    /// Load config from a path, or discover one from `start_dir`
    ///
    /// An explicit path must exist. Without one, a missing config file means
    /// the defaults.
    pub fn load(custom_path: Option<&Path>, start_dir: Option<&Path>) -> Result<EngineConfig> {
        if let Some(path) = custom_path {
            if !path.exists() {
                return Err(V2FhirError::config_error(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Self::load_from_file(path);
        }

        let search_dir = start_dir.unwrap_or_else(|| Path::new("."));
        match Self::auto_discover(search_dir)? {
            Some(path) => Self::load_from_file(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(EngineConfig::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::IdStrategy;
    use std::fs;
    use tempfile::TempDir;

    fn create_temp_config(dir: &Path, filename: &str, content: &str) -> PathBuf {
        let path = dir.join(filename);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_from_file_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_temp_config(
            temp_dir.path(),
            "v2fhir.toml",
            "idStrategy = \"uuid\"\nvalidateCalendar = false\n",
        );
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.id_strategy, IdStrategy::Uuid);
        assert!(!config.validate_calendar);
    }

    #[test]
    fn test_load_from_file_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_temp_config(temp_dir.path(), "v2fhir.yaml", "bundleType: collection\n");
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.bundle_type, "collection");
    }

    #[test]
    fn test_auto_discover() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        create_temp_config(temp_dir.path(), "v2fhir.json", r#"{"mergeRoleIndices": false}"#);

        let found = ConfigLoader::auto_discover(&nested).unwrap();
        assert!(found.is_some());
        let config = ConfigLoader::load(None, Some(&nested)).unwrap();
        assert!(!config.merge_role_indices);
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_temp_config(temp_dir.path(), "v2fhir.json", r#"{"bundleType": "bag"}"#);
        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn test_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_temp_config(temp_dir.path(), "v2fhir.ini", "x=1");
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Some(Path::new("nonexistent.toml")), None);
        assert!(result.is_err());
    }
}
