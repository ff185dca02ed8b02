//! Engine configuration
//!
//! Configuration is optional: every field has a default and an engine built
//! from [`EngineConfig::default`] behaves the same as one built from an empty
//! file. Files may be TOML, YAML or JSON, picked by extension.
//!
//! ## Configuration Discovery
//!
//! [`ConfigLoader::auto_discover`] searches for `v2fhir.toml`, `v2fhir.yaml`,
//! `v2fhir.yml` and `v2fhir.json`, starting from a directory and moving up
//! until one is found or the filesystem root is reached.
//!
//! ## Example Configuration
//!
//! ```toml
//! idStrategy = "uuid"
//! mergeRoleIndices = true
//! validateCalendar = true
//! bundleType = "message"
//! logFilter = "v2fhir=debug"
//! ```

mod engine_config;
mod loader;

pub use engine_config::EngineConfig;
pub use loader::ConfigLoader;
