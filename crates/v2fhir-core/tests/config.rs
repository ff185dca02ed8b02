//! Engine configuration loaded from disk

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use v2fhir_core::{
    ConfigLoader, EngineConfig, HandlerRegistry, HandlerRule, IdStrategy, Issue, MessageConverter,
    ResourceBinding, StructureHandler, V2FhirError,
};

const ADT: &str = "MSH|^~\\&|ADM|HOSP|EHR|HOSP|20240115103000||ADT^A01^ADT_A01|MSG002|P|2.5.1\r\
PID|1||123^^^HOSP^MR||Doe^Jane||19800230|F\r";

fn converter(config: EngineConfig) -> MessageConverter {
    let registry = HandlerRegistry::builder()
        .register(
            StructureHandler::new("PID", ResourceBinding::Reuse("Patient".into())).rules([
                HandlerRule::at("5", "name[+]", "XPN"),
                HandlerRule::at("7", "birthDate", "date"),
            ]),
        )
        .build()
        .unwrap();
    MessageConverter::new(Arc::new(registry)).with_config(config)
}

#[test]
fn discovered_toml_config_shapes_the_bundle() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("v2fhir.toml"),
        r#"
idStrategy = "uuid"
bundleType = "collection"
validateCalendar = false
"#,
    )
    .unwrap();
    let nested = dir.path().join("inbound/today");
    fs::create_dir_all(&nested).unwrap();

    let config = ConfigLoader::load(None, Some(&nested)).unwrap();
    assert_eq!(config.id_strategy, IdStrategy::Uuid);
    assert!(config.merge_role_indices);

    let rendered = converter(config).convert_er7(ADT).unwrap().to_fhir_json();
    assert_eq!(rendered["type"], "collection");

    let entry = &rendered["entry"][0];
    let id = entry["resource"]["id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert_eq!(entry["fullUrl"], format!("urn:uuid:{id}"));
    // Calendar checks are off, so Feb 30 passes through
    assert_eq!(entry["resource"]["birthDate"], "1980-02-30");
}

#[test]
fn calendar_validation_is_on_by_default() {
    let dir = TempDir::new().unwrap();
    let config = ConfigLoader::load(None, Some(dir.path())).unwrap();
    assert_eq!(config, EngineConfig::default());

    let mut issues: Vec<Issue> = Vec::new();
    let bundle = converter(config).convert_er7_with(ADT, &mut issues).unwrap();
    let patient = bundle.get_first("Patient").unwrap();
    let content = bundle.record(patient).unwrap().content();
    assert!(content.get("birthDate").is_none());
    assert_eq!(content["name"][0]["family"], "Doe");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].rule.as_deref(), Some("PID-7"));
}

#[test]
fn explicit_yaml_config_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.yaml");
    fs::write(&path, "mergeRoleIndices: false\nlogFilter: v2fhir=debug\n").unwrap();

    let config = ConfigLoader::load(Some(&path), None).unwrap();
    assert!(!config.merge_role_indices);
    assert_eq!(config.log_filter, "v2fhir=debug");
    assert_eq!(config.id_strategy, IdStrategy::Sequential);
}

#[test]
fn invalid_configs_are_rejected() {
    let dir = TempDir::new().unwrap();

    let unknown_key = dir.path().join("unknown.json");
    fs::write(&unknown_key, r#"{"bundleKind": "message"}"#).unwrap();
    assert!(matches!(
        ConfigLoader::load(Some(&unknown_key), None),
        Err(V2FhirError::Config { .. })
    ));

    let bad_type = dir.path().join("bad.toml");
    fs::write(&bad_type, "bundleType = \"pile\"\n").unwrap();
    assert!(matches!(
        ConfigLoader::load(Some(&bad_type), None),
        Err(V2FhirError::Config { .. })
    ));

    let missing = dir.path().join("missing.toml");
    assert!(ConfigLoader::load(Some(&missing), None).is_err());
}
