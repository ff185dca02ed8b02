//! The output collection of one conversion
//!
//! A [`Bundle`] owns the [`ResourceRegistry`] and the [`ReferenceIndex`] built
//! while converting a message and is handed back to the caller when the
//! conversion finishes. Handlers write references into resource content as
//! `{"reference": ...}` objects; [`Bundle::to_fhir_json`] rewrites them
//! through the reference index so merged records render as their survivor.
//!
//! A reference always uses the same base as the target entry's `fullUrl`:
//! `urn:uuid:<id>` for uuid ids, `Type/id` otherwise.

use crate::config::EngineConfig;
use crate::references::{HandleId, ReferenceHandle, ReferenceIndex};
use crate::resources::{IdStrategy, RecordKey, ResourceRecord, ResourceRegistry};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

#[derive(Debug)]
pub struct Bundle {
    registry: ResourceRegistry,
    references: ReferenceIndex,
    bundle_type: String,
    id_strategy: IdStrategy,
    timestamp: DateTime<Utc>,
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Bundle {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: ResourceRegistry::new(config.id_strategy),
            references: ReferenceIndex::new(config.merge_role_indices),
            bundle_type: config.bundle_type.clone(),
            id_strategy: config.id_strategy,
            timestamp: Utc::now(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub fn references(&self) -> &ReferenceIndex {
        &self.references
    }

    pub fn create(&mut self, resource_type: &str) -> RecordKey {
        self.registry.create(resource_type)
    }

    pub fn find(&mut self, resource_type: &str, id: Option<&str>) -> RecordKey {
        self.registry.find(resource_type, id)
    }

    pub fn get_first(&self, resource_type: &str) -> Option<RecordKey> {
        self.registry.get_first(resource_type)
    }

    pub fn get_last(&self, resource_type: &str) -> Option<RecordKey> {
        self.registry.get_last(resource_type)
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<RecordKey> {
        self.registry.get(resource_type, id)
    }

    pub fn record(&self, key: RecordKey) -> Option<&ResourceRecord> {
        self.registry.record(key)
    }

    pub fn record_mut(&mut self, key: RecordKey) -> Option<&mut ResourceRecord> {
        self.registry.record_mut(key)
    }

    /// Get the stable handle for `target`, linking it from `source`
    pub fn to_reference(&mut self, target: RecordKey, source: Option<RecordKey>, roles: &[&str]) -> HandleId {
        self.references.to_reference(&self.registry, target, source, roles)
    }

    /// FHIR Reference JSON for a handle, or `None` for an unknown handle
    pub fn reference_json(&self, id: HandleId) -> Option<Value> {
        let handle = self.references.handle(id)?;
        let record = self.registry.record(handle.target())?;
        let mut reference = Map::new();
        reference.insert("reference".into(), Value::String(self.full_url(record)));
        if let Some(display) = handle.display() {
            reference.insert("display".into(), Value::String(display.to_string()));
        }
        Some(Value::Object(reference))
    }

    /// Link `source` to `target` and return the Reference JSON to store
    pub fn link(&mut self, source: RecordKey, target: RecordKey, roles: &[&str]) -> Option<Value> {
        let id = self.to_reference(target, Some(source), roles);
        self.reference_json(id)
    }

    /// Collapse `merged` into `survivor`
    pub fn merge(&mut self, survivor: RecordKey, merged: RecordKey) {
        self.references.merge(&self.registry, survivor, merged);
    }

    /// Whether a record was merged away into another one
    pub fn is_merged(&self, key: RecordKey) -> bool {
        self.references.resolve_record(key) != key
    }

    /// Records that render as bundle entries, in creation order
    pub fn entries(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.registry.records().filter(|r| !self.is_merged(r.key()))
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render as a FHIR Bundle resource
    pub fn to_fhir_json(&self) -> Value {
        let entries: Vec<Value> = self
            .entries()
            .map(|record| {
                let mut resource = record.to_json();
                self.rewrite_references(&mut resource);
                json!({
                    "fullUrl": self.full_url(record),
                    "resource": resource,
                })
            })
            .collect();

        json!({
            "resourceType": "Bundle",
            "type": self.bundle_type,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            "entry": entries,
        })
    }

    /// `fullUrl` of a record, also used as the target of references to it
    pub fn full_url(&self, record: &ResourceRecord) -> String {
        match self.id_strategy {
            IdStrategy::Uuid if Uuid::parse_str(record.id()).is_ok() => {
                format!("urn:uuid:{}", record.id())
            }
            _ => record.reference(),
        }
    }

    fn rewrite_references(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("reference")
                    && let Some(rewritten) = self.resolve_reference(reference)
                {
                    let (target, handle) = rewritten;
                    map.insert("reference".into(), Value::String(target));
                    if let Some(handle) = handle {
                        if !map.contains_key("display")
                            && let Some(display) = handle.display()
                        {
                            map.insert("display".into(), Value::String(display.to_string()));
                        }
                        if !map.contains_key("identifier")
                            && let Some(identifier) = handle.identifier()
                        {
                            map.insert("identifier".into(), identifier.clone());
                        }
                    }
                }
                for child in map.values_mut() {
                    self.rewrite_references(child);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrite_references(item);
                }
            }
            _ => {}
        }
    }

    /// Resolve `urn:uuid:<id>` or `Type/id` to the surviving record's
    /// reference and handle
    fn resolve_reference(&self, reference: &str) -> Option<(String, Option<&ReferenceHandle>)> {
        let key = match reference.strip_prefix("urn:uuid:") {
            Some(id) => self.registry.records().find(|r| r.id() == id)?.key(),
            None => {
                let (resource_type, id) = reference.split_once('/')?;
                self.registry.get(resource_type, id)?
            }
        };
        let survivor = self.references.resolve_record(key);
        let record = self.registry.record(survivor)?;
        let handle = self
            .references
            .handle_of(survivor)
            .and_then(|h| self.references.handle(h));
        Some((self.full_url(record), handle))
    }
}
