//! Output resource store for one conversion
//!
//! [`ResourceRegistry`] owns every [`ResourceRecord`] created while converting
//! a message, in creation order. Records are addressed by [`RecordKey`], which
//! stays valid for the lifetime of the registry. Lookups never fail loudly:
//! absence is always `None`.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stable key of a record inside its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(usize);

impl RecordKey {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How process-local identifiers are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// `"1"`, `"2"`, ... in creation order
    #[default]
    Sequential,
    /// Random v4 UUIDs
    Uuid,
}

/// One typed output resource
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    key: RecordKey,
    resource_type: String,
    id: String,
    sequence: u64,
    created: DateTime<Utc>,
    content: Value,
}

impl ResourceRecord {
    pub fn key(&self) -> RecordKey {
        self.key
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 1-based creation sequence within the conversion
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Resource body without `resourceType` and `id`
    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Value {
        &mut self.content
    }

    /// `Type/id`
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Full FHIR JSON with `resourceType` and `id` leading
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("resourceType".into(), Value::String(self.resource_type.clone()));
        map.insert("id".into(), Value::String(self.id.clone()));
        if let Value::Object(body) = &self.content {
            for (k, v) in body {
                if k != "resourceType" && k != "id" {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(map)
    }
}

/// Creates, finds and indexes the records of one conversion
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    records: Vec<ResourceRecord>,
    /// Record keys by type, in creation order
    by_type: IndexMap<String, Vec<RecordKey>>,
    /// (type, id) → key
    by_id: HashMap<(String, String), RecordKey>,
    strategy: IdStrategy,
    next_id: u64,
}

impl ResourceRegistry {
    pub fn new(strategy: IdStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Always create a new record of `resource_type`
    pub fn create(&mut self, resource_type: &str) -> RecordKey {
        self.insert(resource_type, None)
    }

    /// Return the record of `resource_type` with `id`, creating it when absent
    pub fn find(&mut self, resource_type: &str, id: Option<&str>) -> RecordKey {
        match id {
            Some(id) => match self.get(resource_type, id) {
                Some(key) => key,
                None => self.insert(resource_type, Some(id.to_string())),
            },
            None => self.create(resource_type),
        }
    }

    /// First record of `resource_type`; a missing one is logged
    pub fn get_first(&self, resource_type: &str) -> Option<RecordKey> {
        let first = self
            .by_type
            .get(resource_type)
            .and_then(|keys| keys.first())
            .copied();
        if first.is_none() {
            warn!("No {} resource has been created yet", resource_type);
        }
        first
    }

    /// Most recently created record of `resource_type`
    pub fn get_last(&self, resource_type: &str) -> Option<RecordKey> {
        self.by_type
            .get(resource_type)
            .and_then(|keys| keys.last())
            .copied()
    }

    /// Exact lookup by type and identifier
    pub fn get(&self, resource_type: &str, id: &str) -> Option<RecordKey> {
        self.by_id
            .get(&(resource_type.to_string(), id.to_string()))
            .copied()
    }

    pub fn record(&self, key: RecordKey) -> Option<&ResourceRecord> {
        self.records.get(key.0)
    }

    pub fn record_mut(&mut self, key: RecordKey) -> Option<&mut ResourceRecord> {
        self.records.get_mut(key.0)
    }

    /// All records in creation order
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.iter()
    }

    /// Records of one type in creation order
    pub fn of_type<'a>(&'a self, resource_type: &str) -> impl Iterator<Item = &'a ResourceRecord> {
        self.by_type
            .get(resource_type)
            .into_iter()
            .flatten()
            .filter_map(|key| self.records.get(key.0))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, resource_type: &str, id: Option<String>) -> RecordKey {
        let key = RecordKey(self.records.len());
        let id = id.unwrap_or_else(|| self.generate_id(resource_type));
        let sequence = self.records.len() as u64 + 1;

        debug!("Creating {}/{} (sequence {})", resource_type, id, sequence);
        self.by_type
            .entry(resource_type.to_string())
            .or_default()
            .push(key);
        self.by_id.insert((resource_type.to_string(), id.clone()), key);
        self.records.push(ResourceRecord {
            key,
            resource_type: resource_type.to_string(),
            id,
            sequence,
            created: Utc::now(),
            content: Value::Object(Map::new()),
        });
        key
    }

    fn generate_id(&mut self, resource_type: &str) -> String {
        match self.strategy {
            IdStrategy::Uuid => Uuid::new_v4().to_string(),
            IdStrategy::Sequential => loop {
                self.next_id += 1;
                let candidate = self.next_id.to_string();
                // Explicit ids may already occupy a number
                if !self
                    .by_id
                    .contains_key(&(resource_type.to_string(), candidate.clone()))
                {
                    break candidate;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_assigns_sequential_ids() {
        let mut registry = ResourceRegistry::default();
        let a = registry.create("Patient");
        let b = registry.create("Observation");
        let c = registry.create("Observation");

        assert_eq!(registry.record(a).unwrap().id(), "1");
        assert_eq!(registry.record(b).unwrap().id(), "2");
        assert_eq!(registry.record(c).unwrap().sequence(), 3);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.of_type("Observation").count(), 2);
    }

    #[test]
    fn test_first_and_last() {
        let mut registry = ResourceRegistry::default();
        assert_eq!(registry.get_first("Observation"), None);
        assert_eq!(registry.get_last("Observation"), None);

        let first = registry.create("Observation");
        registry.create("Patient");
        let last = registry.create("Observation");

        assert_eq!(registry.get_first("Observation"), Some(first));
        assert_eq!(registry.get_last("Observation"), Some(last));
    }

    #[test]
    fn test_find_reuses_or_creates() {
        let mut registry = ResourceRegistry::default();
        let a = registry.find("Practitioner", Some("dr-1"));
        let b = registry.find("Practitioner", Some("dr-1"));
        let c = registry.find("Practitioner", Some("dr-2"));
        let d = registry.find("Practitioner", None);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.record(c).unwrap().id(), "dr-2");
        assert_ne!(d, c);
        assert_eq!(registry.get("Practitioner", "dr-1"), Some(a));
        assert_eq!(registry.get("Patient", "dr-1"), None);
        // Same id under another type is a different record
        let other = registry.find("Patient", Some("dr-1"));
        assert_ne!(other, a);
    }

    #[test]
    fn test_sequential_ids_skip_explicit_ones() {
        let mut registry = ResourceRegistry::default();
        registry.find("Patient", Some("1"));
        let generated = registry.create("Patient");
        assert_eq!(registry.record(generated).unwrap().id(), "2");
    }

    #[test]
    fn test_uuid_strategy() {
        let mut registry = ResourceRegistry::new(IdStrategy::Uuid);
        let key = registry.create("Patient");
        let id = registry.record(key).unwrap().id().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_to_json_puts_type_and_id_first() {
        let mut registry = ResourceRegistry::default();
        let key = registry.create("Patient");
        *registry.record_mut(key).unwrap().content_mut() = json!({"active": true});
        let rendered = registry.record(key).unwrap().to_json();
        let keys: Vec<_> = rendered.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["resourceType", "id", "active"]);
        assert_eq!(registry.record(key).unwrap().reference(), "Patient/1");
    }
}
