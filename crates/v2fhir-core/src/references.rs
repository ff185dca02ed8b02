//! Identity-stable references between output resources
//!
//! Each record gets at most one [`ReferenceHandle`], created the first time
//! anything refers to it. Handles live in an arena owned by the
//! [`ReferenceIndex`] and are addressed by [`HandleId`], so every holder of a
//! handle observes later changes to it (new roles, a merge redirect).
//!
//! Links between records form a directed graph. An edge `source → target`
//! carries the set of role names it was created under; the reverse direction
//! is answered from the same edges.
//!
//! Merging two records redirects the merged record's handle to the survivor.
//! Nothing is deleted: the merged record stays in the registry but is no
//! longer reachable through any handle.

use crate::resources::{RecordKey, ResourceRegistry};
use indexmap::IndexSet;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Arena index of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

/// Cross-reference to one record
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceHandle {
    id: HandleId,
    /// Record the handle was created for
    origin: RecordKey,
    /// Record the handle currently resolves to
    target: RecordKey,
    identifier: Option<Value>,
    display: Option<String>,
    roles: IndexSet<String>,
}

impl ReferenceHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn origin(&self) -> RecordKey {
        self.origin
    }

    pub fn target(&self) -> RecordKey {
        self.target
    }

    /// Business identifier copied from the target
    pub fn identifier(&self) -> Option<&Value> {
        self.identifier.as_ref()
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    fn set_identifier(&mut self, identifier: Value) {
        if self.identifier.is_none() {
            self.identifier = Some(identifier);
        }
    }

    fn set_display(&mut self, display: String) {
        if self.display.is_none() && !display.is_empty() {
            self.display = Some(display);
        }
    }
}

/// Handle arena plus the role-tagged reference graph
#[derive(Debug)]
pub struct ReferenceIndex {
    handles: Vec<ReferenceHandle>,
    by_record: HashMap<RecordKey, HandleId>,
    graph: DiGraph<RecordKey, IndexSet<String>>,
    nodes: HashMap<RecordKey, NodeIndex>,
    merge_role_indices: bool,
}

impl Default for ReferenceIndex {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ReferenceIndex {
    /// With `merge_role_indices`, a merge moves the merged record's links onto
    /// the survivor; without it the links stay where they were created
    pub fn new(merge_role_indices: bool) -> Self {
        Self {
            handles: Vec::new(),
            by_record: HashMap::new(),
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            merge_role_indices,
        }
    }

    /// Return the handle for `target`, recording a link from `source` under
    /// `roles`
    pub fn to_reference(
        &mut self,
        registry: &ResourceRegistry,
        target: RecordKey,
        source: Option<RecordKey>,
        roles: &[&str],
    ) -> HandleId {
        let id = self.handle_for(registry, target);
        let handle = &mut self.handles[id.0];
        for role in roles {
            handle.roles.insert((*role).to_string());
        }
        let resolved = handle.target;

        if let Some(source) = source {
            trace!("Linking {} -> {} as {:?}", source, resolved, roles);
            self.link(source, resolved, roles);
        }
        id
    }

    /// Look up or create the handle for a record, refreshing the identifier
    /// and display from its current content
    fn handle_for(&mut self, registry: &ResourceRegistry, record: RecordKey) -> HandleId {
        let id = match self.by_record.get(&record) {
            Some(id) => *id,
            None => {
                let id = HandleId(self.handles.len());
                self.handles.push(ReferenceHandle {
                    id,
                    origin: record,
                    target: record,
                    identifier: None,
                    display: None,
                    roles: IndexSet::new(),
                });
                self.by_record.insert(record, id);
                id
            }
        };

        let target = self.handles[id.0].target;
        if let Some(content) = registry.record(target).map(|r| r.content()) {
            let handle = &mut self.handles[id.0];
            if let Some(identifier) = discover_identifier(content) {
                handle.set_identifier(identifier);
            }
            if let Some(display) = discover_display(content) {
                handle.set_display(display);
            }
        }
        id
    }

    pub fn handle(&self, id: HandleId) -> Option<&ReferenceHandle> {
        self.handles.get(id.0)
    }

    /// The handle already created for a record
    pub fn handle_of(&self, record: RecordKey) -> Option<HandleId> {
        self.by_record.get(&record).copied()
    }

    /// Record a handle currently points at
    pub fn resolve(&self, id: HandleId) -> Option<RecordKey> {
        self.handles.get(id.0).map(|h| h.target)
    }

    /// Record that `record` resolves to after any merges
    pub fn resolve_record(&self, record: RecordKey) -> RecordKey {
        self.handle_of(record)
            .and_then(|id| self.resolve(id))
            .unwrap_or(record)
    }

    /// Set the display if none was set before
    pub fn set_display(&mut self, id: HandleId, display: impl Into<String>) {
        if let Some(handle) = self.handles.get_mut(id.0) {
            handle.set_display(display.into());
        }
    }

    /// Set the identifier if none was set before
    pub fn set_identifier(&mut self, id: HandleId, identifier: Value) {
        if let Some(handle) = self.handles.get_mut(id.0) {
            handle.set_identifier(identifier);
        }
    }

    /// Collapse `merged` into `survivor`
    ///
    /// Every handle resolving to the merged record is redirected to the
    /// survivor. The survivor's identifier and display are backfilled from
    /// the merged handle when unset. Merging records that already resolve to
    /// the same identity does nothing.
    pub fn merge(&mut self, registry: &ResourceRegistry, survivor: RecordKey, merged: RecordKey) {
        let survivor_id = self.handle_for(registry, survivor);
        let merged_id = self.handle_for(registry, merged);
        let into = self.handles[survivor_id.0].target;
        let from = self.handles[merged_id.0].target;
        if into == from {
            trace!("{} already merged into {}", merged, survivor);
            return;
        }

        debug!("Merging {} into {}", from, into);
        for handle in self.handles.iter_mut().filter(|h| h.target == from) {
            handle.target = into;
        }

        let (identifier, display) = {
            let merged_handle = &self.handles[merged_id.0];
            (merged_handle.identifier.clone(), merged_handle.display.clone())
        };
        let survivor_handle = &mut self.handles[survivor_id.0];
        if let Some(identifier) = identifier {
            survivor_handle.set_identifier(identifier);
        }
        if let Some(display) = display {
            survivor_handle.set_display(display);
        }

        if self.merge_role_indices {
            self.move_links(from, into);
        }
    }

    /// Records linking to `record`, optionally only under `role`
    pub fn referenced_by(&self, record: RecordKey, role: Option<&str>) -> Vec<RecordKey> {
        self.neighbors(record, role, Direction::Incoming)
    }

    /// Records `record` links to, optionally only under `role`
    pub fn references_from(&self, record: RecordKey, role: Option<&str>) -> Vec<RecordKey> {
        self.neighbors(record, role, Direction::Outgoing)
    }

    /// Roles on the link `source → target`
    pub fn link_roles(&self, source: RecordKey, target: RecordKey) -> Vec<&str> {
        let (Some(a), Some(b)) = (self.nodes.get(&source), self.nodes.get(&target)) else {
            return Vec::new();
        };
        self.graph
            .find_edge(*a, *b)
            .and_then(|e| self.graph.edge_weight(e))
            .map(|roles| roles.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ReferenceHandle> {
        self.handles.iter()
    }

    fn neighbors(&self, record: RecordKey, role: Option<&str>, direction: Direction) -> Vec<RecordKey> {
        let Some(node) = self.nodes.get(&record) else {
            return Vec::new();
        };
        let mut found: Vec<RecordKey> = self
            .graph
            .edges_directed(*node, direction)
            .filter(|e| role.is_none_or(|r| e.weight().contains(r)))
            .map(|e| {
                let other = match direction {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                self.graph[other]
            })
            .collect();
        found.sort();
        found
    }

    fn node(&mut self, record: RecordKey) -> NodeIndex {
        if let Some(node) = self.nodes.get(&record) {
            return *node;
        }
        let node = self.graph.add_node(record);
        self.nodes.insert(record, node);
        node
    }

    fn link<S: AsRef<str>>(&mut self, source: RecordKey, target: RecordKey, roles: &[S]) {
        let a = self.node(source);
        let b = self.node(target);
        let edge = match self.graph.find_edge(a, b) {
            Some(edge) => edge,
            None => self.graph.add_edge(a, b, IndexSet::new()),
        };
        let weight = &mut self.graph[edge];
        for role in roles {
            weight.insert(role.as_ref().to_string());
        }
    }

    /// Re-home every link touching `from` onto `into`
    fn move_links(&mut self, from: RecordKey, into: RecordKey) {
        let Some(node) = self.nodes.get(&from).copied() else {
            return;
        };

        let mut moved: Vec<(RecordKey, RecordKey, Vec<String>)> = Vec::new();
        let mut stale: Vec<EdgeIndex> = Vec::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in self.graph.edges_directed(node, direction) {
                let source = self.graph[edge.source()];
                let target = self.graph[edge.target()];
                let source = if source == from { into } else { source };
                let target = if target == from { into } else { target };
                if source != target {
                    moved.push((source, target, edge.weight().iter().cloned().collect()));
                }
                stale.push(edge.id());
            }
        }

        // Removal swaps the last edge into the hole, so go from the top down
        stale.sort_unstable();
        stale.dedup();
        for edge in stale.into_iter().rev() {
            self.graph.remove_edge(edge);
        }
        for (source, target, roles) in moved {
            self.link(source, target, &roles);
        }
    }
}

/// First identifier in a resource body
fn discover_identifier(content: &Value) -> Option<Value> {
    let identifier = match content.get("identifier")? {
        Value::Array(items) => items.iter().find(|i| i.get("value").is_some())?,
        other => other,
    };
    identifier.get("value").is_some().then(|| identifier.clone())
}

/// Human-readable name of a resource body
fn discover_display(content: &Value) -> Option<String> {
    if let Some(name) = content.get("name") {
        let name = match name {
            Value::Array(items) => items.first()?,
            other => other,
        };
        if let Some(text) = name.as_str() {
            return Some(text.to_string());
        }
        if let Some(text) = name.get("text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        let mut parts: Vec<&str> = name
            .get("given")
            .and_then(Value::as_array)
            .map(|given| given.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(family) = name.get("family").and_then(Value::as_str) {
            parts.push(family);
        }
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
    }
    let code = content.get("code")?;
    code.get("text")
        .and_then(Value::as_str)
        .or_else(|| {
            code.get("coding")?
                .as_array()?
                .iter()
                .find_map(|c| c.get("display").and_then(Value::as_str))
        })
        .map(str::to_string)
}
