//! Per-conversion state
//!
//! A [`ParseContext`] is created for every conversion and dropped at its end.
//! It owns the [`Bundle`] being built, remembers the in-progress record of
//! each resource type, memoizes handler lookups by structure name and carries
//! the issue sink injected by the caller.

use crate::bundle::Bundle;
use crate::config::EngineConfig;
use crate::issues::{Issue, IssueSink};
use crate::message::Segment;
use crate::path::AttributePath;
use crate::resources::RecordKey;
use crate::rules::{CompiledHandler, HandlerRegistry, ResourceBinding, RuleContext};
use std::collections::HashMap;
use tracing::trace;

pub struct ParseContext<'r, 's> {
    registry: &'r HandlerRegistry,
    resolved: HashMap<String, Option<&'r CompiledHandler>>,
    bundle: Bundle,
    current: HashMap<String, RecordKey>,
    sink: &'s mut dyn IssueSink,
    reported: usize,
}

impl<'r, 's> ParseContext<'r, 's> {
    pub fn new(registry: &'r HandlerRegistry, config: &EngineConfig, sink: &'s mut dyn IssueSink) -> Self {
        Self {
            registry,
            resolved: HashMap::new(),
            bundle: Bundle::new(config),
            current: HashMap::new(),
            sink,
            reported: 0,
        }
    }

    /// Handler for a structure type, looked up once per conversion
    pub fn resolve(&mut self, structure: &str) -> Option<&'r CompiledHandler> {
        if let Some(handler) = self.resolved.get(structure) {
            return *handler;
        }
        let handler = self.registry.resolve(structure);
        trace!("Resolved {} -> {}", structure, handler.is_some());
        self.resolved.insert(structure.to_string(), handler);
        handler
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }

    /// The in-progress record of a type
    pub fn current(&self, resource_type: &str) -> Option<RecordKey> {
        self.current.get(resource_type).copied()
    }

    /// Pick or create the record a handler writes to and mark it in progress
    pub fn bind(&mut self, binding: &ResourceBinding, segment: Option<&Segment>) -> RecordKey {
        let key = match binding {
            ResourceBinding::Create(resource_type) => self.bundle.create(resource_type),
            ResourceBinding::Reuse(resource_type) => self
                .current(resource_type)
                .or_else(|| self.bundle.get_last(resource_type))
                .unwrap_or_else(|| self.bundle.create(resource_type)),
            ResourceBinding::FindById { resource_type, id } => {
                let id = segment
                    .and_then(|s| id.extract(s).into_iter().next())
                    .and_then(|raw| raw.text());
                self.bundle.find(resource_type, id)
            }
        };
        self.current
            .insert(binding.resource_type().to_string(), key);
        key
    }

    /// Forward an issue to the sink
    pub fn report(&mut self, issue: Issue) {
        self.reported += 1;
        self.sink.report(issue);
    }

    /// Number of issues reported so far
    pub fn reported(&self) -> usize {
        self.reported
    }

    pub(crate) fn rule_context<'a>(
        &'a mut self,
        resource: RecordKey,
        segment: Option<&'a Segment>,
        location: &'a str,
        target: Option<&'a AttributePath>,
    ) -> RuleContext<'a> {
        RuleContext {
            bundle: &mut self.bundle,
            current: &self.current,
            resource,
            segment,
            location,
            target,
        }
    }

    pub fn into_bundle(self) -> Bundle {
        self.bundle
    }
}
