//! Handler registration and rule ordering
//!
//! Handlers are collected in a [`HandlerRegistryBuilder`] and compiled once by
//! [`HandlerRegistryBuilder::build`]. Building validates every rule (known
//! converter, parseable target path, 1-based address) and sorts each
//! handler's rules by priority, highest first, keeping declaration order for
//! equal priorities. The resulting [`HandlerRegistry`] is immutable.

use super::rule::{Apply, HandlerRule, RuleContext, SourceAddress};
use crate::convert::{ConvertFn, ConverterRegistry};
use crate::error::{ConversionError, Result, V2FhirError};
use crate::path::AttributePath;
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::fmt;
use tracing::debug;

/// Hook run before or after a handler's rules
pub type HookFn = fn(&mut RuleContext<'_>) -> std::result::Result<(), ConversionError>;

/// Which resource a structure's rules write to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceBinding {
    /// A new record for every occurrence of the structure
    Create(String),
    /// The in-progress record of the type, created when there is none
    Reuse(String),
    /// The record whose id is read from the segment, created when absent
    FindById {
        resource_type: String,
        id: SourceAddress,
    },
}

impl ResourceBinding {
    pub fn resource_type(&self) -> &str {
        match self {
            ResourceBinding::Create(t) | ResourceBinding::Reuse(t) => t,
            ResourceBinding::FindById { resource_type, .. } => resource_type,
        }
    }
}

/// Rules and hooks declared for one structure type
#[derive(Debug, Clone)]
pub struct StructureHandler {
    structure: String,
    binding: ResourceBinding,
    rules: Vec<HandlerRule>,
    setup: Option<HookFn>,
    finish: Option<HookFn>,
}

impl StructureHandler {
    pub fn new(structure: impl Into<String>, binding: ResourceBinding) -> Self {
        Self {
            structure: structure.into(),
            binding,
            rules: Vec::new(),
            setup: None,
            finish: None,
        }
    }

    pub fn rule(mut self, rule: HandlerRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = HandlerRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Run before the rules, once the resource is bound
    pub fn setup(mut self, hook: HookFn) -> Self {
        self.setup = Some(hook);
        self
    }

    /// Run after every rule
    pub fn finish(mut self, hook: HookFn) -> Self {
        self.finish = Some(hook);
        self
    }
}

/// A validated rule ready for dispatch
#[derive(Clone)]
pub struct CompiledRule {
    /// `PID-5.1`
    pub label: String,
    pub source: SourceAddress,
    /// `None` only for custom rules without a target
    pub path: Option<AttributePath>,
    pub priority: i32,
    pub converter_name: String,
    pub converter: ConvertFn,
    pub apply: Apply,
    /// Position among the handler's declared rules
    pub declaration: usize,
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("label", &self.label)
            .field("path", &self.path.as_ref().map(ToString::to_string))
            .field("priority", &self.priority)
            .field("converter", &self.converter_name)
            .field("apply", &self.apply)
            .field("declaration", &self.declaration)
            .finish()
    }
}

/// A handler with its rules in execution order
#[derive(Debug, Clone)]
pub struct CompiledHandler {
    pub structure: String,
    pub binding: ResourceBinding,
    pub rules: Vec<CompiledRule>,
    pub setup: Option<HookFn>,
    pub finish: Option<HookFn>,
}

/// Collects handlers before they are compiled
#[derive(Debug, Default)]
pub struct HandlerRegistryBuilder {
    converters: ConverterRegistry,
    handlers: Vec<StructureHandler>,
}

impl HandlerRegistryBuilder {
    /// Replace the converter set
    pub fn converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Add or replace one converter
    pub fn converter(mut self, name: impl Into<String>, convert: ConvertFn) -> Self {
        self.converters.register(name, convert);
        self
    }

    /// Add a structure handler
    pub fn register(mut self, handler: StructureHandler) -> Self {
        debug!("Registering handler: {}", handler.structure);
        self.handlers.push(handler);
        self
    }

    /// Validate and order every handler's rules
    pub fn build(self) -> Result<HandlerRegistry> {
        let mut handlers: IndexMap<String, CompiledHandler> = IndexMap::new();

        for handler in self.handlers {
            if handlers.contains_key(&handler.structure) {
                return Err(V2FhirError::DuplicateHandler {
                    structure: handler.structure,
                });
            }
            if let ResourceBinding::FindById { id, .. } = &handler.binding
                && let Err(message) = id.validate()
            {
                return Err(V2FhirError::InvalidRule {
                    structure: handler.structure.clone(),
                    rule: format!("{}-{}", handler.structure, id),
                    message: format!("id address: {message}"),
                });
            }

            let resource_type = handler.binding.resource_type().to_string();
            let mut rules = handler
                .rules
                .into_iter()
                .enumerate()
                .map(|(declaration, rule)| {
                    compile_rule(&self.converters, &handler.structure, &resource_type, declaration, rule)
                })
                .collect::<Result<Vec<_>>>()?;
            // sort_by_key is stable, so equal priorities keep declaration order
            rules.sort_by_key(|rule| Reverse(rule.priority));

            debug!(
                "Compiled {} rule(s) for {}: {:?}",
                rules.len(),
                handler.structure,
                rules.iter().map(|r| r.label.as_str()).collect::<Vec<_>>()
            );

            handlers.insert(
                handler.structure.clone(),
                CompiledHandler {
                    structure: handler.structure,
                    binding: handler.binding,
                    rules,
                    setup: handler.setup,
                    finish: handler.finish,
                },
            );
        }

        Ok(HandlerRegistry { handlers })
    }
}

fn compile_rule(
    converters: &ConverterRegistry,
    structure: &str,
    resource_type: &str,
    declaration: usize,
    rule: HandlerRule,
) -> Result<CompiledRule> {
    let label = format!("{}-{}", structure, rule.source);
    let invalid = |message: String| V2FhirError::InvalidRule {
        structure: structure.to_string(),
        rule: label.clone(),
        message,
    };

    rule.source.validate().map_err(|message| invalid(message.to_string()))?;
    let converter = converters
        .get(&rule.converter)
        .ok_or_else(|| V2FhirError::UnknownConverter {
            structure: structure.to_string(),
            rule: label.clone(),
            converter: rule.converter.clone(),
        })?;

    let path = match (rule.target.is_empty(), rule.apply) {
        (true, Apply::Custom(_)) => None,
        (true, _) => return Err(invalid("target path is required".to_string())),
        (false, _) => Some(
            AttributePath::parse(&rule.target)
                .map_err(|e| invalid(e.to_string()))?
                .relative_to(resource_type),
        ),
    };

    Ok(CompiledRule {
        label,
        source: rule.source,
        path,
        priority: rule.priority,
        converter_name: rule.converter,
        converter,
        apply: rule.apply,
        declaration,
    })
}

/// Immutable map from structure type to its compiled handler
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: IndexMap<String, CompiledHandler>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// The handler for a structure type
    pub fn resolve(&self, structure: &str) -> Option<&CompiledHandler> {
        self.handlers.get(structure)
    }

    /// Rules for a structure type in execution order
    pub fn rules(&self, structure: &str) -> &[CompiledRule] {
        self.handlers
            .get(structure)
            .map(|h| h.rules.as_slice())
            .unwrap_or_default()
    }

    /// Registered structure types in registration order
    pub fn structures(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn handler() -> StructureHandler {
        StructureHandler::new("OBX", ResourceBinding::Create("Observation".into())).rules([
            HandlerRule::at("3", "code", "CWE"),
            HandlerRule::at("11", "status", "code").priority(10),
            HandlerRule::at("5", "valueString", "string"),
            HandlerRule::at("8", "interpretation[+]", "CWE").priority(10),
            HandlerRule::at("14", "Observation.effectiveDateTime", "DTM").priority(-1),
        ])
    }

    #[test]
    fn test_rules_sorted_by_priority_then_declaration() {
        let registry = HandlerRegistry::builder().register(handler()).build().unwrap();
        let labels: Vec<_> = registry.rules("OBX").iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["OBX-11", "OBX-8", "OBX-3", "OBX-5", "OBX-14"]);

        let rules = registry.rules("OBX");
        assert!(rules.windows(2).all(|w| w[0].priority >= w[1].priority));
        assert!(
            rules
                .windows(2)
                .filter(|w| w[0].priority == w[1].priority)
                .all(|w| w[0].declaration < w[1].declaration)
        );
    }

    #[test]
    fn test_target_made_relative_to_resource() {
        let registry = HandlerRegistry::builder().register(handler()).build().unwrap();
        let last = registry.rules("OBX").last().unwrap();
        assert_eq!(last.path.as_ref().unwrap().to_string(), "effectiveDateTime");
    }

    #[test]
    fn test_unknown_converter_is_fatal() {
        let err = HandlerRegistry::builder()
            .register(
                StructureHandler::new("PID", ResourceBinding::Reuse("Patient".into()))
                    .rule(HandlerRule::at("5", "name[+]", "NoSuchType")),
            )
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rule);
        assert!(matches!(err, V2FhirError::UnknownConverter { ref converter, .. } if converter == "NoSuchType"));
    }

    #[test]
    fn test_duplicate_handler_is_fatal() {
        let err = HandlerRegistry::builder()
            .register(handler())
            .register(handler())
            .build()
            .unwrap_err();
        assert!(matches!(err, V2FhirError::DuplicateHandler { .. }));
    }

    #[test]
    fn test_invalid_rules() {
        let bad_path = HandlerRegistry::builder()
            .register(
                StructureHandler::new("PID", ResourceBinding::Reuse("Patient".into()))
                    .rule(HandlerRule::at("5", "name[", "XPN")),
            )
            .build();
        assert!(matches!(bad_path, Err(V2FhirError::InvalidRule { .. })));

        let bad_address = HandlerRegistry::builder()
            .register(
                StructureHandler::new("PID", ResourceBinding::Reuse("Patient".into()))
                    .rule(HandlerRule::at("0", "name", "XPN")),
            )
            .build();
        assert!(matches!(bad_address, Err(V2FhirError::InvalidRule { .. })));

        let missing_target = HandlerRegistry::builder()
            .register(
                StructureHandler::new("PID", ResourceBinding::Reuse("Patient".into()))
                    .rule(HandlerRule::at("5", "", "XPN")),
            )
            .build();
        assert!(matches!(missing_target, Err(V2FhirError::InvalidRule { .. })));

        let dangling_subcomponent = HandlerRegistry::builder()
            .register(
                StructureHandler::new("PID", ResourceBinding::Reuse("Patient".into())).rule(
                    HandlerRule::new(SourceAddress::field(5).subcomponent(2), "name", "string"),
                ),
            )
            .build();
        match dangling_subcomponent {
            Err(V2FhirError::InvalidRule { message, .. }) => {
                assert_eq!(message, "subcomponent given without a component")
            }
            other => panic!("expected InvalidRule, got {other:?}"),
        }

        let dangling_id = HandlerRegistry::builder()
            .register(StructureHandler::new(
                "PRD",
                ResourceBinding::FindById {
                    resource_type: "Practitioner".into(),
                    id: SourceAddress::field(7).subcomponent(1),
                },
            ))
            .build();
        assert!(matches!(dangling_id, Err(V2FhirError::InvalidRule { .. })));
    }

    #[test]
    fn test_custom_converter_registration() {
        fn shout(
            raw: crate::convert::RawValue<'_>,
            _: &crate::convert::ConvertContext<'_>,
        ) -> std::result::Result<Option<crate::convert::FieldValue>, ConversionError> {
            Ok(raw.text().map(|t| crate::convert::FieldValue::String(t.to_uppercase())))
        }

        let registry = HandlerRegistry::builder()
            .converter("shout", shout)
            .register(
                StructureHandler::new("NTE", ResourceBinding::Reuse("Observation".into()))
                    .rule(HandlerRule::at("3", "note[+].text", "shout")),
            )
            .build()
            .unwrap();
        assert_eq!(registry.rules("NTE")[0].converter_name, "shout");
        assert!(registry.resolve("NTE").is_some());
        assert!(registry.rules("ZZZ").is_empty());
        assert_eq!(registry.structures().collect::<Vec<_>>(), vec!["NTE"]);
    }
}
