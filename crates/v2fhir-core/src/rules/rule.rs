//! Rule declarations
//!
//! A [`HandlerRule`] binds a source address in a segment to a target attribute
//! path on the handler's resource, through a named converter. Rules are plain
//! data; custom write steps and hooks are function pointers.

use crate::bundle::Bundle;
use crate::convert::{FieldValue, RawValue};
use crate::error::ConversionError;
use crate::message::{Leaf, Segment};
use crate::path::AttributePath;
use crate::resources::RecordKey;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Where a rule reads its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress {
    /// 1-based field number
    pub field: usize,
    /// 1-based component; `None` hands the whole repetition to the converter
    pub component: Option<usize>,
    /// 1-based subcomponent of `component`
    pub subcomponent: Option<usize>,
    /// Code table hint passed to the converter
    pub table: Option<String>,
}

impl SourceAddress {
    pub fn field(field: usize) -> Self {
        Self {
            field,
            component: None,
            subcomponent: None,
            table: None,
        }
    }

    pub fn component(mut self, component: usize) -> Self {
        self.component = Some(component);
        self
    }

    pub fn subcomponent(mut self, subcomponent: usize) -> Self {
        self.subcomponent = Some(subcomponent);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Parse `5`, `5.1` or `5.1.2`
    pub fn parse(address: &str) -> Option<Self> {
        let mut parts = address.split('.');
        let field = parts.next()?.trim().parse().ok()?;
        let component = parts.next().map(|c| c.trim().parse()).transpose().ok()?;
        let subcomponent = parts.next().map(|s| s.trim().parse()).transpose().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            field,
            component,
            subcomponent,
            table: None,
        })
    }

    /// Check that every index is 1-based and a subcomponent has a component
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.field == 0 || self.component == Some(0) || self.subcomponent == Some(0) {
            return Err("source address must be 1-based");
        }
        if self.subcomponent.is_some() && self.component.is_none() {
            return Err("subcomponent given without a component");
        }
        Ok(())
    }


    /// Values at this address, one per present repetition
    ///
    /// Absent, blank and explicit-null values are left out.
    pub fn extract<'a>(&self, segment: &'a Segment) -> Vec<RawValue<'a>> {
        segment
            .repetitions(self.field)
            .iter()
            .filter_map(|rep| match self.component {
                None => {
                    let only_null = rep.components.len() == 1 && rep.text() == Leaf::Null;
                    (!rep.is_empty() && !only_null).then_some(RawValue::Composite(rep))
                }
                Some(component) => rep
                    .component_at(component)
                    .and_then(|c| c.subcomponent(self.subcomponent.unwrap_or(1)).value())
                    .map(RawValue::Text),
            })
            .collect()
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field)?;
        if let Some(component) = self.component {
            write!(f, ".{component}")?;
            if let Some(subcomponent) = self.subcomponent {
                write!(f, ".{subcomponent}")?;
            }
        }
        Ok(())
    }
}

/// Custom write step for a rule
pub type HandlerFn = fn(&mut RuleContext<'_>, FieldValue) -> Result<(), ConversionError>;

/// How a converted value lands on the resource
#[derive(Clone, Copy)]
pub enum Apply {
    /// Write only when nothing is at the target yet
    SetIfUnset,
    /// Overwrite whatever is at the target
    Set,
    /// Append to the array at the target
    Append,
    /// Hand the value to a function
    Custom(HandlerFn),
}

impl fmt::Debug for Apply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Apply::SetIfUnset => write!(f, "SetIfUnset"),
            Apply::Set => write!(f, "Set"),
            Apply::Append => write!(f, "Append"),
            Apply::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A declared extraction rule
#[derive(Debug, Clone)]
pub struct HandlerRule {
    pub source: SourceAddress,
    /// Attribute path on the bound resource; may be empty for custom rules
    pub target: String,
    pub priority: i32,
    pub converter: String,
    pub apply: Apply,
}

impl HandlerRule {
    pub fn new(source: SourceAddress, target: impl Into<String>, converter: impl Into<String>) -> Self {
        Self {
            source,
            target: target.into(),
            priority: 0,
            converter: converter.into(),
            apply: Apply::SetIfUnset,
        }
    }

    /// Shorthand for `HandlerRule::new` with a parsed address
    ///
    /// An unparseable address yields field 0, which the registry rejects.
    pub fn at(address: &str, target: impl Into<String>, converter: impl Into<String>) -> Self {
        let source = SourceAddress::parse(address).unwrap_or_else(|| SourceAddress::field(0));
        Self::new(source, target, converter)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.source.table = Some(table.into());
        self
    }

    pub fn apply(mut self, apply: Apply) -> Self {
        self.apply = apply;
        self
    }

    pub fn custom(self, handler: HandlerFn) -> Self {
        self.apply(Apply::Custom(handler))
    }
}

/// Mutable view handed to hooks and custom rule functions
pub struct RuleContext<'a> {
    pub(crate) bundle: &'a mut Bundle,
    pub(crate) current: &'a HashMap<String, RecordKey>,
    pub(crate) resource: RecordKey,
    pub(crate) segment: Option<&'a Segment>,
    pub(crate) location: &'a str,
    pub(crate) target: Option<&'a AttributePath>,
}

impl<'a> RuleContext<'a> {
    /// The resource bound to the structure being converted
    pub fn resource(&self) -> RecordKey {
        self.resource
    }

    pub fn bundle(&self) -> &Bundle {
        &*self.bundle
    }

    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut *self.bundle
    }

    /// The segment being converted; `None` for groups
    pub fn segment(&self) -> Option<&'a Segment> {
        self.segment
    }

    /// Location of the structure in position notation
    pub fn location(&self) -> &str {
        self.location
    }

    /// Target path of the rule being applied; `None` in hooks
    pub fn target(&self) -> Option<&'a AttributePath> {
        self.target
    }

    /// The in-progress record of a type
    pub fn current(&self, resource_type: &str) -> Option<RecordKey> {
        self.current.get(resource_type).copied()
    }

    pub fn content(&self) -> Result<&Value, ConversionError> {
        self.bundle
            .record(self.resource)
            .map(|r| r.content())
            .ok_or_else(|| ConversionError::Fatal(format!("record {} vanished", self.resource)))
    }

    pub fn content_mut(&mut self) -> Result<&mut Value, ConversionError> {
        let resource = self.resource;
        self.bundle
            .record_mut(resource)
            .map(|r| r.content_mut())
            .ok_or_else(|| ConversionError::Fatal(format!("record {resource} vanished")))
    }

    pub fn is_set(&self, path: &str) -> Result<bool, ConversionError> {
        let path = AttributePath::parse(path)?;
        Ok(path.is_set(self.content()?))
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ConversionError> {
        let path = AttributePath::parse(path)?;
        path.set(self.content_mut()?, value)?;
        Ok(())
    }

    /// Write only when the target is empty; returns whether it wrote
    pub fn set_if_unset(&mut self, path: &str, value: Value) -> Result<bool, ConversionError> {
        let path = AttributePath::parse(path)?;
        let content = self.content_mut()?;
        if path.is_set(content) {
            return Ok(false);
        }
        path.set(content, value)?;
        Ok(true)
    }

    pub fn append(&mut self, path: &str, value: Value) -> Result<(), ConversionError> {
        let path = AttributePath::parse(path)?;
        path.append(self.content_mut()?, value)?;
        Ok(())
    }

    /// Write a reference to `target` at `path`, linking it under `roles`
    pub fn link(&mut self, path: &str, target: RecordKey, roles: &[&str]) -> Result<(), ConversionError> {
        let reference = self
            .bundle
            .link(self.resource, target, roles)
            .ok_or_else(|| ConversionError::missing_resource(target.to_string()))?;
        self.set(path, reference)
    }

    /// Link to the in-progress (or else the latest) record of a type
    pub fn link_current(
        &mut self,
        path: &str,
        resource_type: &str,
        roles: &[&str],
    ) -> Result<(), ConversionError> {
        let target = self
            .current(resource_type)
            .or_else(|| self.bundle.get_last(resource_type))
            .ok_or_else(|| ConversionError::missing_resource(resource_type))?;
        self.link(path, target, roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Field, Repetition};

    fn segment() -> Segment {
        Segment::new(vec![
            Field::simple("1"),
            Field::new(vec![
                Repetition::from_components(["Doe", "John"]),
                Repetition::from_components(["", ""]),
                Repetition::from_components(["Roe", "Jane"]),
            ]),
            Field::simple("\"\""),
        ])
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(SourceAddress::parse("5"), Some(SourceAddress::field(5)));
        assert_eq!(
            SourceAddress::parse("3.4.2"),
            Some(SourceAddress::field(3).component(4).subcomponent(2))
        );
        assert_eq!(SourceAddress::parse("x"), None);
        assert_eq!(SourceAddress::parse("1.2.3.4"), None);
        assert_eq!(SourceAddress::field(3).component(4).to_string(), "3.4");
        assert_eq!(
            SourceAddress::field(0).validate(),
            Err("source address must be 1-based")
        );
        assert!(SourceAddress::field(5).component(1).subcomponent(2).validate().is_ok());
        assert_eq!(
            SourceAddress::field(5).subcomponent(2).validate(),
            Err("subcomponent given without a component")
        );
    }

    #[test]
    fn test_extract_skips_empty_repetitions() {
        let seg = segment();
        let values = SourceAddress::field(2).extract(&seg);
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].component(1), Some("Roe"));

        let given: Vec<_> = SourceAddress::field(2).component(2).extract(&seg);
        assert_eq!(given, vec![RawValue::Text("John"), RawValue::Text("Jane")]);
    }

    #[test]
    fn test_extract_absent_and_null() {
        let seg = segment();
        assert!(SourceAddress::field(3).extract(&seg).is_empty());
        assert!(SourceAddress::field(3).component(1).extract(&seg).is_empty());
        assert!(SourceAddress::field(9).extract(&seg).is_empty());
        assert!(SourceAddress::field(1).component(5).extract(&seg).is_empty());
    }

    #[test]
    fn test_rule_builder() {
        let rule = HandlerRule::at("8", "gender", "code").priority(5).table("0001");
        assert_eq!(rule.source.field, 8);
        assert_eq!(rule.source.table.as_deref(), Some("0001"));
        assert_eq!(rule.priority, 5);
        assert!(matches!(rule.apply, Apply::SetIfUnset));
        assert_eq!(HandlerRule::at("bad", "x", "string").source.field, 0);
    }
}
