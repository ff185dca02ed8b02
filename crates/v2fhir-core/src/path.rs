//! Structure paths and attribute paths
//!
//! Two notations address the same locations:
//!
//! - **Position notation** names structures from the message root,
//!   slash-delimited, with a 1-based repetition suffix: `/PATIENT_RESULT/OBX(2)`
//! - **Attribute notation** names the same walk dot-delimited, lower-case, with
//!   a 0-based index: `patient_result.obx[1]`
//!
//! Issues and diagnostics are reported in position notation. The translation
//! functions in this module let consumers that query the output with
//! attribute-style expressions convert them.
//!
//! The module also parses attribute paths used as rule targets
//! (`name[0].given[+]`) and reads/writes them against JSON resource content.

use crate::error::PathError;
use serde_json::{Map, Value};
use std::fmt;

/// Convert a position path into attribute notation
///
/// ```
/// use v2fhir_core::path::position_to_attribute;
///
/// assert_eq!(position_to_attribute("GROUP/SEGMENT(2)"), "group.segment[1]");
/// assert_eq!(position_to_attribute("/MSH"), "msh");
/// ```
pub fn position_to_attribute(position: &str) -> String {
    let trimmed = position.strip_prefix('/').unwrap_or(position);
    let mut out = String::with_capacity(trimmed.len() + 4);

    for (i, step) in trimmed.split('/').enumerate() {
        if i > 0 {
            out.push('.');
        }
        match split_suffix(step, '(', ')') {
            Some((name, rep)) => {
                out.push_str(&name.to_lowercase());
                match rep.parse::<usize>() {
                    Ok(n) if n > 0 => {
                        out.push('[');
                        out.push_str(&(n - 1).to_string());
                        out.push(']');
                    }
                    // Not a repetition marker, keep it verbatim
                    _ => {
                        out.push('(');
                        out.push_str(rep);
                        out.push(')');
                    }
                }
            }
            None => out.push_str(&step.to_lowercase()),
        }
    }
    out
}

/// Convert an attribute path into position notation
///
/// The leading `/` is always synthesized, so the result is an absolute path.
///
/// ```
/// use v2fhir_core::path::attribute_to_position;
///
/// assert_eq!(attribute_to_position("group.segment[1]"), "/GROUP/SEGMENT(2)");
/// ```
pub fn attribute_to_position(attribute: &str) -> String {
    let trimmed = attribute.strip_prefix('.').unwrap_or(attribute);
    let mut out = String::with_capacity(trimmed.len() + 4);

    for step in trimmed.split('.') {
        out.push('/');
        match split_suffix(step, '[', ']') {
            Some((name, idx)) => {
                out.push_str(&name.to_uppercase());
                match idx.parse::<usize>() {
                    Ok(n) => {
                        out.push('(');
                        out.push_str(&(n + 1).to_string());
                        out.push(')');
                    }
                    Err(_) => {
                        out.push('[');
                        out.push_str(idx);
                        out.push(']');
                    }
                }
            }
            None => out.push_str(&step.to_uppercase()),
        }
    }
    out
}

/// Split `name(inner)` into `("name", "inner")`
fn split_suffix(step: &str, open: char, close: char) -> Option<(&str, &str)> {
    let body = step.strip_suffix(close)?;
    let start = body.rfind(open)?;
    Some((&body[..start], &body[start + 1..]))
}

/// Index operator in an attribute path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// `[n]` - explicit 0-based position
    At(usize),
    /// `[+]` - a new element appended to the array
    Append,
    /// `[=]` - the last element of the array
    Last,
}

/// One segment of an attribute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Attribute name
    pub name: String,
    /// Optional index
    pub index: Option<Index>,
}

impl PathSegment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn with_index(name: impl Into<String>, index: Index) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }
}

/// A parsed attribute path such as `name[0].given[+]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    segments: Vec<PathSegment>,
}

impl AttributePath {
    /// Parse an attribute path
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_bracket = false;
        let mut bracket_content = String::new();
        let mut pending: Option<PathSegment> = None;

        for ch in path.chars() {
            match ch {
                '.' if !in_bracket => {
                    if let Some(seg) = pending.take() {
                        segments.push(seg);
                    } else if !current.is_empty() {
                        segments.push(PathSegment::new(current.clone()));
                    } else {
                        return Err(PathError::InvalidSyntax(path.to_string()));
                    }
                    current.clear();
                }
                '[' if !in_bracket => {
                    if current.is_empty() || pending.is_some() {
                        return Err(PathError::InvalidSyntax(path.to_string()));
                    }
                    in_bracket = true;
                    bracket_content.clear();
                }
                ']' if in_bracket => {
                    in_bracket = false;
                    let index = parse_index(&bracket_content)
                        .ok_or_else(|| PathError::InvalidSyntax(path.to_string()))?;
                    pending = Some(PathSegment::with_index(current.clone(), index));
                    current.clear();
                }
                _ => {
                    if pending.is_some() {
                        return Err(PathError::InvalidSyntax(path.to_string()));
                    }
                    if in_bracket {
                        bracket_content.push(ch);
                    } else {
                        current.push(ch);
                    }
                }
            }
        }

        if in_bracket {
            return Err(PathError::InvalidSyntax(path.to_string()));
        }
        if let Some(seg) = pending {
            segments.push(seg);
        } else if !current.is_empty() {
            segments.push(PathSegment::new(current));
        } else if !segments.is_empty() || path.is_empty() {
            return Err(PathError::InvalidSyntax(path.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Drop a leading segment naming the resource type (`Patient.name` → `name`)
    pub fn relative_to(mut self, resource_type: &str) -> Self {
        if self.segments.len() > 1
            && self.segments[0].name == resource_type
            && self.segments[0].index.is_none()
        {
            self.segments.remove(0);
        }
        self
    }

    /// Read the value at this path
    ///
    /// Unindexed segments that hold an array read the first element. `[+]`
    /// never matches an existing value.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for seg in &self.segments {
            let child = current.as_object()?.get(&seg.name)?;
            current = match (seg.index, child) {
                (None, Value::Array(items)) => items.first()?,
                (None, other) => other,
                (Some(Index::At(n)), Value::Array(items)) => items.get(n)?,
                (Some(Index::At(0)), other) => other,
                (Some(Index::Last), Value::Array(items)) => items.last()?,
                (Some(Index::Last), other) => other,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }

    /// Whether a non-null value exists at this path
    pub fn is_set(&self, root: &Value) -> bool {
        self.get(root).is_some_and(|v| match v {
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => true,
        })
    }

    /// Write `value` at this path, creating intermediate objects and arrays
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        let slot = self.slot(root, false)?;
        *slot = value;
        Ok(())
    }

    /// Append `value` to the array at this path
    ///
    /// A scalar already at the path is turned into a one-element array first.
    pub fn append(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        let slot = self.slot(root, true)?;
        match slot {
            Value::Null => *slot = Value::Array(vec![value]),
            Value::Array(items) => items.push(value),
            other => {
                let existing = other.take();
                *other = Value::Array(vec![existing, value]);
            }
        }
        Ok(())
    }

    /// Locate the value at this path, creating it as null when missing
    ///
    /// With `container`, an unindexed final segment yields the attribute
    /// itself even when it holds an array.
    fn slot<'a>(&self, root: &'a mut Value, container: bool) -> Result<&'a mut Value, PathError> {
        let last = self.segments.len().saturating_sub(1);
        let mut current = root;
        for (depth, seg) in self.segments.iter().enumerate() {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let object = current
                .as_object_mut()
                .ok_or_else(|| self.mismatch(depth, "an object"))?;
            let child = object.entry(seg.name.clone()).or_insert(Value::Null);
            current = match seg.index {
                None if container && depth == last => child,
                None => match child {
                    Value::Array(items) => {
                        if items.is_empty() {
                            items.push(Value::Null);
                        }
                        &mut items[0]
                    }
                    other => other,
                },
                Some(index) => {
                    if !child.is_array() {
                        let existing = child.take();
                        *child = if existing.is_null() {
                            Value::Array(Vec::new())
                        } else {
                            Value::Array(vec![existing])
                        };
                    }
                    let Value::Array(items) = child else {
                        return Err(self.mismatch(depth, "an array"));
                    };
                    let position = match index {
                        Index::At(n) => n,
                        Index::Append => items.len(),
                        Index::Last => items.len().saturating_sub(1),
                    };
                    while items.len() <= position {
                        items.push(Value::Null);
                    }
                    &mut items[position]
                }
            };
        }
        Ok(current)
    }

    fn mismatch(&self, depth: usize, expected: &str) -> PathError {
        let prefix = AttributePath {
            segments: self.segments[..depth].to_vec(),
        };
        PathError::TypeMismatch {
            path: prefix.to_string(),
            expected: expected.to_string(),
        }
    }
}

fn parse_index(content: &str) -> Option<Index> {
    match content.trim() {
        "+" => Some(Index::Append),
        "=" => Some(Index::Last),
        n => n.parse().ok().map(Index::At),
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&seg.name)?;
            match seg.index {
                Some(Index::At(n)) => write!(f, "[{n}]")?,
                Some(Index::Append) => f.write_str("[+]")?,
                Some(Index::Last) => f.write_str("[=]")?,
                None => {}
            }
        }
        Ok(())
    }
}
