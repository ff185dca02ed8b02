//! Reader for pipe-delimited (ER7) HL7 v2 messages
//!
//! The reader never fails. A line that cannot be read as a segment becomes an
//! unresolved slot in the tree, and a message without an MSH header falls back
//! to the default encoding characters.
//!
//! Segments land in a flat root group unless [`GroupSpec`]s are supplied. A
//! group spec names a leader segment; the leader opens a new group repetition
//! and the group keeps absorbing its member segments (and nested groups) until
//! something outside its membership appears.

use super::{ChildSlot, Component, Field, Repetition, Segment, Structure, push_structure};
use std::iter::Peekable;
use tracing::{debug, warn};

/// The five delimiter characters declared in MSH-1 and MSH-2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingCharacters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for EncodingCharacters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl EncodingCharacters {
    /// Read the delimiters from a header segment line (`MSH|^~\&|...`)
    pub fn from_header(line: &str) -> Option<Self> {
        let mut chars = line.chars();
        let name: String = chars.by_ref().take(3).collect();
        if !is_header(&name) {
            return None;
        }
        let field = chars.next()?;
        let declared: Vec<char> = chars.take_while(|&c| c != field).take(4).collect();

        let defaults = Self::default();
        Some(Self {
            field,
            component: declared.first().copied().unwrap_or(defaults.component),
            repetition: declared.get(1).copied().unwrap_or(defaults.repetition),
            escape: declared.get(2).copied().unwrap_or(defaults.escape),
            subcomponent: declared.get(3).copied().unwrap_or(defaults.subcomponent),
        })
    }
}

fn is_header(name: &str) -> bool {
    matches!(name, "MSH" | "BHS" | "FHS")
}

/// A member of a group: a plain segment or a nested group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMember {
    Segment(String),
    Group(GroupSpec),
}

/// Declares how segments nest into a named, repeatable group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub leader: String,
    pub members: Vec<GroupMember>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, leader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            leader: leader.into(),
            members: Vec::new(),
        }
    }

    /// Add member segments
    pub fn segments<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.members
            .extend(names.into_iter().map(|n| GroupMember::Segment(n.into())));
        self
    }

    /// Add a nested group
    pub fn group(mut self, spec: GroupSpec) -> Self {
        self.members.push(GroupMember::Group(spec));
        self
    }

    fn nested(&self, leader: &str) -> Option<&GroupSpec> {
        self.members.iter().find_map(|m| match m {
            GroupMember::Group(g) if g.leader == leader => Some(g),
            _ => None,
        })
    }

    fn has_segment(&self, name: &str) -> bool {
        self.members
            .iter()
            .any(|m| matches!(m, GroupMember::Segment(s) if s == name))
    }
}

enum Line {
    Segment(Structure),
    Malformed { name: String, reason: String },
}

impl Line {
    fn name(&self) -> &str {
        match self {
            Line::Segment(s) => s.name(),
            Line::Malformed { name, .. } => name,
        }
    }
}

/// Reads ER7 text into a message tree
#[derive(Debug, Clone, Default)]
pub struct Er7Reader {
    groups: Vec<GroupSpec>,
}

impl Er7Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a top-level group
    pub fn with_group(mut self, spec: GroupSpec) -> Self {
        self.groups.push(spec);
        self
    }

    /// Read a whole message
    ///
    /// The root group is named after MSH-9 (the message structure in
    /// component 3, else `type_event`), or `MESSAGE` when that is missing.
    pub fn read(&self, text: &str) -> Structure {
        let raw: Vec<&str> = text
            .split(['\r', '\n'])
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();

        let encoding = match raw.first().and_then(|l| EncodingCharacters::from_header(l)) {
            Some(enc) => enc,
            None => {
                warn!("Message does not start with a header segment, using default delimiters");
                EncodingCharacters::default()
            }
        };

        let lines: Vec<Line> = raw
            .iter()
            .map(|line| match parse_segment_line(line, &encoding) {
                Ok(structure) => Line::Segment(structure),
                Err((name, reason)) => {
                    warn!("Skipping malformed segment line '{}': {}", name, reason);
                    Line::Malformed { name, reason }
                }
            })
            .collect();

        let root_name = lines
            .iter()
            .find_map(|l| match l {
                Line::Segment(s) if is_header(s.name()) => s.as_segment().and_then(message_structure),
                _ => None,
            })
            .unwrap_or_else(|| "MESSAGE".to_string());

        let mut children = Vec::new();
        let mut iter = lines.into_iter().peekable();
        self.fill(&mut iter, None, &mut children);
        debug!("Read {} with {} top-level slots", root_name, children.len());
        Structure::group(root_name, children)
    }

    fn fill(
        &self,
        lines: &mut Peekable<std::vec::IntoIter<Line>>,
        scope: Option<&GroupSpec>,
        children: &mut Vec<ChildSlot>,
    ) {
        while let Some(line) = lines.peek() {
            if let Line::Malformed { .. } = line {
                if let Some(Line::Malformed { name, reason }) = lines.next() {
                    children.push(ChildSlot::Unresolved { name, reason });
                }
                continue;
            }

            let name = line.name().to_string();
            let nested = match scope {
                None => self.groups.iter().find(|g| g.leader == name),
                Some(spec) => spec.nested(&name),
            };

            if let Some(spec) = nested {
                let mut group_children = Vec::new();
                if let Some(Line::Segment(leader)) = lines.next() {
                    push_structure(&mut group_children, leader);
                }
                self.fill(lines, Some(spec), &mut group_children);
                push_structure(children, Structure::group(spec.name.clone(), group_children));
                continue;
            }

            if scope.is_some_and(|spec| !spec.has_segment(&name)) {
                break;
            }

            if let Some(Line::Segment(segment)) = lines.next() {
                push_structure(children, segment);
            }
        }
    }
}

/// MSH-9: structure id from component 3, else `type_event`
fn message_structure(msh: &Segment) -> Option<String> {
    if let Some(structure) = msh.leaf(9, 1, 3, 1).value() {
        return Some(structure.to_string());
    }
    let kind = msh.leaf(9, 1, 1, 1).value()?;
    match msh.leaf(9, 1, 2, 1).value() {
        Some(event) => Some(format!("{kind}_{event}")),
        None => Some(kind.to_string()),
    }
}

fn parse_segment_line(
    line: &str,
    enc: &EncodingCharacters,
) -> Result<Structure, (String, String)> {
    let (name, rest) = match line.split_once(enc.field) {
        Some((name, rest)) => (name, Some(rest)),
        None => (line, None),
    };

    let valid_name = name.len() == 3
        && name.starts_with(|c: char| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !valid_name {
        let shown: String = name.chars().take(16).collect();
        return Err((shown, "invalid segment name".to_string()));
    }

    let mut fields = Vec::new();
    if let Some(rest) = rest {
        if is_header(name) {
            let (declared, tail) = match rest.split_once(enc.field) {
                Some((declared, tail)) => (declared, Some(tail)),
                None => (rest, None),
            };
            fields.push(Field::simple(enc.field.to_string()));
            fields.push(Field::simple(declared));
            if let Some(tail) = tail {
                fields.extend(tail.split(enc.field).map(|f| parse_field(f, enc)));
            }
        } else {
            fields.extend(rest.split(enc.field).map(|f| parse_field(f, enc)));
        }
    }

    Ok(Structure::segment(name, Segment::new(fields)))
}

fn parse_field(text: &str, enc: &EncodingCharacters) -> Field {
    if text.is_empty() {
        return Field::default();
    }
    Field::new(
        text.split(enc.repetition)
            .map(|rep| {
                Repetition::new(
                    rep.split(enc.component)
                        .map(|comp| {
                            Component::new(
                                comp.split(enc.subcomponent)
                                    .map(|sub| unescape(sub, enc))
                                    .collect(),
                            )
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Resolve `\F\ \S\ \T\ \R\ \E\` and `\.br\`; other sequences stay verbatim
fn unescape(text: &str, enc: &EncodingCharacters) -> String {
    if !text.contains(enc.escape) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(enc.escape) {
        out.push_str(&rest[..start]);
        let after = &rest[start + enc.escape.len_utf8()..];
        let Some(end) = after.find(enc.escape) else {
            out.push_str(&rest[start..]);
            return out;
        };
        let sequence = &after[..end];
        match sequence {
            "F" => out.push(enc.field),
            "S" => out.push(enc.component),
            "T" => out.push(enc.subcomponent),
            "R" => out.push(enc.repetition),
            "E" => out.push(enc.escape),
            ".br" => out.push('\n'),
            other => {
                out.push(enc.escape);
                out.push_str(other);
                out.push(enc.escape);
            }
        }
        rest = &after[end + enc.escape.len_utf8()..];
    }
    out.push_str(rest);
    out
}
