//! HL7 v2 message model
//!
//! A message is a tree of [`Structure`]s. Groups hold ordered, named child
//! slots; each slot holds one or more repetitions of the same structure type.
//! Segments hold fields addressed as `field → repetition → component →
//! subcomponent`, all 1-based on the outside.
//!
//! A slot that could not be built from the input (a garbled segment line, a
//! structure that failed to resolve) is kept as [`ChildSlot::Unresolved`] so
//! traversal can skip it and carry on with its siblings.

mod er7;

pub use er7::{EncodingCharacters, Er7Reader, GroupMember, GroupSpec};

/// Value found at a segment address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf<'a> {
    /// The address does not exist in the segment
    Absent,
    /// The address exists but holds an empty string
    Blank,
    /// The address holds the HL7 explicit null `""`
    Null,
    /// A present, non-empty value
    Value(&'a str),
}

impl<'a> Leaf<'a> {
    fn from_text(text: &'a str) -> Self {
        match text {
            "" => Leaf::Blank,
            "\"\"" => Leaf::Null,
            value => Leaf::Value(value),
        }
    }

    /// The value, if one is present
    pub fn value(self) -> Option<&'a str> {
        match self {
            Leaf::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_present(self) -> bool {
        matches!(self, Leaf::Value(_))
    }
}

/// One component, split into subcomponents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    pub subcomponents: Vec<String>,
}

impl Component {
    pub fn new(subcomponents: Vec<String>) -> Self {
        Self { subcomponents }
    }

    /// Subcomponent by 1-based index
    pub fn subcomponent(&self, index: usize) -> Leaf<'_> {
        index
            .checked_sub(1)
            .and_then(|i| self.subcomponents.get(i))
            .map_or(Leaf::Absent, |s| Leaf::from_text(s))
    }

    /// The first subcomponent, which is the whole value for simple components
    pub fn text(&self) -> Leaf<'_> {
        self.subcomponent(1)
    }
}

/// One repetition of a field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repetition {
    pub components: Vec<Component>,
}

impl Repetition {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// Build a repetition of simple components from plain strings
    pub fn from_components<S: Into<String>>(components: impl IntoIterator<Item = S>) -> Self {
        Self {
            components: components
                .into_iter()
                .map(|c| Component::new(vec![c.into()]))
                .collect(),
        }
    }

    /// Component by 1-based index
    pub fn component(&self, index: usize) -> Leaf<'_> {
        self.component_at(index).map_or(Leaf::Absent, Component::text)
    }

    pub fn component_at(&self, index: usize) -> Option<&Component> {
        index.checked_sub(1).and_then(|i| self.components.get(i))
    }

    /// The first component, which is the whole value for primitive fields
    pub fn text(&self) -> Leaf<'_> {
        self.component(1)
    }

    /// True when no component carries a value
    pub fn is_empty(&self) -> bool {
        self.components
            .iter()
            .all(|c| c.subcomponents.iter().all(String::is_empty))
    }
}

/// One field with its repetitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    pub repetitions: Vec<Repetition>,
}

impl Field {
    pub fn new(repetitions: Vec<Repetition>) -> Self {
        Self { repetitions }
    }

    /// A single-valued field
    pub fn simple(value: impl Into<String>) -> Self {
        Self::new(vec![Repetition::from_components([value.into()])])
    }
}

/// A segment's fields; `fields[0]` is field 1
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub fields: Vec<Field>,
}

impl Segment {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Field by 1-based number
    pub fn field(&self, number: usize) -> Option<&Field> {
        number.checked_sub(1).and_then(|i| self.fields.get(i))
    }

    /// All repetitions of a field, empty when the field is absent
    pub fn repetitions(&self, number: usize) -> &[Repetition] {
        self.field(number)
            .map(|f| f.repetitions.as_slice())
            .unwrap_or_default()
    }

    /// Leaf at `(field, repetition, component, subcomponent)`, all 1-based
    pub fn leaf(
        &self,
        field: usize,
        repetition: usize,
        component: usize,
        subcomponent: usize,
    ) -> Leaf<'_> {
        repetition
            .checked_sub(1)
            .and_then(|r| self.repetitions(field).get(r))
            .and_then(|rep| rep.component_at(component))
            .map_or(Leaf::Absent, |c| c.subcomponent(subcomponent))
    }
}

/// Body of a structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureKind {
    Segment(Segment),
    Group(Vec<ChildSlot>),
}

/// A named node of the message tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    name: String,
    kind: StructureKind,
}

impl Structure {
    pub fn segment(name: impl Into<String>, segment: Segment) -> Self {
        Self {
            name: name.into(),
            kind: StructureKind::Segment(segment),
        }
    }

    pub fn group(name: impl Into<String>, children: Vec<ChildSlot>) -> Self {
        Self {
            name: name.into(),
            kind: StructureKind::Group(children),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StructureKind {
        &self.kind
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match &self.kind {
            StructureKind::Segment(segment) => Some(segment),
            StructureKind::Group(_) => None,
        }
    }

    /// Child slots of a group, empty for segments
    pub fn children(&self) -> &[ChildSlot] {
        match &self.kind {
            StructureKind::Group(children) => children,
            StructureKind::Segment(_) => &[],
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, StructureKind::Group(_))
    }

    /// Append a structure to a group, joining the previous slot when it has
    /// the same name
    pub fn push_child(&mut self, child: Structure) {
        if let StructureKind::Group(children) = &mut self.kind {
            push_structure(children, child);
        }
    }
}

/// A named child position inside a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildSlot {
    Resolved {
        name: String,
        repetitions: Vec<Structure>,
    },
    Unresolved {
        name: String,
        reason: String,
    },
}

impl ChildSlot {
    pub fn name(&self) -> &str {
        match self {
            ChildSlot::Resolved { name, .. } | ChildSlot::Unresolved { name, .. } => name,
        }
    }
}

pub(crate) fn push_structure(children: &mut Vec<ChildSlot>, structure: Structure) {
    if let Some(ChildSlot::Resolved { name, repetitions }) = children.last_mut()
        && *name == structure.name
    {
        repetitions.push(structure);
        return;
    }
    children.push(ChildSlot::Resolved {
        name: structure.name.clone(),
        repetitions: vec![structure],
    });
}
