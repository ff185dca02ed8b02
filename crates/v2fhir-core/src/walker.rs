//! Document-order traversal of a message tree
//!
//! [`StructureWalker`] yields every structure below the root, depth first,
//! parents before their children and children before later siblings. Each
//! yielded [`StructureNode`] carries its 1-based repetition and its location in
//! position notation (`/ORDER_OBSERVATION(2)/OBSERVATION/OBX`).
//!
//! Unresolved slots are skipped. The walk records them as [`SkippedBranch`]es
//! instead of failing, so a single garbled branch never hides the rest of the
//! message.

use crate::message::{ChildSlot, Structure};
use tracing::{trace, warn};

/// A structure visited during a walk
#[derive(Debug, Clone)]
pub struct StructureNode<'a> {
    structure: &'a Structure,
    parent: &'a Structure,
    repetition: usize,
    depth: usize,
    location: String,
}

impl<'a> StructureNode<'a> {
    pub fn structure(&self) -> &'a Structure {
        self.structure
    }

    pub fn name(&self) -> &'a str {
        self.structure.name()
    }

    /// The group holding this structure
    pub fn parent(&self) -> &'a Structure {
        self.parent
    }

    /// 1-based repetition within the parent slot
    pub fn repetition(&self) -> usize {
        self.repetition
    }

    /// Nesting depth; direct children of the root are at depth 1
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Location in position notation
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// A slot the walk could not descend into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBranch {
    pub location: String,
    pub reason: String,
}

/// Restartable walk over a message tree
///
/// Only structures whose type name starts with `prefix` are yielded; the walk
/// still descends through every group. An empty prefix yields everything.
#[derive(Debug, Clone, Copy)]
pub struct StructureWalker<'a> {
    root: &'a Structure,
    prefix: &'a str,
}

impl<'a> StructureWalker<'a> {
    pub fn new(root: &'a Structure, prefix: &'a str) -> Self {
        Self { root, prefix }
    }

    /// Walk every structure
    pub fn all(root: &'a Structure) -> Self {
        Self::new(root, "")
    }

    /// Start a fresh walk from the root
    pub fn iter(&self) -> Walk<'a> {
        Walk {
            prefix: self.prefix,
            stack: vec![Frame {
                group: self.root,
                location: String::new(),
                slot: 0,
                repetition: 0,
            }],
            skipped: Vec::new(),
        }
    }
}

impl<'a> IntoIterator for &StructureWalker<'a> {
    type Item = StructureNode<'a>;
    type IntoIter = Walk<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct Frame<'a> {
    group: &'a Structure,
    location: String,
    slot: usize,
    repetition: usize,
}

/// One pass of a [`StructureWalker`]
pub struct Walk<'a> {
    prefix: &'a str,
    stack: Vec<Frame<'a>>,
    skipped: Vec<SkippedBranch>,
}

impl Walk<'_> {
    /// Branches skipped so far; draining them lets callers report as they go
    pub fn take_skipped(&mut self) -> Vec<SkippedBranch> {
        std::mem::take(&mut self.skipped)
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = StructureNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len();
            let frame = self.stack.last_mut()?;
            let group = frame.group;

            let Some(slot) = group.children().get(frame.slot) else {
                self.stack.pop();
                continue;
            };

            let (name, repetitions) = match slot {
                ChildSlot::Resolved { name, repetitions } => (name, repetitions),
                ChildSlot::Unresolved { name, reason } => {
                    let location = format!("{}/{}", frame.location, name);
                    warn!("Skipping unresolved structure at {}: {}", location, reason);
                    self.skipped.push(SkippedBranch {
                        location,
                        reason: reason.clone(),
                    });
                    frame.slot += 1;
                    frame.repetition = 0;
                    continue;
                }
            };

            let Some(structure) = repetitions.get(frame.repetition) else {
                frame.slot += 1;
                frame.repetition = 0;
                continue;
            };
            frame.repetition += 1;
            let repetition = frame.repetition;

            let location = if repetition > 1 {
                format!("{}/{}({})", frame.location, name, repetition)
            } else {
                format!("{}/{}", frame.location, name)
            };

            if structure.is_group() {
                self.stack.push(Frame {
                    group: structure,
                    location: location.clone(),
                    slot: 0,
                    repetition: 0,
                });
            }

            if structure.name().starts_with(self.prefix) {
                trace!("Visiting {}", location);
                return Some(StructureNode {
                    structure,
                    parent: group,
                    repetition,
                    depth,
                    location,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChildSlot, Segment};

    fn seg(name: &str) -> Structure {
        Structure::segment(name, Segment::default())
    }

    fn slot(name: &str, reps: Vec<Structure>) -> ChildSlot {
        ChildSlot::Resolved {
            name: name.to_string(),
            repetitions: reps,
        }
    }

    fn sample() -> Structure {
        let observation = |nte: bool| {
            let mut children = vec![slot("OBX", vec![seg("OBX")])];
            if nte {
                children.push(slot("NTE", vec![seg("NTE")]));
            }
            Structure::group("OBSERVATION", children)
        };
        let order = Structure::group(
            "ORDER_OBSERVATION",
            vec![
                slot("OBR", vec![seg("OBR")]),
                slot("OBSERVATION", vec![observation(true), observation(false)]),
            ],
        );
        Structure::group(
            "ORU_R01",
            vec![
                slot("MSH", vec![seg("MSH")]),
                slot("PID", vec![seg("PID")]),
                slot("ORDER_OBSERVATION", vec![order.clone(), order]),
            ],
        )
    }

    fn locations(walker: &StructureWalker<'_>) -> Vec<String> {
        walker.iter().map(|n| n.location().to_string()).collect()
    }

    #[test]
    fn test_document_order() {
        let root = sample();
        let walker = StructureWalker::all(&root);
        assert_eq!(
            locations(&walker),
            vec![
                "/MSH",
                "/PID",
                "/ORDER_OBSERVATION",
                "/ORDER_OBSERVATION/OBR",
                "/ORDER_OBSERVATION/OBSERVATION",
                "/ORDER_OBSERVATION/OBSERVATION/OBX",
                "/ORDER_OBSERVATION/OBSERVATION/NTE",
                "/ORDER_OBSERVATION/OBSERVATION(2)",
                "/ORDER_OBSERVATION/OBSERVATION(2)/OBX",
                "/ORDER_OBSERVATION(2)",
                "/ORDER_OBSERVATION(2)/OBR",
                "/ORDER_OBSERVATION(2)/OBSERVATION",
                "/ORDER_OBSERVATION(2)/OBSERVATION/OBX",
                "/ORDER_OBSERVATION(2)/OBSERVATION/NTE",
                "/ORDER_OBSERVATION(2)/OBSERVATION(2)",
                "/ORDER_OBSERVATION(2)/OBSERVATION(2)/OBX",
            ]
        );
    }

    #[test]
    fn test_prefix_filter_and_repetitions() {
        let root = sample();
        let walker = StructureWalker::new(&root, "OBS");
        let nodes: Vec<_> = walker.iter().collect();
        assert_eq!(nodes.len(), 4);
        assert!(nodes.iter().all(|n| n.name() == "OBSERVATION"));
        assert_eq!(
            nodes.iter().map(|n| n.repetition()).collect::<Vec<_>>(),
            vec![1, 2, 1, 2]
        );
        assert!(nodes.iter().all(|n| n.parent().name() == "ORDER_OBSERVATION"));
        assert!(nodes.iter().all(|n| n.depth() == 2));
    }

    #[test]
    fn test_prefix_match_is_case_sensitive() {
        let root = sample();
        assert_eq!(StructureWalker::new(&root, "obx").iter().count(), 0);
        assert_eq!(StructureWalker::new(&root, "OBX").iter().count(), 4);
    }

    #[test]
    fn test_walk_is_restartable() {
        let root = sample();
        let walker = StructureWalker::all(&root);
        let first: Vec<_> = locations(&walker);
        let mut partial = walker.iter();
        partial.next();
        partial.next();
        assert_eq!(locations(&walker), first);
    }

    #[test]
    fn test_malformed_branch_is_skipped() {
        let good = Structure::group("GOOD", vec![slot("AAA", vec![seg("AAA")])]);
        let root = Structure::group(
            "ROOT",
            vec![
                ChildSlot::Unresolved {
                    name: "BAD".to_string(),
                    reason: "cannot resolve".to_string(),
                },
                slot("GOOD", vec![good]),
            ],
        );

        let walker = StructureWalker::all(&root);
        let mut walk = walker.iter();
        let seen: Vec<String> = walk.by_ref().map(|n| n.location().to_string()).collect();
        assert_eq!(seen, vec!["/GOOD", "/GOOD/AAA"]);
        assert_eq!(
            walk.take_skipped(),
            vec![SkippedBranch {
                location: "/BAD".to_string(),
                reason: "cannot resolve".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_group() {
        let root = Structure::group("ROOT", Vec::new());
        assert_eq!(StructureWalker::all(&root).iter().count(), 0);
    }
}
