//! Structural invariants that must hold after every mutation

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::visitor::{walk_block, walk_section, BlockContext, Visitor};
use crate::{Block, Section, Template, TypeRegistry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Node {id} under {parent} has position {found}, expected {expected}")]
    PositionMismatch {
        parent: String,
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("Block {0} is its own ancestor")]
    Cycle(String),

    #[error("Block {block_id} of non-container type {block_type} has children")]
    NonContainerChildren { block_id: String, block_type: String },
}

impl Template {
    /// Check invariants 1-4; returns the first violation found.
    pub fn check_invariants(&self, registry: &dyn TypeRegistry) -> Result<(), InvariantViolation> {
        check_positions("<root>", self.sections.iter().map(|s| (s.id.as_str(), s.position)))?;

        let mut checker = InvariantChecker {
            registry,
            seen: HashSet::new(),
            ancestors: Vec::new(),
            violation: None,
        };
        checker.visit_template(self);

        match checker.violation {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}

struct InvariantChecker<'r> {
    registry: &'r dyn TypeRegistry,
    seen: HashSet<String>,
    ancestors: Vec<String>,
    violation: Option<InvariantViolation>,
}

impl InvariantChecker<'_> {
    fn record(&mut self, result: Result<(), InvariantViolation>) {
        if self.violation.is_none() {
            if let Err(violation) = result {
                self.violation = Some(violation);
            }
        }
    }

    fn claim(&mut self, id: &str) {
        if !self.seen.insert(id.to_string()) {
            self.record(Err(InvariantViolation::DuplicateId(id.to_string())));
        }
    }
}

impl Visitor for InvariantChecker<'_> {
    fn visit_section(&mut self, section: &Section) {
        if self.violation.is_some() {
            return;
        }
        self.claim(&section.id);
        self.record(check_blocks(&section.id, &section.blocks));
        walk_section(self, section);
    }

    fn visit_block(&mut self, block: &Block, ctx: BlockContext<'_>) {
        if self.violation.is_some() {
            return;
        }
        if self.ancestors.iter().any(|id| id == &block.id) {
            self.record(Err(InvariantViolation::Cycle(block.id.clone())));
            return;
        }
        self.claim(&block.id);

        if !block.children.is_empty() && !self.registry.is_container(&block.block_type) {
            self.record(Err(InvariantViolation::NonContainerChildren {
                block_id: block.id.clone(),
                block_type: block.block_type.clone(),
            }));
        }
        self.record(check_blocks(&block.id, &block.children));

        self.ancestors.push(block.id.clone());
        walk_block(self, block, ctx);
        self.ancestors.pop();
    }
}

fn check_blocks(parent: &str, blocks: &[Arc<Block>]) -> Result<(), InvariantViolation> {
    check_positions(parent, blocks.iter().map(|b| (b.id.as_str(), b.position)))
}

fn check_positions<'a>(
    parent: &str,
    siblings: impl Iterator<Item = (&'a str, usize)>,
) -> Result<(), InvariantViolation> {
    for (expected, (id, found)) in siblings.enumerate() {
        if found != expected {
            return Err(InvariantViolation::PositionMismatch {
                parent: parent.to_string(),
                id: id.to_string(),
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticRegistry;

    fn registry() -> StaticRegistry {
        StaticRegistry::new().container("group").leaf("text")
    }

    #[test]
    fn test_valid_template_passes() {
        let template = Template::new("t", "index").with_sections([Section::new("s", "hero")
            .with_blocks([Block::new("g", "group").with_children([Block::new("x", "text")])])]);
        assert_eq!(template.check_invariants(&registry()), Ok(()));
    }

    #[test]
    fn test_duplicate_ids_across_sections() {
        let template = Template::new("t", "index").with_sections([
            Section::new("a", "hero").with_blocks([Block::new("x", "text")]),
            Section::new("b", "hero").with_blocks([Block::new("x", "text")]),
        ]);
        assert_eq!(
            template.check_invariants(&registry()),
            Err(InvariantViolation::DuplicateId("x".to_string()))
        );
    }

    #[test]
    fn test_stale_position_detected() {
        let mut template = Template::new("t", "index")
            .with_sections([Section::new("a", "hero"), Section::new("b", "hero")]);
        Arc::make_mut(&mut template.sections[1]).position = 5;
        assert!(matches!(
            template.check_invariants(&registry()),
            Err(InvariantViolation::PositionMismatch { found: 5, expected: 1, .. })
        ));
    }

    #[test]
    fn test_leaf_with_children_rejected() {
        let template = Template::new("t", "index").with_sections([Section::new("s", "hero")
            .with_blocks([Block::new("x", "text").with_children([Block::new("y", "text")])])]);
        assert!(matches!(
            template.check_invariants(&registry()),
            Err(InvariantViolation::NonContainerChildren { .. })
        ));
    }

    #[test]
    fn test_reused_ancestor_id_reported_as_cycle() {
        let template = Template::new("t", "index").with_sections([Section::new("s", "hero")
            .with_blocks([Block::new("g", "group").with_children([Block::new("g", "group")])])]);
        assert_eq!(
            template.check_invariants(&registry()),
            Err(InvariantViolation::Cycle("g".to_string()))
        );
    }
}
