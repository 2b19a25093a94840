//! Receiver-side view of the section list
//!
//! This is what the preview surface keeps: it applies messages as full-value
//! replacements and never trusts positions from the wire, so duplicate or
//! reordered deliveries converge.

use std::sync::Arc;

use pagecraft_model::{Block, Section};
use tracing::debug;

use crate::PreviewMessage;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewReplica {
    sections: Vec<Arc<Section>>,
}

impl PreviewReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface that currently shows `sections`
    pub fn with_sections(sections: Vec<Arc<Section>>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Arc<Section>] {
        &self.sections
    }

    /// The handshake the surface sends once it can accept messages
    pub fn ready_message(&self) -> PreviewMessage {
        PreviewMessage::PreviewReady {
            sections: self.sections.clone(),
        }
    }

    /// Apply one message; returns whether the view changed
    pub fn apply(&mut self, message: &PreviewMessage) -> bool {
        let before = self.sections.clone();
        match message {
            PreviewMessage::SectionsReorder { sections } => {
                self.sections = sections.clone();
            }
            PreviewMessage::SectionAdd { section, index } => {
                self.sections.retain(|s| s.id != section.id);
                let index = index.unwrap_or(self.sections.len()).min(self.sections.len());
                self.sections.insert(index, Arc::clone(section));
            }
            PreviewMessage::SectionUpdate {
                section_id,
                settings,
                enabled,
                position,
                blocks,
            } => {
                let Some(index) = self.sections.iter().position(|s| &s.id == section_id) else {
                    debug!(section_id = %section_id, "Update for unknown section ignored");
                    return false;
                };
                let section = Arc::make_mut(&mut self.sections[index]);
                if let Some(settings) = settings {
                    section.settings = settings.clone();
                }
                if let Some(enabled) = enabled {
                    section.enabled = *enabled;
                }
                if let Some(blocks) = blocks {
                    section.blocks = blocks.clone();
                }
                if let Some(position) = position {
                    let section = self.sections.remove(index);
                    let position = (*position).min(self.sections.len());
                    self.sections.insert(position, section);
                }
            }
            PreviewMessage::SectionDelete { section_id } => {
                self.sections.retain(|s| &s.id != section_id);
            }
            PreviewMessage::BlockAdd {
                section_id,
                parent_block_id,
                block,
                index,
            } => {
                let Some(section) = self.section_mut(section_id) else {
                    return false;
                };
                remove_block(&mut section.blocks, &block.id);
                let Some(siblings) = siblings_mut(&mut section.blocks, parent_block_id.as_deref())
                else {
                    return self.changed_since(&before);
                };
                let index = index.unwrap_or(siblings.len()).min(siblings.len());
                siblings.insert(index, Arc::clone(block));
            }
            PreviewMessage::BlockUpdate {
                section_id,
                block_id,
                settings,
                enabled,
                children,
            } => {
                let Some(section) = self.section_mut(section_id) else {
                    return false;
                };
                let Some(block) = block_mut(&mut section.blocks, block_id) else {
                    return false;
                };
                if let Some(settings) = settings {
                    block.settings = settings.clone();
                }
                if let Some(enabled) = enabled {
                    block.enabled = *enabled;
                }
                if let Some(children) = children {
                    block.children = children.clone();
                }
            }
            PreviewMessage::BlockDelete {
                section_id,
                block_id,
            } => {
                let Some(section) = self.section_mut(section_id) else {
                    return false;
                };
                remove_block(&mut section.blocks, block_id);
            }
            PreviewMessage::BlockReorder {
                section_id,
                parent_block_id,
                blocks,
            } => {
                let Some(section) = self.section_mut(section_id) else {
                    return false;
                };
                let Some(siblings) = siblings_mut(&mut section.blocks, parent_block_id.as_deref())
                else {
                    return false;
                };
                *siblings = blocks.clone();
            }
            PreviewMessage::PreviewReady { .. }
            | PreviewMessage::SelectionChanged { .. }
            | PreviewMessage::Unknown => return false,
        }

        renumber_all(&mut self.sections);
        self.changed_since(&before)
    }

    fn section_mut(&mut self, section_id: &str) -> Option<&mut Section> {
        self.sections
            .iter_mut()
            .find(|s| s.id == section_id)
            .map(Arc::make_mut)
    }

    fn changed_since(&self, before: &[Arc<Section>]) -> bool {
        self.sections.as_slice() != before
    }
}

fn siblings_mut<'a>(
    blocks: &'a mut Vec<Arc<Block>>,
    parent_block_id: Option<&str>,
) -> Option<&'a mut Vec<Arc<Block>>> {
    match parent_block_id {
        None => Some(blocks),
        Some(parent_id) => block_mut(blocks, parent_id).map(|parent| &mut parent.children),
    }
}

fn block_mut<'a>(blocks: &'a mut [Arc<Block>], block_id: &str) -> Option<&'a mut Block> {
    for block in blocks.iter_mut() {
        if block.id == block_id {
            return Some(Arc::make_mut(block));
        }
        if block.find_descendant(block_id).is_some() {
            return block_mut(&mut Arc::make_mut(block).children, block_id);
        }
    }
    None
}

fn remove_block(blocks: &mut Vec<Arc<Block>>, block_id: &str) -> bool {
    if let Some(index) = blocks.iter().position(|b| b.id == block_id) {
        blocks.remove(index);
        return true;
    }
    for block in blocks.iter_mut() {
        if block.find_descendant(block_id).is_some() {
            return remove_block(&mut Arc::make_mut(block).children, block_id);
        }
    }
    false
}

fn renumber_all(sections: &mut [Arc<Section>]) {
    Section::renumber(sections);
    for section in sections.iter_mut() {
        if !positions_match(&section.blocks) {
            renumber_blocks(&mut Arc::make_mut(section).blocks);
        }
    }
}

fn positions_match(blocks: &[Arc<Block>]) -> bool {
    blocks
        .iter()
        .enumerate()
        .all(|(i, b)| b.position == i && positions_match(&b.children))
}

fn renumber_blocks(blocks: &mut [Arc<Block>]) {
    Block::renumber(blocks);
    for block in blocks.iter_mut() {
        if !positions_match(&block.children) {
            renumber_blocks(&mut Arc::make_mut(block).children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> PreviewReplica {
        let mut replica = PreviewReplica::new();
        let sections = vec![
            Arc::new(Section::new("a", "hero").with_blocks([
                Block::new("g", "group").with_children([Block::new("x", "text")]),
                Block::new("t", "text"),
            ])),
            Arc::new(Section::new("b", "footer")),
        ];
        replica.apply(&PreviewMessage::SectionsReorder { sections });
        replica
    }

    fn settings(value: serde_json::Value) -> pagecraft_model::Settings {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_section_update_is_idempotent() {
        let mut replica = seeded();
        let message = PreviewMessage::SectionUpdate {
            section_id: "a".to_string(),
            settings: Some(settings(json!({ "title": "Sale" }))),
            enabled: Some(false),
            position: Some(1),
            blocks: None,
        };

        assert!(replica.apply(&message));
        let once = replica.clone();
        assert!(!replica.apply(&message));
        assert_eq!(replica, once);
        assert_eq!(replica.sections()[1].id, "a");
        assert_eq!(replica.sections()[1].position, 1);
    }

    #[test]
    fn test_updates_converge_last_write_wins() {
        let first = PreviewMessage::BlockUpdate {
            section_id: "a".to_string(),
            block_id: "x".to_string(),
            settings: Some(settings(json!({ "text": "one" }))),
            enabled: None,
            children: None,
        };
        let second = PreviewMessage::BlockUpdate {
            section_id: "a".to_string(),
            block_id: "x".to_string(),
            settings: Some(settings(json!({ "text": "two" }))),
            enabled: None,
            children: None,
        };

        let mut replica = seeded();
        replica.apply(&second);
        replica.apply(&first);
        replica.apply(&second);
        let block = replica.sections()[0].find_block("x").unwrap();
        assert_eq!(block.settings["text"], "two");
    }

    #[test]
    fn test_block_add_twice_keeps_single_copy() {
        let mut replica = seeded();
        let message = PreviewMessage::BlockAdd {
            section_id: "a".to_string(),
            parent_block_id: Some("g".to_string()),
            block: Arc::new(Block::new("y", "text")),
            index: Some(0),
        };
        replica.apply(&message);
        replica.apply(&message);

        let group = replica.sections()[0].find_block("g").unwrap();
        let ids: Vec<&str> = group.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "x"]);
        assert_eq!(group.children[1].position, 1);
    }

    #[test]
    fn test_block_reorder_and_delete() {
        let mut replica = seeded();
        let section = replica.sections()[0].clone();
        let reversed: Vec<Arc<Block>> = section.blocks.iter().rev().cloned().collect();
        replica.apply(&PreviewMessage::BlockReorder {
            section_id: "a".to_string(),
            parent_block_id: None,
            blocks: reversed,
        });
        assert_eq!(replica.sections()[0].blocks[0].id, "t");
        assert_eq!(replica.sections()[0].blocks[0].position, 0);

        replica.apply(&PreviewMessage::BlockDelete {
            section_id: "a".to_string(),
            block_id: "x".to_string(),
        });
        assert!(replica.sections()[0].find_block("x").is_none());
    }

    #[test]
    fn test_unknown_and_inbound_messages_are_noops() {
        let mut replica = seeded();
        assert!(!replica.apply(&PreviewMessage::Unknown));
        assert!(!replica.apply(&replica.ready_message()));
    }

    #[test]
    fn test_update_for_missing_section_ignored() {
        let mut replica = seeded();
        let message = PreviewMessage::SectionDelete {
            section_id: "zzz".to_string(),
        };
        assert!(!replica.apply(&message));
    }
}
