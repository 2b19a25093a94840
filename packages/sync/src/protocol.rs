use std::sync::Arc;

use pagecraft_model::{Block, Section, Settings};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Message envelope exchanged with the preview surface
///
/// Outbound (editor → preview) variants replace whole field values. Block
/// messages are scoped by `section_id`; `parent_block_id` is `None` for a
/// section's top-level blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum PreviewMessage {
    /// Full replace of the section list (initial sync, bulk reorders)
    SectionsReorder { sections: Vec<Arc<Section>> },

    SectionAdd {
        section: Arc<Section>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },

    SectionUpdate {
        section_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<Settings>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blocks: Option<Vec<Arc<Block>>>,
    },

    SectionDelete { section_id: String },

    BlockAdd {
        section_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_block_id: Option<String>,
        block: Arc<Block>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },

    BlockUpdate {
        section_id: String,
        block_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<Settings>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        children: Option<Vec<Arc<Block>>>,
    },

    BlockDelete { section_id: String, block_id: String },

    /// Full new child list of one parent, in order
    BlockReorder {
        section_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_block_id: Option<String>,
        blocks: Vec<Arc<Block>>,
    },

    /// Receiver is initialized; carries its current view for reconciliation
    PreviewReady {
        #[serde(default)]
        sections: Vec<Arc<Section>>,
    },

    /// The user picked an element directly in the preview
    SelectionChanged {
        section_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl PreviewMessage {
    /// Patch carrying every field of `section`
    pub fn section_update(section: &Section) -> Self {
        PreviewMessage::SectionUpdate {
            section_id: section.id.clone(),
            settings: Some(section.settings.clone()),
            enabled: Some(section.enabled),
            position: Some(section.position),
            blocks: Some(section.blocks.clone()),
        }
    }

    /// Messages sent by the preview surface to the editor
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            PreviewMessage::PreviewReady { .. } | PreviewMessage::SelectionChanged { .. }
        )
    }

    /// The wire `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            PreviewMessage::SectionsReorder { .. } => "SECTIONS_REORDER",
            PreviewMessage::SectionAdd { .. } => "SECTION_ADD",
            PreviewMessage::SectionUpdate { .. } => "SECTION_UPDATE",
            PreviewMessage::SectionDelete { .. } => "SECTION_DELETE",
            PreviewMessage::BlockAdd { .. } => "BLOCK_ADD",
            PreviewMessage::BlockUpdate { .. } => "BLOCK_UPDATE",
            PreviewMessage::BlockDelete { .. } => "BLOCK_DELETE",
            PreviewMessage::BlockReorder { .. } => "BLOCK_REORDER",
            PreviewMessage::PreviewReady { .. } => "PREVIEW_READY",
            PreviewMessage::SelectionChanged { .. } => "SELECTION_CHANGED",
            PreviewMessage::Unknown => "UNKNOWN",
        }
    }
}

pub fn encode(message: &PreviewMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one envelope; unknown `type` values yield `PreviewMessage::Unknown`
pub fn decode(payload: &str) -> Result<PreviewMessage, ProtocolError> {
    Ok(serde_json::from_str(payload)?)
}
