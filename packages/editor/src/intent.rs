use pagecraft_model::Settings;
use serde::{Deserialize, Serialize};

/// A user action arriving from the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Intent {
    AddSection {
        section_type: String,
        #[serde(default)]
        index: Option<usize>,
        /// Merged over the type's default settings
        #[serde(default)]
        settings: Option<Settings>,
    },

    AddBlock {
        /// Section or container block
        parent_id: String,
        block_type: String,
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        settings: Option<Settings>,
    },

    Delete {
        node_id: String,
    },

    Move {
        node_id: String,
        #[serde(default)]
        new_parent_id: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },

    /// Full ordered id list of the parent's current children
    Reorder {
        #[serde(default)]
        parent_id: Option<String>,
        ordered_ids: Vec<String>,
    },

    UpdateSectionSettings {
        section_id: String,
        settings: Settings,
        #[serde(default)]
        skip_history: bool,
    },

    UpdateBlockSettings {
        block_id: String,
        settings: Settings,
        #[serde(default)]
        skip_history: bool,
    },

    ToggleEnabled {
        node_id: String,
    },

    /// `section_id: None` clears the selection
    Select {
        #[serde(default)]
        section_id: Option<String>,
        #[serde(default)]
        block_id: Option<String>,
    },

    Undo,

    Redo,

    GoToHistory {
        index: usize,
    },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::AddSection { .. } => "add_section",
            Intent::AddBlock { .. } => "add_block",
            Intent::Delete { .. } => "delete",
            Intent::Move { .. } => "move",
            Intent::Reorder { .. } => "reorder",
            Intent::UpdateSectionSettings { .. } => "update_section",
            Intent::UpdateBlockSettings { .. } => "update_block",
            Intent::ToggleEnabled { .. } => "toggle_enabled",
            Intent::Select { .. } => "select",
            Intent::Undo => "undo",
            Intent::Redo => "redo",
            Intent::GoToHistory { .. } => "go_to_history",
        }
    }
}
