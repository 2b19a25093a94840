use std::path::Path;
use std::time::Duration;

use pagecraft_model::{StaticRegistry, TypeDefinition};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_CONFIG_NAME: &str = "pagecraft.config.json";

/// Editor configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Bounded undo history size
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,

    /// Persistence coalescing window for settings updates
    #[serde(default = "default_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Persistence coalescing window for drag reorders
    #[serde(default = "default_debounce_ms")]
    pub reorder_debounce_ms: u64,

    /// Window in which continuous edits of one target amend the current
    /// history entry instead of pushing a new one
    #[serde(default = "default_history_coalesce_ms")]
    pub history_coalesce_ms: u64,

    /// Delay before the single retry of an undeliverable preview message
    #[serde(default = "default_preview_retry_delay_ms")]
    pub preview_retry_delay_ms: u64,

    #[serde(default)]
    pub block_types: Vec<TypeDefinition>,

    #[serde(default)]
    pub section_types: Vec<TypeDefinition>,
}

fn default_max_history_size() -> usize {
    5
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_history_coalesce_ms() -> u64 {
    750
}

fn default_preview_retry_delay_ms() -> u64 {
    100
}

impl EditorConfig {
    /// Load config from a directory, falling back to defaults when absent
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_json(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: EditorConfig = serde_json::from_str(content)?;
        if config.max_history_size == 0 {
            return Err(ConfigError::Invalid(
                "maxHistorySize must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn registry(&self) -> StaticRegistry {
        StaticRegistry::from_definitions(self.block_types.clone(), self.section_types.clone())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn reorder_debounce(&self) -> Duration {
        Duration::from_millis(self.reorder_debounce_ms)
    }

    pub fn history_coalesce(&self) -> Duration {
        Duration::from_millis(self.history_coalesce_ms)
    }

    pub fn preview_retry_delay(&self) -> Duration {
        Duration::from_millis(self.preview_retry_delay_ms)
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_history_size: default_max_history_size(),
            save_debounce_ms: default_debounce_ms(),
            reorder_debounce_ms: default_debounce_ms(),
            history_coalesce_ms: default_history_coalesce_ms(),
            preview_retry_delay_ms: default_preview_retry_delay_ms(),
            block_types: vec![],
            section_types: vec![],
        }
    }
}
