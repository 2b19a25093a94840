//! # Type registry
//!
//! The schema for individual block and section types lives outside the
//! editing core. The core only asks one question of it that affects tree
//! shape: may a block of this type hold children?

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Settings;

/// Capability metadata for one block or section type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeCapabilities {
    pub label: String,
    pub container: bool,
    pub default_settings: Settings,
    pub icon: Option<String>,
}

/// Read-only lookup into the external schema
pub trait TypeRegistry: Send + Sync {
    fn block_type(&self, block_type: &str) -> Option<&TypeCapabilities>;

    fn section_type(&self, section_type: &str) -> Option<&TypeCapabilities>;

    /// Unknown types are treated as leaves.
    fn is_container(&self, block_type: &str) -> bool {
        self.block_type(block_type)
            .map(|caps| caps.container)
            .unwrap_or(false)
    }
}

/// Serialized form of a registry entry, as found in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefinition {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub container: bool,

    #[serde(default)]
    pub default_settings: Settings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl From<TypeDefinition> for TypeCapabilities {
    fn from(def: TypeDefinition) -> Self {
        Self {
            label: def.label.unwrap_or_else(|| def.type_name.clone()),
            container: def.container,
            default_settings: def.default_settings,
            icon: def.icon,
        }
    }
}

/// In-memory registry
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    blocks: HashMap<String, TypeCapabilities>,
    sections: HashMap<String, TypeCapabilities>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(
        blocks: impl IntoIterator<Item = TypeDefinition>,
        sections: impl IntoIterator<Item = TypeDefinition>,
    ) -> Self {
        let mut registry = Self::new();
        for def in blocks {
            registry.blocks.insert(def.type_name.clone(), def.into());
        }
        for def in sections {
            registry.sections.insert(def.type_name.clone(), def.into());
        }
        registry
    }

    pub fn with_block(mut self, block_type: impl Into<String>, caps: TypeCapabilities) -> Self {
        self.blocks.insert(block_type.into(), caps);
        self
    }

    pub fn with_section(mut self, section_type: impl Into<String>, caps: TypeCapabilities) -> Self {
        self.sections.insert(section_type.into(), caps);
        self
    }

    /// Register a container-capable block type with default metadata
    pub fn container(self, block_type: &str) -> Self {
        let caps = TypeCapabilities {
            label: block_type.to_string(),
            container: true,
            ..Default::default()
        };
        self.with_block(block_type, caps)
    }

    /// Register a leaf block type with default metadata
    pub fn leaf(self, block_type: &str) -> Self {
        let caps = TypeCapabilities {
            label: block_type.to_string(),
            ..Default::default()
        };
        self.with_block(block_type, caps)
    }
}

impl TypeRegistry for StaticRegistry {
    fn block_type(&self, block_type: &str) -> Option<&TypeCapabilities> {
        self.blocks.get(block_type)
    }

    fn section_type(&self, section_type: &str) -> Option<&TypeCapabilities> {
        self.sections.get(section_type)
    }
}
