//! # Section / Block tree
//!
//! `Template` owns a flat, ordered list of `Section`s. Each section is the
//! root of a forest of `Block`s; container blocks hold further blocks in
//! `children`, which is the only place child ordering lives.
//!
//! `position` is derived data. It always equals the node's index in its
//! sibling sequence and is recomputed after every structural change, never
//! trusted from input (`Template::normalize`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ModelError, TypeRegistry};

/// Opaque key/value settings bag, interpreted only by the external schema.
pub type Settings = serde_json::Map<String, serde_json::Value>;

fn default_enabled() -> bool {
    true
}

/// A page element. Only container-capable types may carry children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,

    /// Discriminator into the external type registry
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(default)]
    pub position: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub children: Vec<Arc<Block>>,
}

impl Block {
    pub fn new(id: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            position: 0,
            enabled: true,
            settings: Settings::new(),
            children: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Block>) -> Self {
        self.children = children.into_iter().map(Arc::new).collect();
        Block::renumber(&mut self.children);
        self
    }

    /// Rewrite `position` so it matches sequence order.
    ///
    /// Only blocks whose position is stale are touched, so shared siblings
    /// that are already correct stay shared.
    pub fn renumber(blocks: &mut [Arc<Block>]) {
        for (index, block) in blocks.iter_mut().enumerate() {
            if block.position != index {
                Arc::make_mut(block).position = index;
            }
        }
    }

    /// Depth-first search of this block's subtree (excluding itself).
    pub fn find_descendant(&self, id: &str) -> Option<&Arc<Block>> {
        find_in_blocks(&self.children, id)
    }

    /// Number of blocks in this subtree, including this one.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_len()).sum::<usize>()
    }
}

/// Top-level page unit; the root of one block forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,

    pub section_type: String,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub position: usize,

    #[serde(default)]
    pub blocks: Vec<Arc<Block>>,
}

impl Section {
    pub fn new(id: impl Into<String>, section_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            section_type: section_type.into(),
            settings: Settings::new(),
            enabled: true,
            position: 0,
            blocks: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.blocks = blocks.into_iter().map(Arc::new).collect();
        Block::renumber(&mut self.blocks);
        self
    }

    pub fn renumber(sections: &mut [Arc<Section>]) {
        for (index, section) in sections.iter_mut().enumerate() {
            if section.position != index {
                Arc::make_mut(section).position = index;
            }
        }
    }

    pub fn find_block(&self, id: &str) -> Option<&Arc<Block>> {
        find_in_blocks(&self.blocks, id)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.iter().map(|b| b.subtree_len()).sum()
    }
}

/// One editable page: an ordered list of sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,

    /// Page kind (product, collection, index, ...)
    pub template_type: String,

    #[serde(default)]
    pub sections: Vec<Arc<Section>>,
}

/// Either kind of tree node, as handed to `insert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Section(Section),
    Block(Block),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Section(section) => &section.id,
            Node::Block(block) => &block.id,
        }
    }
}

/// Where a node lives, expressed as indices so it stays valid for a
/// copy-on-write walk of a cloned template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeLocation {
    Section {
        index: usize,
    },
    /// `path` is never empty; its last element is the block's sibling index.
    Block {
        section_index: usize,
        path: Vec<usize>,
    },
}

/// What the editing session currently has selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub section_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
}

impl Selection {
    pub fn section(section_id: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            block_id: None,
        }
    }

    pub fn block(section_id: impl Into<String>, block_id: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            block_id: Some(block_id.into()),
        }
    }

    /// The innermost selected node id.
    pub fn target_id(&self) -> &str {
        self.block_id.as_deref().unwrap_or(&self.section_id)
    }

    /// True while every id this selection names is present in `template`.
    pub fn resolves_in(&self, template: &Template) -> bool {
        let Some(section) = template.find_section(&self.section_id) else {
            return false;
        };
        match &self.block_id {
            Some(block_id) => section.find_block(block_id).is_some(),
            None => true,
        }
    }
}

impl Template {
    pub fn new(id: impl Into<String>, template_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template_type: template_type.into(),
            sections: Vec::new(),
        }
    }

    pub fn with_sections(mut self, sections: impl IntoIterator<Item = Section>) -> Self {
        self.sections = sections.into_iter().map(Arc::new).collect();
        Section::renumber(&mut self.sections);
        self
    }

    /// Parse a template and recompute every position from sequence order.
    pub fn from_json(source: &str) -> Result<Self, ModelError> {
        let mut template: Template = serde_json::from_str(source)?;
        template.normalize();
        Ok(template)
    }

    /// `from_json` followed by an invariant check against `registry`.
    pub fn from_json_checked(source: &str, registry: &dyn TypeRegistry) -> Result<Self, ModelError> {
        let template = Self::from_json(source)?;
        template.check_invariants(registry)?;
        Ok(template)
    }

    pub fn to_json_pretty(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Recompute positions at every level of the tree.
    pub fn normalize(&mut self) {
        Section::renumber(&mut self.sections);
        for section in self.sections.iter_mut() {
            if !blocks_normalized(&section.blocks) {
                normalize_blocks(&mut Arc::make_mut(section).blocks);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn find_section(&self, id: &str) -> Option<&Arc<Section>> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn section_index(&self, id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    pub fn find_block(&self, id: &str) -> Option<&Arc<Block>> {
        self.sections.iter().find_map(|s| s.find_block(id))
    }

    /// The section whose subtree contains `block_id`.
    pub fn section_of(&self, block_id: &str) -> Option<&Arc<Section>> {
        self.sections.iter().find(|s| s.find_block(block_id).is_some())
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.locate(id).is_some()
    }

    pub fn locate(&self, id: &str) -> Option<NodeLocation> {
        for (section_index, section) in self.sections.iter().enumerate() {
            if section.id == id {
                return Some(NodeLocation::Section {
                    index: section_index,
                });
            }
            let mut path = Vec::new();
            if find_path(&section.blocks, id, &mut path) {
                return Some(NodeLocation::Block {
                    section_index,
                    path,
                });
            }
        }
        None
    }

    pub fn block_at(&self, section_index: usize, path: &[usize]) -> Option<&Arc<Block>> {
        let section = self.sections.get(section_index)?;
        let (first, rest) = path.split_first()?;
        let mut block = section.blocks.get(*first)?;
        for index in rest {
            block = block.children.get(*index)?;
        }
        Some(block)
    }

    /// Ids from the section down to (not including) the node at `id`,
    /// outermost first. Empty for sections, `None` if `id` is absent.
    pub fn ancestor_ids(&self, id: &str) -> Option<Vec<String>> {
        match self.locate(id)? {
            NodeLocation::Section { .. } => Some(Vec::new()),
            NodeLocation::Block {
                section_index,
                path,
            } => {
                let section = &self.sections[section_index];
                let mut ids = vec![section.id.clone()];
                let mut siblings = &section.blocks;
                for index in &path[..path.len() - 1] {
                    let block = &siblings[*index];
                    ids.push(block.id.clone());
                    siblings = &block.children;
                }
                Some(ids)
            }
        }
    }

    /// True when `ancestor_id` is `node_id` itself or encloses it.
    pub fn is_self_or_ancestor(&self, ancestor_id: &str, node_id: &str) -> bool {
        if ancestor_id == node_id {
            return self.contains_id(node_id);
        }
        self.ancestor_ids(node_id)
            .map(|ids| ids.iter().any(|id| id == ancestor_id))
            .unwrap_or(false)
    }

    /// Id of the structural parent of the node at `location`
    /// (`None` for sections, which hang off the template root).
    pub fn parent_id_at(&self, location: &NodeLocation) -> Option<&str> {
        match location {
            NodeLocation::Section { .. } => None,
            NodeLocation::Block {
                section_index,
                path,
            } => {
                if path.len() == 1 {
                    self.sections.get(*section_index).map(|s| s.id.as_str())
                } else {
                    self.block_at(*section_index, &path[..path.len() - 1])
                        .map(|b| b.id.as_str())
                }
            }
        }
    }

    /// Ordered child ids of a parent; `None` addresses the section list.
    pub fn child_ids(&self, parent_id: Option<&str>) -> Option<Vec<String>> {
        let Some(parent_id) = parent_id else {
            return Some(self.sections.iter().map(|s| s.id.clone()).collect());
        };
        match self.locate(parent_id)? {
            NodeLocation::Section { index } => Some(
                self.sections[index]
                    .blocks
                    .iter()
                    .map(|b| b.id.clone())
                    .collect(),
            ),
            NodeLocation::Block {
                section_index,
                path,
            } => self
                .block_at(section_index, &path)
                .map(|b| b.children.iter().map(|c| c.id.clone()).collect()),
        }
    }

    /// Every section and block id, depth-first.
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for section in &self.sections {
            ids.push(section.id.clone());
            collect_ids(&section.blocks, &mut ids);
        }
        ids
    }

    pub fn node_count(&self) -> usize {
        self.sections.iter().map(|s| 1 + s.block_count()).sum()
    }
}

fn find_in_blocks<'a>(blocks: &'a [Arc<Block>], id: &str) -> Option<&'a Arc<Block>> {
    for block in blocks {
        if block.id == id {
            return Some(block);
        }
        if let Some(found) = find_in_blocks(&block.children, id) {
            return Some(found);
        }
    }
    None
}

fn find_path(blocks: &[Arc<Block>], id: &str, path: &mut Vec<usize>) -> bool {
    for (index, block) in blocks.iter().enumerate() {
        path.push(index);
        if block.id == id || find_path(&block.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn collect_ids(blocks: &[Arc<Block>], ids: &mut Vec<String>) {
    for block in blocks {
        ids.push(block.id.clone());
        collect_ids(&block.children, ids);
    }
}

fn blocks_normalized(blocks: &[Arc<Block>]) -> bool {
    blocks
        .iter()
        .enumerate()
        .all(|(index, block)| block.position == index && blocks_normalized(&block.children))
}

fn normalize_blocks(blocks: &mut [Arc<Block>]) {
    for (index, block) in blocks.iter_mut().enumerate() {
        if block.position != index || !blocks_normalized(&block.children) {
            let block = Arc::make_mut(block);
            block.position = index;
            normalize_blocks(&mut block.children);
        }
    }
}
