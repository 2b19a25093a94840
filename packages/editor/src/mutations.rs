//! # Tree Mutations
//!
//! Pure, copy-on-write operations over a `Template`.
//!
//! ## Design Principles
//!
//! 1. **Pure**: every operation takes `&Template` and returns a new one; the
//!    input is never touched
//! 2. **Structurally shared**: only the nodes on the path to a change are
//!    cloned (`Arc::make_mut`), every other subtree is reused
//! 3. **Validated up front**: all checks run before the first structural
//!    change, so a failure never exposes a partial tree
//! 4. **Positions recomputed**: sibling positions are rewritten from sequence
//!    order after each change
//!
//! ## Mutation Semantics
//!
//! ### Move
//! - Atomic relocation of a node with its subtree
//! - Fails if the new parent is the node or one of its descendants
//! - Fails if the new parent is a non-container block
//!
//! ### Reorder
//! - Takes the complete ordered id list of a parent's children
//! - Partial or duplicated payloads are rejected rather than dropping nodes
//!
//! ### Remove
//! - Removes the node and all descendants

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pagecraft_model::{Block, Node, NodeLocation, Section, Settings, Template, TypeRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ROOT: &str = "<root>";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Moving {node_id} under {new_parent_id} would create a cycle")]
    CircularReference {
        node_id: String,
        new_parent_id: String,
    },

    #[error("Target cannot hold this node: {0}")]
    NotCapable(String),

    #[error("Reorder of {parent} is not a permutation of its children")]
    IncompleteSet { parent: String },

    #[error("Duplicate id: {0}")]
    DuplicateId(String),
}

impl MutationError {
    /// Rejections caused by the user's drop target rather than stale ids
    pub fn is_user_rejection(&self) -> bool {
        matches!(
            self,
            MutationError::CircularReference { .. } | MutationError::NotCapable(_)
        )
    }
}

/// Full-value replacement of section fields; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Full-value replacement of block fields; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Semantic mutations (intent-preserving operations)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Mutation {
    Insert {
        parent_id: Option<String>,
        node: Node,
        index: Option<usize>,
    },

    Remove {
        node_id: String,
    },

    Move {
        node_id: String,
        new_parent_id: Option<String>,
        index: Option<usize>,
    },

    Reorder {
        parent_id: Option<String>,
        ordered_ids: Vec<String>,
    },

    UpdateSection {
        section_id: String,
        patch: SectionPatch,
    },

    UpdateBlock {
        block_id: String,
        patch: BlockPatch,
    },

    /// Replace a temporary client id with the canonical server id
    RenameId {
        old_id: String,
        new_id: String,
    },
}

impl Mutation {
    /// Apply to `tree`, producing the next tree
    pub fn apply(
        &self,
        tree: &Template,
        registry: &dyn TypeRegistry,
    ) -> Result<Template, MutationError> {
        match self {
            Mutation::Insert {
                parent_id,
                node,
                index,
            } => insert(tree, registry, parent_id.as_deref(), node.clone(), *index),
            Mutation::Remove { node_id } => remove(tree, node_id),
            Mutation::Move {
                node_id,
                new_parent_id,
                index,
            } => move_node(tree, registry, node_id, new_parent_id.as_deref(), *index),
            Mutation::Reorder {
                parent_id,
                ordered_ids,
            } => reorder_siblings(tree, parent_id.as_deref(), ordered_ids),
            Mutation::UpdateSection { section_id, patch } => update_section(tree, section_id, patch),
            Mutation::UpdateBlock { block_id, patch } => update_block(tree, block_id, patch),
            Mutation::RenameId { old_id, new_id } => rename_id(tree, old_id, new_id),
        }
    }

    /// Validate without keeping the result
    pub fn validate(
        &self,
        tree: &Template,
        registry: &dyn TypeRegistry,
    ) -> Result<(), MutationError> {
        self.apply(tree, registry).map(|_| ())
    }

    /// Point every id this mutation mentions at `new_id` instead of `old_id`
    pub fn rename_node_id(&mut self, old_id: &str, new_id: &str) {
        let swap = |id: &mut String| {
            if id == old_id {
                *id = new_id.to_string();
            }
        };
        match self {
            Mutation::Insert { parent_id, node, .. } => {
                parent_id.iter_mut().for_each(swap);
                match node {
                    Node::Section(section) => {
                        swap(&mut section.id);
                        rename_in_blocks(&mut section.blocks, old_id, new_id);
                    }
                    Node::Block(block) => {
                        swap(&mut block.id);
                        rename_in_blocks(&mut block.children, old_id, new_id);
                    }
                }
            }
            Mutation::Remove { node_id } => swap(node_id),
            Mutation::Move {
                node_id,
                new_parent_id,
                ..
            } => {
                swap(node_id);
                new_parent_id.iter_mut().for_each(swap);
            }
            Mutation::Reorder {
                parent_id,
                ordered_ids,
            } => {
                parent_id.iter_mut().for_each(swap);
                ordered_ids.iter_mut().for_each(swap);
            }
            Mutation::UpdateSection { section_id, .. } => swap(section_id),
            Mutation::UpdateBlock { block_id, .. } => swap(block_id),
            Mutation::RenameId { old_id: from, new_id: to } => {
                swap(from);
                swap(to);
            }
        }
    }

    /// Label used for history entries
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Insert {
                node: Node::Section(_),
                ..
            } => "add_section",
            Mutation::Insert {
                node: Node::Block(_),
                ..
            } => "add_block",
            Mutation::Remove { .. } => "delete",
            Mutation::Move { .. } => "move",
            Mutation::Reorder { .. } => "reorder",
            Mutation::UpdateSection { .. } => "update_section",
            Mutation::UpdateBlock { .. } => "update_block",
            Mutation::RenameId { .. } => "rename_id",
        }
    }
}

fn rename_in_blocks(blocks: &mut [Arc<Block>], old_id: &str, new_id: &str) {
    for block in blocks.iter_mut() {
        if block.id == old_id {
            Arc::make_mut(block).id = new_id.to_string();
        }
        if !block.children.is_empty() {
            rename_in_blocks(&mut Arc::make_mut(block).children, old_id, new_id);
        }
    }
}

/// Resolved insertion point
#[derive(Debug, Clone, PartialEq)]
enum Parent {
    Root,
    Section(usize),
    Block { section_index: usize, path: Vec<usize> },
}

impl Parent {
    fn accepts(&self, node: &Node) -> bool {
        matches!(
            (self, node),
            (Parent::Root, Node::Section(_))
                | (Parent::Section(_) | Parent::Block { .. }, Node::Block(_))
        )
    }
}

fn resolve_parent(
    tree: &Template,
    registry: &dyn TypeRegistry,
    parent_id: Option<&str>,
) -> Result<Parent, MutationError> {
    let Some(parent_id) = parent_id else {
        return Ok(Parent::Root);
    };

    match tree.locate(parent_id) {
        None => Err(MutationError::NotFound(parent_id.to_string())),
        Some(NodeLocation::Section { index }) => Ok(Parent::Section(index)),
        Some(NodeLocation::Block {
            section_index,
            path,
        }) => {
            let block = tree
                .block_at(section_index, &path)
                .ok_or_else(|| MutationError::NotFound(parent_id.to_string()))?;
            if !registry.is_container(&block.block_type) {
                return Err(MutationError::NotCapable(parent_id.to_string()));
            }
            Ok(Parent::Block {
                section_index,
                path,
            })
        }
    }
}

/// Copy-on-write access to the block list under a section (empty path) or
/// under the block at `path`.
fn blocks_mut<'a>(
    tree: &'a mut Template,
    section_index: usize,
    path: &[usize],
) -> &'a mut Vec<Arc<Block>> {
    let section = Arc::make_mut(&mut tree.sections[section_index]);
    let mut blocks = &mut section.blocks;
    for index in path {
        let current = blocks;
        blocks = &mut Arc::make_mut(&mut current[*index]).children;
    }
    blocks
}

fn parent_blocks_mut<'a>(tree: &'a mut Template, parent: &Parent) -> Option<&'a mut Vec<Arc<Block>>> {
    match parent {
        Parent::Root => None,
        Parent::Section(index) => Some(blocks_mut(tree, *index, &[])),
        Parent::Block {
            section_index,
            path,
        } => Some(blocks_mut(tree, *section_index, path)),
    }
}

fn node_ids(node: &Node) -> Vec<String> {
    fn collect(blocks: &[Arc<Block>], ids: &mut Vec<String>) {
        for block in blocks {
            ids.push(block.id.clone());
            collect(&block.children, ids);
        }
    }

    let mut ids = Vec::new();
    match node {
        Node::Section(section) => {
            ids.push(section.id.clone());
            collect(&section.blocks, &mut ids);
        }
        Node::Block(block) => {
            ids.push(block.id.clone());
            collect(&block.children, &mut ids);
        }
    }
    ids
}

fn check_children_allowed(
    blocks: &[Arc<Block>],
    registry: &dyn TypeRegistry,
) -> Result<(), MutationError> {
    for block in blocks {
        if !block.children.is_empty() && !registry.is_container(&block.block_type) {
            return Err(MutationError::NotCapable(block.id.clone()));
        }
        check_children_allowed(&block.children, registry)?;
    }
    Ok(())
}

fn normalize_blocks(blocks: &mut [Arc<Block>]) {
    Block::renumber(blocks);
    for block in blocks.iter_mut() {
        if !block.children.is_empty() {
            normalize_blocks(&mut Arc::make_mut(block).children);
        }
    }
}

/// Add a section (`parent_id = None`) or a block under a section or
/// container block, at `at_index` (default: end).
pub fn insert(
    tree: &Template,
    registry: &dyn TypeRegistry,
    parent_id: Option<&str>,
    node: Node,
    at_index: Option<usize>,
) -> Result<Template, MutationError> {
    let parent = resolve_parent(tree, registry, parent_id)?;
    if !parent.accepts(&node) {
        return Err(MutationError::NotCapable(
            parent_id.unwrap_or(ROOT).to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for id in node_ids(&node) {
        if tree.contains_id(&id) || !seen.insert(id.clone()) {
            return Err(MutationError::DuplicateId(id));
        }
    }

    let mut next = tree.clone();
    match node {
        Node::Section(mut section) => {
            check_children_allowed(&section.blocks, registry)?;
            normalize_blocks(&mut section.blocks);
            let index = at_index.unwrap_or(next.sections.len()).min(next.sections.len());
            next.sections.insert(index, Arc::new(section));
            Section::renumber(&mut next.sections);
        }
        Node::Block(mut block) => {
            if !block.children.is_empty() && !registry.is_container(&block.block_type) {
                return Err(MutationError::NotCapable(block.id.clone()));
            }
            check_children_allowed(&block.children, registry)?;
            normalize_blocks(&mut block.children);
            let siblings = parent_blocks_mut(&mut next, &parent)
                .ok_or_else(|| MutationError::NotCapable(ROOT.to_string()))?;
            let index = at_index.unwrap_or(siblings.len()).min(siblings.len());
            siblings.insert(index, Arc::new(block));
            Block::renumber(siblings);
        }
    }

    Ok(next)
}

/// Delete a node and its entire subtree.
pub fn remove(tree: &Template, node_id: &str) -> Result<Template, MutationError> {
    let location = tree
        .locate(node_id)
        .ok_or_else(|| MutationError::NotFound(node_id.to_string()))?;

    let mut next = tree.clone();
    detach(&mut next, &location)?;
    Ok(next)
}

/// Remove the node at `location` from its sibling list and renumber the
/// remaining siblings. `location` must come from `tree`.
fn detach(tree: &mut Template, location: &NodeLocation) -> Result<Node, MutationError> {
    match location {
        NodeLocation::Section { index } => {
            let section = tree.sections.remove(*index);
            Section::renumber(&mut tree.sections);
            Ok(Node::Section(Arc::unwrap_or_clone(section)))
        }
        NodeLocation::Block {
            section_index,
            path,
        } => {
            let (last, parent_path) = split_path(path)?;
            let siblings = blocks_mut(tree, *section_index, parent_path);
            let block = siblings.remove(last);
            Block::renumber(siblings);
            Ok(Node::Block(Arc::unwrap_or_clone(block)))
        }
    }
}

fn split_path(path: &[usize]) -> Result<(usize, &[usize]), MutationError> {
    path.split_last()
        .map(|(last, parent)| (*last, parent))
        .ok_or_else(|| MutationError::NotFound(ROOT.to_string()))
}

/// Relocate a node (with its subtree) under `new_parent_id` at `at_index`
/// (default: end). `None` addresses the section list.
pub fn move_node(
    tree: &Template,
    registry: &dyn TypeRegistry,
    node_id: &str,
    new_parent_id: Option<&str>,
    at_index: Option<usize>,
) -> Result<Template, MutationError> {
    let location = tree
        .locate(node_id)
        .ok_or_else(|| MutationError::NotFound(node_id.to_string()))?;

    // Ancestor walk from the proposed parent; runs before anything changes.
    if let Some(new_parent_id) = new_parent_id {
        if tree.is_self_or_ancestor(node_id, new_parent_id) {
            return Err(MutationError::CircularReference {
                node_id: node_id.to_string(),
                new_parent_id: new_parent_id.to_string(),
            });
        }
    }

    let parent = resolve_parent(tree, registry, new_parent_id)?;
    let is_section = matches!(location, NodeLocation::Section { .. });
    if is_section != (parent == Parent::Root) {
        return Err(MutationError::NotCapable(
            new_parent_id.unwrap_or(ROOT).to_string(),
        ));
    }

    let mut next = tree.clone();
    let node = detach(&mut next, &location)?;

    // Indices may have shifted after detaching; resolve the parent again by id.
    let parent = resolve_parent(&next, registry, new_parent_id)?;
    match node {
        Node::Section(section) => {
            let index = at_index.unwrap_or(next.sections.len()).min(next.sections.len());
            next.sections.insert(index, Arc::new(section));
            Section::renumber(&mut next.sections);
        }
        Node::Block(block) => {
            let siblings = parent_blocks_mut(&mut next, &parent)
                .ok_or_else(|| MutationError::NotCapable(ROOT.to_string()))?;
            let index = at_index.unwrap_or(siblings.len()).min(siblings.len());
            siblings.insert(index, Arc::new(block));
            Block::renumber(siblings);
        }
    }

    Ok(next)
}

/// Reorder the children of `parent_id` (or the section list) to match
/// `ordered_ids`, which must be a permutation of the current child ids.
pub fn reorder_siblings(
    tree: &Template,
    parent_id: Option<&str>,
    ordered_ids: &[String],
) -> Result<Template, MutationError> {
    let current = tree
        .child_ids(parent_id)
        .ok_or_else(|| MutationError::NotFound(parent_id.unwrap_or(ROOT).to_string()))?;

    let incomplete = || MutationError::IncompleteSet {
        parent: parent_id.unwrap_or(ROOT).to_string(),
    };
    if ordered_ids.len() != current.len() {
        return Err(incomplete());
    }
    let wanted: HashSet<&str> = ordered_ids.iter().map(String::as_str).collect();
    if wanted.len() != ordered_ids.len() || current.iter().any(|id| !wanted.contains(id.as_str())) {
        return Err(incomplete());
    }

    let mut next = tree.clone();
    match parent_id {
        None => {
            next.sections = reordered(&next.sections, ordered_ids, |s| &s.id);
            Section::renumber(&mut next.sections);
        }
        Some(parent_id) => {
            let location = tree
                .locate(parent_id)
                .ok_or_else(|| MutationError::NotFound(parent_id.to_string()))?;
            let siblings = match location {
                NodeLocation::Section { index } => blocks_mut(&mut next, index, &[]),
                NodeLocation::Block {
                    section_index,
                    path,
                } => blocks_mut(&mut next, section_index, &path),
            };
            let ordered = reordered(siblings, ordered_ids, |b| &b.id);
            *siblings = ordered;
            Block::renumber(siblings);
        }
    }

    Ok(next)
}

fn reordered<T>(items: &[Arc<T>], ordered_ids: &[String], id_of: impl Fn(&T) -> &String) -> Vec<Arc<T>> {
    let by_id: HashMap<&str, &Arc<T>> = items.iter().map(|item| (id_of(item.as_ref()).as_str(), item)).collect();
    ordered_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).map(|item| Arc::clone(item)))
        .collect()
}

pub fn update_section(
    tree: &Template,
    section_id: &str,
    patch: &SectionPatch,
) -> Result<Template, MutationError> {
    let index = tree
        .section_index(section_id)
        .ok_or_else(|| MutationError::NotFound(section_id.to_string()))?;

    let mut next = tree.clone();
    let section = Arc::make_mut(&mut next.sections[index]);
    if let Some(settings) = &patch.settings {
        section.settings = settings.clone();
    }
    if let Some(enabled) = patch.enabled {
        section.enabled = enabled;
    }
    Ok(next)
}

pub fn update_block(
    tree: &Template,
    block_id: &str,
    patch: &BlockPatch,
) -> Result<Template, MutationError> {
    let Some(NodeLocation::Block {
        section_index,
        path,
    }) = tree.locate(block_id)
    else {
        return Err(MutationError::NotFound(block_id.to_string()));
    };

    let mut next = tree.clone();
    let (last, parent_path) = split_path(&path)?;
    let siblings = blocks_mut(&mut next, section_index, parent_path);
    let block = Arc::make_mut(&mut siblings[last]);
    if let Some(settings) = &patch.settings {
        block.settings = settings.clone();
    }
    if let Some(enabled) = patch.enabled {
        block.enabled = enabled;
    }
    Ok(next)
}

/// Swap a node's id, e.g. a temporary client id for a server-assigned one.
pub fn rename_id(tree: &Template, old_id: &str, new_id: &str) -> Result<Template, MutationError> {
    if old_id == new_id {
        return tree
            .contains_id(old_id)
            .then(|| tree.clone())
            .ok_or_else(|| MutationError::NotFound(old_id.to_string()));
    }
    if tree.contains_id(new_id) {
        return Err(MutationError::DuplicateId(new_id.to_string()));
    }
    let location = tree
        .locate(old_id)
        .ok_or_else(|| MutationError::NotFound(old_id.to_string()))?;

    let mut next = tree.clone();
    match location {
        NodeLocation::Section { index } => {
            Arc::make_mut(&mut next.sections[index]).id = new_id.to_string();
        }
        NodeLocation::Block {
            section_index,
            path,
        } => {
            let (last, parent_path) = split_path(&path)?;
            let siblings = blocks_mut(&mut next, section_index, parent_path);
            Arc::make_mut(&mut siblings[last]).id = new_id.to_string();
        }
    }
    Ok(next)
}
