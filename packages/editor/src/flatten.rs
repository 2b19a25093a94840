//! # Flattened tree view
//!
//! `flatten` produces a depth-first, parent-annotated list of shallow nodes
//! (sections without blocks, blocks without children). `unflatten` rebuilds
//! the template from such a list and the template header. Consumers that
//! operate on flat lists (outline panels, drag previews) round-trip through
//! these two.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pagecraft_model::visitor::{walk_block, walk_section, BlockContext, Visitor};
use pagecraft_model::{Block, Node, Section, Template};
use serde::{Deserialize, Serialize};

use crate::MutationError;

/// One entry of a flattened tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatNode {
    /// The node without its nested children
    pub node: Node,
    pub parent_id: Option<String>,
    pub depth: usize,
}

impl FlatNode {
    pub fn id(&self) -> &str {
        self.node.id()
    }
}

struct Flattener(Vec<FlatNode>);

impl Visitor for Flattener {
    fn visit_section(&mut self, section: &Section) {
        let shallow = Section {
            blocks: Vec::new(),
            ..section.clone()
        };
        self.0.push(FlatNode {
            node: Node::Section(shallow),
            parent_id: None,
            depth: 0,
        });
        walk_section(self, section);
    }

    fn visit_block(&mut self, block: &Block, ctx: BlockContext<'_>) {
        let shallow = Block {
            children: Vec::new(),
            ..block.clone()
        };
        self.0.push(FlatNode {
            node: Node::Block(shallow),
            parent_id: Some(ctx.parent_id.to_string()),
            depth: ctx.depth,
        });
        walk_block(self, block, ctx);
    }
}

/// Depth-first, parent-annotated traversal of `tree`
pub fn flatten(tree: &Template) -> Vec<FlatNode> {
    let mut flattener = Flattener(Vec::with_capacity(tree.node_count()));
    flattener.visit_template(tree);
    flattener.0
}

/// Rebuild a template from its header and a flat list.
///
/// Children are attached in list order; positions are recomputed.
pub fn unflatten(
    id: impl Into<String>,
    template_type: impl Into<String>,
    nodes: impl IntoIterator<Item = FlatNode>,
) -> Result<Template, MutationError> {
    let nodes: Vec<FlatNode> = nodes.into_iter().collect();

    let mut ids = HashSet::new();
    for entry in &nodes {
        if !ids.insert(entry.id().to_string()) {
            return Err(MutationError::DuplicateId(entry.id().to_string()));
        }
    }

    let mut roots = Vec::new();
    let mut children: HashMap<&str, Vec<&FlatNode>> = HashMap::new();
    for entry in &nodes {
        match (&entry.parent_id, &entry.node) {
            (None, Node::Section(_)) => roots.push(entry),
            (None, Node::Block(block)) => return Err(MutationError::NotCapable(block.id.clone())),
            (Some(parent_id), Node::Section(_)) => {
                return Err(MutationError::NotCapable(parent_id.clone()))
            }
            (Some(parent_id), Node::Block(_)) => {
                if !ids.contains(parent_id) {
                    return Err(MutationError::NotFound(parent_id.clone()));
                }
                children.entry(parent_id.as_str()).or_default().push(entry);
            }
        }
    }

    let mut built = 0usize;
    let mut sections = Vec::with_capacity(roots.len());
    for root in roots {
        if let Node::Section(section) = &root.node {
            let mut section = section.clone();
            section.blocks = build_blocks(&section.id, &children, &mut built);
            sections.push(Arc::new(section));
            built += 1;
        }
    }
    Section::renumber(&mut sections);
    let template = Template {
        id: id.into(),
        template_type: template_type.into(),
        sections,
    };

    // Anything not reached from a section hangs off a parent chain that loops.
    if built != nodes.len() {
        let reached: HashSet<String> = template.all_ids().into_iter().collect();
        if let Some(orphan) = nodes.iter().find(|n| !reached.contains(n.id())) {
            return Err(MutationError::CircularReference {
                node_id: orphan.id().to_string(),
                new_parent_id: orphan.parent_id.clone().unwrap_or_default(),
            });
        }
    }

    Ok(template)
}

fn build_blocks(
    parent_id: &str,
    children: &HashMap<&str, Vec<&FlatNode>>,
    built: &mut usize,
) -> Vec<Arc<Block>> {
    let Some(entries) = children.get(parent_id) else {
        return Vec::new();
    };

    let mut blocks = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Node::Block(block) = &entry.node {
            let mut block = block.clone();
            block.children = build_blocks(&block.id, children, built);
            blocks.push(Arc::new(block));
            *built += 1;
        }
    }
    Block::renumber(&mut blocks);
    blocks
}
