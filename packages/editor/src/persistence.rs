//! # Persistence boundary
//!
//! The store behind the editor is external. The session only sees the
//! [`Persistence`] trait: create/update/delete/reorder keyed by node id,
//! plus a whole-template save used after history navigation.
//!
//! Child ordering has exactly one home in the tree (`Block::children`).
//! Some stores also expect the ordered child ids inside a block's
//! `settings.blocks`; that mirror is produced here on the way out and
//! stripped on the way in, so it never reaches the tree.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pagecraft_model::{Block, Node, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::PersistenceError;

const MIRROR_KEY: &str = "blocks";
const TEMP_PREFIX: &str = "tmp-";

/// A node as the store sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub payload: Value,
}

impl PersistedNode {
    pub fn from_node(node: &Node, parent_id: Option<&str>) -> Result<Self, PersistenceError> {
        let payload = match node {
            Node::Section(section) => {
                let mut value = serde_json::to_value(section)?;
                if let Some(blocks) = value.get_mut("blocks").and_then(Value::as_array_mut) {
                    blocks.iter_mut().for_each(mirror_children);
                }
                value
            }
            Node::Block(block) => persisted_block_payload(block)?,
        };
        Ok(Self {
            id: node.id().to_string(),
            parent_id: parent_id.map(str::to_string),
            payload,
        })
    }
}

/// Serialize a block for the store, mirroring each container's ordered
/// child ids into `settings.blocks`
pub fn persisted_block_payload(block: &Block) -> Result<Value, PersistenceError> {
    let mut value = serde_json::to_value(block)?;
    mirror_children(&mut value);
    Ok(value)
}

/// Rebuild a block from a store payload. Any `settings.blocks` mirror is
/// dropped; `children` is the only source of ordering.
pub fn block_from_payload(mut payload: Value) -> Result<Block, PersistenceError> {
    strip_mirror(&mut payload);
    let mut block: Block = serde_json::from_value(payload)?;
    renumber_subtree(&mut block.children);
    Ok(block)
}

fn mirror_children(value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    let mut child_ids = Vec::new();
    if let Some(children) = object.get_mut("children").and_then(Value::as_array_mut) {
        for child in children.iter_mut() {
            if let Some(id) = child.get("id") {
                child_ids.push(id.clone());
            }
            mirror_children(child);
        }
    }
    if child_ids.is_empty() {
        return;
    }
    let settings = object
        .entry("settings")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Some(settings) = settings.as_object_mut() {
        settings.insert(MIRROR_KEY.to_string(), Value::Array(child_ids));
    }
}

fn strip_mirror(value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    if let Some(settings) = object.get_mut("settings").and_then(Value::as_object_mut) {
        settings.remove(MIRROR_KEY);
    }
    if let Some(children) = object.get_mut("children").and_then(Value::as_array_mut) {
        children.iter_mut().for_each(strip_mirror);
    }
}

fn renumber_subtree(blocks: &mut [Arc<Block>]) {
    Block::renumber(blocks);
    for block in blocks.iter_mut() {
        if !block.children.is_empty() {
            renumber_subtree(&mut Arc::make_mut(block).children);
        }
    }
}

/// External store keyed by section/block id
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Returns the stored node carrying its canonical id
    async fn create(&self, template_id: &str, node: PersistedNode) -> Result<PersistedNode, PersistenceError>;

    async fn update(&self, template_id: &str, node: PersistedNode) -> Result<PersistedNode, PersistenceError>;

    async fn delete(&self, template_id: &str, node_id: &str) -> Result<(), PersistenceError>;

    async fn reorder(
        &self,
        template_id: &str,
        parent_id: Option<&str>,
        ordered_ids: &[String],
    ) -> Result<(), PersistenceError>;

    async fn save_template(&self, template: &Template) -> Result<(), PersistenceError>;
}

/// One background call the session has decided to make
#[derive(Debug, Clone, PartialEq)]
pub enum PersistRequest {
    Create(PersistedNode),
    Update(PersistedNode),
    Delete {
        node_id: String,
    },
    /// Re-parent (`node.parent_id`) then commit the new parent's ordering
    Move {
        node: PersistedNode,
        ordered_ids: Vec<String>,
    },
    Reorder {
        parent_id: Option<String>,
        ordered_ids: Vec<String>,
    },
    SaveTemplate(Template),
}

impl PersistRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistRequest::Create(_) => "create",
            PersistRequest::Update(_) => "update",
            PersistRequest::Delete { .. } => "delete",
            PersistRequest::Move { .. } => "move",
            PersistRequest::Reorder { .. } => "reorder",
            PersistRequest::SaveTemplate(_) => "save_template",
        }
    }

    /// Run against `store`. A create that came back under a different id
    /// yields `(temporary, canonical)`.
    pub async fn execute(
        self,
        store: &dyn Persistence,
        template_id: &str,
    ) -> Result<Option<(String, String)>, PersistenceError> {
        match self {
            PersistRequest::Create(node) => {
                let temp_id = node.id.clone();
                let stored = store.create(template_id, node).await?;
                Ok((stored.id != temp_id).then_some((temp_id, stored.id)))
            }
            PersistRequest::Update(node) => {
                store.update(template_id, node).await?;
                Ok(None)
            }
            PersistRequest::Delete { node_id } => {
                store.delete(template_id, &node_id).await?;
                Ok(None)
            }
            PersistRequest::Move { node, ordered_ids } => {
                let parent_id = node.parent_id.clone();
                store.update(template_id, node).await?;
                store
                    .reorder(template_id, parent_id.as_deref(), &ordered_ids)
                    .await?;
                Ok(None)
            }
            PersistRequest::Reorder {
                parent_id,
                ordered_ids,
            } => {
                store
                    .reorder(template_id, parent_id.as_deref(), &ordered_ids)
                    .await?;
                Ok(None)
            }
            PersistRequest::SaveTemplate(template) => {
                store.save_template(&template).await?;
                Ok(None)
            }
        }
    }
}

/// Record of one call received by [`MemoryPersistence`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistCall {
    pub op: &'static str,
    pub target: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: HashMap<String, PersistedNode>,
    order: HashMap<String, Vec<String>>,
    aliases: HashMap<String, String>,
    template: Option<Template>,
    calls: Vec<PersistCall>,
    fail_next: usize,
    next_id: u64,
}

impl MemoryState {
    fn resolve(&self, id: &str) -> String {
        self.aliases.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn record(&mut self, op: &'static str, target: &str) -> Result<(), PersistenceError> {
        self.calls.push(PersistCall {
            op,
            target: target.to_string(),
        });
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(PersistenceError::Unavailable(format!(
                "injected failure for {} {}",
                op, target
            )));
        }
        Ok(())
    }
}

/// In-memory store assigning canonical `srv-<n>` ids to temporary ids
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to keep requests in flight in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `count` calls with `PersistenceError::Unavailable`
    pub fn fail_next(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = count;
        }
    }

    pub fn calls(&self) -> Vec<PersistCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn node(&self, id: &str) -> Option<PersistedNode> {
        let state = self.state.lock().ok()?;
        state.nodes.get(&state.resolve(id)).cloned()
    }

    pub fn order(&self, parent_id: Option<&str>) -> Option<Vec<String>> {
        let state = self.state.lock().ok()?;
        state.order.get(parent_id.unwrap_or("")).cloned()
    }

    pub fn saved_template(&self) -> Option<Template> {
        self.state.lock().ok()?.template.clone()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, PersistenceError> {
        self.state
            .lock()
            .map_err(|_| PersistenceError::Unavailable("store lock poisoned".to_string()))
    }

    async fn wait(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn create(&self, _template_id: &str, mut node: PersistedNode) -> Result<PersistedNode, PersistenceError> {
        self.wait().await;
        let mut state = self.state()?;
        state.record("create", &node.id)?;

        if node.id.starts_with(TEMP_PREFIX) {
            state.next_id += 1;
            let canonical = format!("srv-{}", state.next_id);
            state.aliases.insert(node.id.clone(), canonical.clone());
            node.id = canonical;
        }
        if let Some(object) = node.payload.as_object_mut() {
            object.insert("id".to_string(), Value::String(node.id.clone()));
        }
        node.parent_id = node.parent_id.map(|p| state.resolve(&p));
        debug!(node_id = %node.id, "Stored node");
        state.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn update(&self, _template_id: &str, mut node: PersistedNode) -> Result<PersistedNode, PersistenceError> {
        self.wait().await;
        let mut state = self.state()?;
        state.record("update", &node.id)?;

        node.id = state.resolve(&node.id);
        node.parent_id = node.parent_id.map(|p| state.resolve(&p));
        state.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn delete(&self, _template_id: &str, node_id: &str) -> Result<(), PersistenceError> {
        self.wait().await;
        let mut state = self.state()?;
        state.record("delete", node_id)?;

        // Deleting an unknown id is a no-op; the node may never have been stored
        let id = state.resolve(node_id);
        state.nodes.remove(&id);
        Ok(())
    }

    async fn reorder(
        &self,
        _template_id: &str,
        parent_id: Option<&str>,
        ordered_ids: &[String],
    ) -> Result<(), PersistenceError> {
        self.wait().await;
        let mut state = self.state()?;
        state.record("reorder", parent_id.unwrap_or(""))?;

        let parent = parent_id.map(|p| state.resolve(p)).unwrap_or_default();
        let ids = ordered_ids.iter().map(|id| state.resolve(id)).collect();
        state.order.insert(parent, ids);
        Ok(())
    }

    async fn save_template(&self, template: &Template) -> Result<(), PersistenceError> {
        self.wait().await;
        let mut state = self.state()?;
        state.record("save_template", &template.id)?;
        state.template = Some(template.clone());
        Ok(())
    }
}
