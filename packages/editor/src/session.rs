//! # Edit Session
//!
//! Single owner of the authoritative tree, the selection and the history.
//! Intents from the UI layer are processed one at a time:
//!
//! 1. validate and apply through the mutation engine (the tree is untouched
//!    on any failure)
//! 2. record history (structural edits always; continuous edits coalesced
//!    or skipped)
//! 3. mirror the change to the preview
//! 4. hand the change to the persistence collaborator in the background
//!
//! The tree updates optimistically. Background calls report back over a
//! channel and are applied by `process_persistence` / `next_persistence_outcome`
//! on the owning task: a canonical id replaces the temporary one, a failure
//! undoes the change.
//!
//! ## Rollback
//!
//! The session keeps a `base` tree and a journal of the changes made on top
//! of it, each tagged with the persistence call that carries it. The live
//! tree is always `base` with the journal replayed. When a call fails, only
//! its own pending entries are dropped and the rest of the journal is
//! replayed, so overlapping calls neither resurrect a rejected change nor
//! discard an accepted one. Confirmed entries at the front of the journal
//! are folded into `base`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pagecraft_model::{Block, IdGenerator, Node, NodeLocation, Section, Selection, Settings, Template, TypeRegistry};
use pagecraft_sync::{decode, diff_sections, InboundEvent, PreviewMessage, PreviewReplica, PreviewSender, PreviewTransport};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::history::{History, HistoryState, PushOutcome};
use crate::mutations::{self, BlockPatch, Mutation, MutationError, SectionPatch};
use crate::persistence::{PersistRequest, PersistedNode, Persistence};
use crate::{Debouncer, EditorConfig, Intent, PersistenceError, SessionError};

const TEMPLATE_SAVE_KEY: &str = "template";

/// What history stores: the tree and the selection seen with it
#[derive(Debug, Clone, PartialEq)]
pub struct EditorSnapshot {
    pub template: Template,
    pub selection: Option<Selection>,
}

impl HistoryState for EditorSnapshot {
    fn is_empty_state(&self) -> bool {
        self.template.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Brief, non-blocking message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied {
        action: &'static str,
        /// Temporary id of a node created by this intent
        created_id: Option<String>,
    },
    /// Validation failed; nothing changed
    Rejected { error: MutationError, notice: Notice },
    /// Nothing to do (e.g. undo at the oldest entry)
    Unchanged,
}

/// How one background call ended, as applied to the session
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceReport {
    Persisted { op: &'static str },
    Reconciled { temp_id: String, canonical_id: String },
    RolledBack { op: &'static str, error: String },
    /// A newer call for the same target was scheduled after this one
    Superseded { op: &'static str },
}

#[derive(Debug)]
struct PersistenceOutcome {
    key: String,
    generation: u64,
    op: &'static str,
    result: Result<Option<(String, String)>, PersistenceError>,
}

/// One tree change that persistence has not confirmed yet
#[derive(Debug, Clone)]
enum Change {
    Apply(Mutation),
    /// Undo/redo installs a whole history state
    Replace(Template),
}

impl Change {
    fn apply(&self, tree: &Template, registry: &dyn TypeRegistry) -> Result<Template, MutationError> {
        match self {
            Change::Apply(mutation) => mutation.apply(tree, registry),
            Change::Replace(template) => Ok(template.clone()),
        }
    }

    fn rename_node_id(&mut self, temp_id: &str, canonical_id: &str) {
        match self {
            Change::Apply(mutation) => mutation.rename_node_id(temp_id, canonical_id),
            Change::Replace(template) => rename_in_template(template, temp_id, canonical_id),
        }
    }
}

#[derive(Debug)]
struct JournalEntry {
    /// Persistence key of the call carrying this change
    key: String,
    change: Change,
    /// Cleared once the call reports success
    pending: bool,
}

struct PersistJob {
    key: String,
    request: PersistRequest,
    delay: Option<Duration>,
    change: Change,
}

impl PersistJob {
    fn immediate(request: PersistRequest, change: Change) -> Self {
        Self {
            key: request.kind().to_string(),
            request,
            delay: None,
            change,
        }
    }

    fn debounced(key: String, request: PersistRequest, delay: Duration, change: Change) -> Self {
        Self {
            key,
            request,
            delay: Some(delay),
            change,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    /// Always pushed; `force` bypasses the empty-state guard
    Structural { force: bool },
    /// Amends the current entry when it is a recent edit of the same target
    Continuous { skip: bool },
}

pub struct EditSession {
    template: Template,
    selection: Option<Selection>,
    history: History<EditorSnapshot>,
    config: EditorConfig,
    registry: Arc<dyn TypeRegistry>,
    ids: IdGenerator,
    sender: PreviewSender,
    persistence: Arc<dyn Persistence>,
    runtime: Handle,
    debouncer: Debouncer,
    outcomes_tx: mpsc::UnboundedSender<PersistenceOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<PersistenceOutcome>,
    /// The tree with every unconfirmed change undone
    base: Template,
    journal: Vec<JournalEntry>,
    /// Latest generation scheduled per persistence key
    in_flight: HashMap<String, u64>,
    generation: u64,
    notices: Vec<Notice>,
}

impl EditSession {
    /// Start editing `template`. Must be called inside a tokio runtime,
    /// which runs the background persistence calls.
    pub fn new(
        mut template: Template,
        config: EditorConfig,
        registry: Arc<dyn TypeRegistry>,
        persistence: Arc<dyn Persistence>,
        transport: Arc<dyn PreviewTransport>,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        template.normalize();
        template.check_invariants(registry.as_ref())?;

        let mut history = History::new(config.max_history_size);
        let baseline = EditorSnapshot {
            template: template.clone(),
            selection: None,
        };
        history.clear_history(baseline, "load", true);

        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        info!(
            template_id = %template.id,
            sections = template.sections.len(),
            "Edit session started"
        );

        Ok(Self {
            ids: IdGenerator::new(&template.id),
            sender: PreviewSender::new(transport, config.preview_retry_delay()),
            debouncer: Debouncer::new(runtime.clone()),
            base: template.clone(),
            journal: Vec::new(),
            template,
            selection: None,
            history,
            config,
            registry,
            persistence,
            runtime,
            outcomes_tx,
            outcomes_rx,
            in_flight: HashMap::new(),
            generation: 0,
            notices: Vec::new(),
        })
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn history(&self) -> &History<EditorSnapshot> {
        &self.history
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn preview(&self) -> &PreviewSender {
        &self.sender
    }

    /// Background calls that have not reported back yet
    pub fn pending_persistence(&self) -> usize {
        self.in_flight.len()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Drain the history's empty-state guard refusals
    pub fn take_history_warnings(&mut self) -> Vec<String> {
        self.history.take_warnings()
    }

    /// Process one user intent
    #[instrument(skip_all, fields(intent = intent.name()))]
    pub fn dispatch(&mut self, intent: Intent) -> Result<DispatchOutcome, SessionError> {
        match intent {
            Intent::AddSection {
                section_type,
                index,
                settings,
            } => self.add_section(section_type, index, settings),
            Intent::AddBlock {
                parent_id,
                block_type,
                index,
                settings,
            } => self.add_block(&parent_id, block_type, index, settings),
            Intent::Delete { node_id } => self.delete(&node_id),
            Intent::Move {
                node_id,
                new_parent_id,
                index,
            } => self.move_node(&node_id, new_parent_id.as_deref(), index),
            Intent::Reorder {
                parent_id,
                ordered_ids,
            } => Ok(self.reorder(parent_id.as_deref(), ordered_ids)),
            Intent::UpdateSectionSettings {
                section_id,
                settings,
                skip_history,
            } => self.update_section_settings(&section_id, settings, skip_history),
            Intent::UpdateBlockSettings {
                block_id,
                settings,
                skip_history,
            } => self.update_block_settings(&block_id, settings, skip_history),
            Intent::ToggleEnabled { node_id } => self.toggle_enabled(&node_id),
            Intent::Select {
                section_id,
                block_id,
            } => Ok(self.select(section_id, block_id)),
            Intent::Undo => Ok(self.navigate("undo", |h| h.undo().cloned())),
            Intent::Redo => Ok(self.navigate("redo", |h| h.redo().cloned())),
            Intent::GoToHistory { index } => {
                Ok(self.navigate("go_to_history", |h| h.go_to_history(index).cloned()))
            }
        }
    }

    fn add_section(
        &mut self,
        section_type: String,
        index: Option<usize>,
        settings: Option<Settings>,
    ) -> Result<DispatchOutcome, SessionError> {
        let id = self.ids.fresh_id(&self.template);
        let defaults = self
            .registry
            .section_type(&section_type)
            .map(|caps| caps.default_settings.clone());
        let section = Section::new(id.clone(), section_type).with_settings(merge_settings(defaults, settings));

        let mutation = Mutation::Insert {
            parent_id: None,
            node: Node::Section(section),
            index,
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };
        let Some(section) = next.find_section(&id).cloned() else {
            return Ok(self.reject(MutationError::NotFound(id)));
        };

        let request = PersistRequest::Create(PersistedNode::from_node(&Node::Section(Section::clone(&section)), None)?);
        let message = PreviewMessage::SectionAdd {
            index: Some(section.position),
            section,
        };
        self.commit(
            next,
            "add_section",
            &id,
            Record::Structural { force: false },
            vec![message],
            PersistJob::immediate(request, Change::Apply(mutation)),
        );
        Ok(DispatchOutcome::Applied {
            action: "add_section",
            created_id: Some(id),
        })
    }

    fn add_block(
        &mut self,
        parent_id: &str,
        block_type: String,
        index: Option<usize>,
        settings: Option<Settings>,
    ) -> Result<DispatchOutcome, SessionError> {
        let id = self.ids.fresh_id(&self.template);
        let defaults = self
            .registry
            .block_type(&block_type)
            .map(|caps| caps.default_settings.clone());
        let block = Block::new(id.clone(), block_type).with_settings(merge_settings(defaults, settings));

        let mutation = Mutation::Insert {
            parent_id: Some(parent_id.to_string()),
            node: Node::Block(block),
            index,
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };
        let (Some(section), Some(block)) = (next.section_of(&id), next.find_block(&id)) else {
            return Ok(self.reject(MutationError::NotFound(id)));
        };

        let request = PersistRequest::Create(PersistedNode::from_node(&Node::Block(Block::clone(block)), Some(parent_id))?);
        let message = PreviewMessage::BlockAdd {
            section_id: section.id.clone(),
            parent_block_id: (section.id != parent_id).then(|| parent_id.to_string()),
            index: Some(block.position),
            block: Arc::clone(block),
        };
        self.commit(
            next,
            "add_block",
            &id,
            Record::Structural { force: false },
            vec![message],
            PersistJob::immediate(request, Change::Apply(mutation)),
        );
        Ok(DispatchOutcome::Applied {
            action: "add_block",
            created_id: Some(id),
        })
    }

    fn delete(&mut self, node_id: &str) -> Result<DispatchOutcome, SessionError> {
        let message = match self.template.locate(node_id) {
            Some(NodeLocation::Section { .. }) => PreviewMessage::SectionDelete {
                section_id: node_id.to_string(),
            },
            Some(NodeLocation::Block { section_index, .. }) => PreviewMessage::BlockDelete {
                section_id: self.template.sections[section_index].id.clone(),
                block_id: node_id.to_string(),
            },
            None => return Ok(self.reject(MutationError::NotFound(node_id.to_string()))),
        };
        let mutation = Mutation::Remove {
            node_id: node_id.to_string(),
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };

        // Deleting the last section is a user decision, not a transient empty load
        let force = next.is_empty();
        let request = PersistRequest::Delete {
            node_id: node_id.to_string(),
        };
        self.commit(
            next,
            "delete",
            node_id,
            Record::Structural { force },
            vec![message],
            PersistJob::immediate(request, Change::Apply(mutation)),
        );
        Ok(applied("delete"))
    }

    fn move_node(
        &mut self,
        node_id: &str,
        new_parent_id: Option<&str>,
        index: Option<usize>,
    ) -> Result<DispatchOutcome, SessionError> {
        let mutation = Mutation::Move {
            node_id: node_id.to_string(),
            new_parent_id: new_parent_id.map(str::to_string),
            index,
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };
        let Some(node) = node_of(&next, node_id) else {
            return Ok(self.reject(MutationError::NotFound(node_id.to_string())));
        };

        let messages = match node {
            Node::Section(_) => vec![PreviewMessage::SectionsReorder {
                sections: next.sections.clone(),
            }],
            Node::Block(_) => diff_sections(&self.template.sections, &next.sections),
        };
        let request = PersistRequest::Move {
            node: PersistedNode::from_node(&node, new_parent_id)?,
            ordered_ids: next.child_ids(new_parent_id).unwrap_or_default(),
        };
        self.commit(
            next,
            "move",
            node_id,
            Record::Structural { force: false },
            messages,
            PersistJob::immediate(request, Change::Apply(mutation)),
        );
        Ok(applied("move"))
    }

    fn reorder(&mut self, parent_id: Option<&str>, ordered_ids: Vec<String>) -> DispatchOutcome {
        let mutation = Mutation::Reorder {
            parent_id: parent_id.map(str::to_string),
            ordered_ids: ordered_ids.clone(),
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return self.reject(e),
        };

        let message = match parent_id.and_then(|id| next.locate(id).map(|loc| (id, loc))) {
            None => PreviewMessage::SectionsReorder {
                sections: next.sections.clone(),
            },
            Some((_, NodeLocation::Section { index })) => PreviewMessage::BlockReorder {
                section_id: next.sections[index].id.clone(),
                parent_block_id: None,
                blocks: next.sections[index].blocks.clone(),
            },
            Some((id, NodeLocation::Block { section_index, path })) => PreviewMessage::BlockReorder {
                section_id: next.sections[section_index].id.clone(),
                parent_block_id: Some(id.to_string()),
                blocks: next
                    .block_at(section_index, &path)
                    .map(|b| b.children.clone())
                    .unwrap_or_default(),
            },
        };

        let key = format!("reorder:{}", parent_id.unwrap_or("<root>"));
        let request = PersistRequest::Reorder {
            parent_id: parent_id.map(str::to_string),
            ordered_ids,
        };
        let delay = self.config.reorder_debounce();
        self.commit(
            next,
            "reorder",
            parent_id.unwrap_or("<root>"),
            Record::Structural { force: false },
            vec![message],
            PersistJob::debounced(key, request, delay, Change::Apply(mutation)),
        );
        applied("reorder")
    }

    fn update_section_settings(
        &mut self,
        section_id: &str,
        settings: Settings,
        skip_history: bool,
    ) -> Result<DispatchOutcome, SessionError> {
        let patch = SectionPatch {
            settings: Some(settings.clone()),
            enabled: None,
        };
        let mutation = Mutation::UpdateSection {
            section_id: section_id.to_string(),
            patch,
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };
        let Some(node) = node_of(&next, section_id) else {
            return Ok(self.reject(MutationError::NotFound(section_id.to_string())));
        };

        let message = PreviewMessage::SectionUpdate {
            section_id: section_id.to_string(),
            settings: Some(settings),
            enabled: None,
            position: None,
            blocks: None,
        };
        let request = PersistRequest::Update(PersistedNode::from_node(&node, None)?);
        let job = PersistJob::debounced(
            format!("update:{}", section_id),
            request,
            self.config.save_debounce(),
            Change::Apply(mutation),
        );
        self.commit(
            next,
            "update_section",
            section_id,
            Record::Continuous { skip: skip_history },
            vec![message],
            job,
        );
        Ok(applied("update_section"))
    }

    fn update_block_settings(
        &mut self,
        block_id: &str,
        settings: Settings,
        skip_history: bool,
    ) -> Result<DispatchOutcome, SessionError> {
        let patch = BlockPatch {
            settings: Some(settings.clone()),
            enabled: None,
        };
        let mutation = Mutation::UpdateBlock {
            block_id: block_id.to_string(),
            patch,
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };
        let (Some(node), Some(section_id)) = (node_of(&next, block_id), next.section_of(block_id).map(|s| s.id.clone())) else {
            return Ok(self.reject(MutationError::NotFound(block_id.to_string())));
        };

        let message = PreviewMessage::BlockUpdate {
            section_id,
            block_id: block_id.to_string(),
            settings: Some(settings),
            enabled: None,
            children: None,
        };
        let parent_id = parent_of(&next, block_id);
        let request = PersistRequest::Update(PersistedNode::from_node(&node, parent_id.as_deref())?);
        let job = PersistJob::debounced(
            format!("update:{}", block_id),
            request,
            self.config.save_debounce(),
            Change::Apply(mutation),
        );
        self.commit(
            next,
            "update_block",
            block_id,
            Record::Continuous { skip: skip_history },
            vec![message],
            job,
        );
        Ok(applied("update_block"))
    }

    fn toggle_enabled(&mut self, node_id: &str) -> Result<DispatchOutcome, SessionError> {
        let (mutation, message) = match self.template.locate(node_id) {
            Some(NodeLocation::Section { index }) => {
                let enabled = !self.template.sections[index].enabled;
                let mutation = Mutation::UpdateSection {
                    section_id: node_id.to_string(),
                    patch: SectionPatch {
                        settings: None,
                        enabled: Some(enabled),
                    },
                };
                let message = PreviewMessage::SectionUpdate {
                    section_id: node_id.to_string(),
                    settings: None,
                    enabled: Some(enabled),
                    position: None,
                    blocks: None,
                };
                (mutation, message)
            }
            Some(NodeLocation::Block { section_index, path }) => {
                let section_id = self.template.sections[section_index].id.clone();
                let enabled = !self
                    .template
                    .block_at(section_index, &path)
                    .map(|b| b.enabled)
                    .unwrap_or(false);
                let mutation = Mutation::UpdateBlock {
                    block_id: node_id.to_string(),
                    patch: BlockPatch {
                        settings: None,
                        enabled: Some(enabled),
                    },
                };
                let message = PreviewMessage::BlockUpdate {
                    section_id,
                    block_id: node_id.to_string(),
                    settings: None,
                    enabled: Some(enabled),
                    children: None,
                };
                (mutation, message)
            }
            None => return Ok(self.reject(MutationError::NotFound(node_id.to_string()))),
        };
        let next = match mutation.apply(&self.template, self.registry.as_ref()) {
            Ok(next) => next,
            Err(e) => return Ok(self.reject(e)),
        };
        let Some(node) = node_of(&next, node_id) else {
            return Ok(self.reject(MutationError::NotFound(node_id.to_string())));
        };

        let parent_id = parent_of(&next, node_id);
        let request = PersistRequest::Update(PersistedNode::from_node(&node, parent_id.as_deref())?);
        self.commit(
            next,
            "toggle_enabled",
            node_id,
            Record::Structural { force: false },
            vec![message],
            PersistJob::immediate(request, Change::Apply(mutation)),
        );
        Ok(applied("toggle_enabled"))
    }

    fn select(&mut self, section_id: Option<String>, block_id: Option<String>) -> DispatchOutcome {
        let Some(section_id) = section_id else {
            self.selection = None;
            return applied("select");
        };
        let selection = Selection {
            section_id,
            block_id,
        };
        if !selection.resolves_in(&self.template) {
            return self.reject(MutationError::NotFound(selection.target_id().to_string()));
        }
        self.selection = Some(selection);
        applied("select")
    }

    /// Move the history cursor and install the state it lands on
    fn navigate(
        &mut self,
        action: &'static str,
        step: impl FnOnce(&mut History<EditorSnapshot>) -> Option<EditorSnapshot>,
    ) -> DispatchOutcome {
        let live = self.selection.clone();
        self.history.amend_current(|snapshot| snapshot.selection = live);

        let Some(target) = self.history.without_recording(step) else {
            debug!(action, "Nothing to navigate to");
            return DispatchOutcome::Unchanged;
        };
        if target.template == self.template && target.selection == self.selection {
            return DispatchOutcome::Unchanged;
        }

        let previous = self.snapshot();
        self.template = target.template;
        self.selection = target.selection;
        self.reconcile_selection();

        self.sender
            .send_all(diff_sections(&previous.template.sections, &self.template.sections));
        if previous.template != self.template {
            let request = PersistRequest::SaveTemplate(self.template.clone());
            let change = Change::Replace(self.template.clone());
            let job = PersistJob::debounced(TEMPLATE_SAVE_KEY.to_string(), request, self.config.save_debounce(), change);
            self.schedule(job);
        }
        applied(action)
    }

    fn commit(
        &mut self,
        next: Template,
        action: &'static str,
        target: &str,
        record: Record,
        messages: Vec<PreviewMessage>,
        job: PersistJob,
    ) {
        if record != (Record::Continuous { skip: true }) {
            // Undo back to the current entry should restore the selection seen
            // right before this change.
            let live = self.selection.clone();
            self.history.amend_current(|snapshot| snapshot.selection = live);
        }

        self.template = next;
        self.reconcile_selection();

        let current = self.snapshot();
        let details = Some(json!({ "target": target }));
        let outcome = match record {
            Record::Structural { force: false } => self.history.push_state(current, action, details),
            Record::Structural { force: true } => self.history.force_push_state(current, action, details),
            Record::Continuous { skip: true } => {
                debug!(action, node_id = target, "History skipped");
                PushOutcome::Suppressed
            }
            Record::Continuous { skip: false } => {
                if self.coalesces_with_current(action, target) {
                    self.history.replace_current(current, action)
                } else {
                    self.history.push_state(current, action, details)
                }
            }
        };
        debug!(action, node_id = target, ?outcome, "Committed");

        self.sender.send_all(messages);
        self.schedule(job);
    }

    fn coalesces_with_current(&self, action: &str, target: &str) -> bool {
        if self.history.can_redo() {
            return false;
        }
        let Some(entry) = self.history.current() else {
            return false;
        };
        let same_target = entry.action == action
            && entry
                .details
                .as_ref()
                .and_then(|d| d.get("target"))
                .and_then(Value::as_str)
                == Some(target);
        let window = chrono::Duration::from_std(self.config.history_coalesce()).unwrap_or_else(|_| chrono::Duration::zero());
        same_target && Utc::now() - entry.timestamp <= window
    }

    fn schedule(&mut self, job: PersistJob) {
        self.generation += 1;
        let generation = self.generation;
        let PersistJob {
            key,
            request,
            delay,
            change,
        } = job;
        let key = match delay {
            Some(_) => key,
            None => format!("{}#{}", key, generation),
        };

        self.journal.push(JournalEntry {
            key: key.clone(),
            change,
            pending: true,
        });
        self.in_flight.insert(key.clone(), generation);

        let op = request.kind();
        let store = Arc::clone(&self.persistence);
        let outcomes = self.outcomes_tx.clone();
        let template_id = self.template.id.clone();
        let task_key = key.clone();
        let task = async move {
            let result = request.execute(store.as_ref(), &template_id).await;
            // The session may be gone; nothing is waiting for the outcome then
            let _ = outcomes.send(PersistenceOutcome {
                key: task_key,
                generation,
                op,
                result,
            });
        };

        match delay {
            Some(delay) => {
                self.debouncer.schedule(key, delay, task);
            }
            None => {
                self.runtime.spawn(task);
            }
        }
    }

    /// Apply every persistence outcome that has already arrived
    pub fn process_persistence(&mut self) -> Vec<PersistenceReport> {
        let mut reports = Vec::new();
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            reports.push(self.apply_outcome(outcome));
        }
        reports
    }

    /// Wait for the next persistence outcome and apply it
    pub async fn next_persistence_outcome(&mut self) -> Option<PersistenceReport> {
        let outcome = self.outcomes_rx.recv().await?;
        Some(self.apply_outcome(outcome))
    }

    /// Wait until every scheduled call has reported back
    pub async fn settle(&mut self) -> Vec<PersistenceReport> {
        let mut reports = Vec::new();
        while !self.in_flight.is_empty() {
            match self.next_persistence_outcome().await {
                Some(report) => reports.push(report),
                None => break,
            }
        }
        reports
    }

    fn apply_outcome(&mut self, outcome: PersistenceOutcome) -> PersistenceReport {
        let PersistenceOutcome {
            key,
            generation,
            op,
            result,
        } = outcome;

        if self.in_flight.get(&key) != Some(&generation) {
            debug!(key = %key, op, "Ignoring outcome of superseded call");
            return PersistenceReport::Superseded { op };
        }
        self.in_flight.remove(&key);

        let report = match result {
            Ok(confirmed) => {
                for entry in self.journal.iter_mut().filter(|e| e.pending && e.key == key) {
                    entry.pending = false;
                }
                match confirmed {
                    Some((temp_id, canonical_id)) => {
                        self.reconcile_id(&temp_id, &canonical_id);
                        PersistenceReport::Reconciled {
                            temp_id,
                            canonical_id,
                        }
                    }
                    None => {
                        debug!(op, "Persisted");
                        PersistenceReport::Persisted { op }
                    }
                }
            }
            Err(e) => {
                self.rollback(&key, op, &e);
                PersistenceReport::RolledBack {
                    op,
                    error: e.to_string(),
                }
            }
        };
        self.fold_confirmed();
        report
    }

    /// Drop the failed call's pending changes and rebuild the tree from the rest
    fn rollback(&mut self, key: &str, op: &'static str, e: &PersistenceError) {
        error!(op, error = %e, "Persistence failed, rolling back");

        self.journal.retain(|entry| !(entry.pending && entry.key == key));
        let rebuilt = self.replay_journal();
        let previous = std::mem::replace(&mut self.template, rebuilt);
        self.reconcile_selection();

        let current = self.snapshot();
        let details = Some(json!({ "op": op, "error": e.to_string() }));
        self.history.force_push_state(current, "rollback", details);
        self.sender
            .send_all(diff_sections(&previous.sections, &self.template.sections));
        self.notices
            .push(Notice::error(format!("Could not save {}: {}", op, e)));
    }

    /// `base` with every journal entry applied in order. Entries that no
    /// longer apply (their target went with a rolled back change) are dropped.
    fn replay_journal(&mut self) -> Template {
        let registry = self.registry.as_ref();
        let mut tree = self.base.clone();
        self.journal.retain(|entry| match entry.change.apply(&tree, registry) {
            Ok(next) => {
                tree = next;
                true
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Dropping change that no longer applies");
                false
            }
        });
        tree
    }

    /// Move confirmed changes at the front of the journal into `base`
    fn fold_confirmed(&mut self) {
        if self.in_flight.is_empty() {
            self.base = self.template.clone();
            self.journal.clear();
            return;
        }
        let confirmed = self.journal.iter().take_while(|entry| !entry.pending).count();
        for entry in self.journal.drain(..confirmed) {
            match entry.change.apply(&self.base, self.registry.as_ref()) {
                Ok(next) => self.base = next,
                Err(e) => warn!(key = %entry.key, error = %e, "Confirmed change no longer applies"),
            }
        }
    }

    /// Replace a temporary id with the store's canonical one everywhere the
    /// session remembers it
    fn reconcile_id(&mut self, temp_id: &str, canonical_id: &str) {
        info!(temp_id, canonical_id, "Reconciled temporary id");

        match mutations::rename_id(&self.template, temp_id, canonical_id) {
            Ok(next) => {
                let previous = std::mem::replace(&mut self.template, next);
                self.sender
                    .send_all(diff_sections(&previous.sections, &self.template.sections));
            }
            Err(MutationError::NotFound(_)) => {
                debug!(temp_id, "Node removed before its id was confirmed");
            }
            Err(e) => warn!(error = %e, "Could not apply canonical id"),
        }

        rename_in_template(&mut self.base, temp_id, canonical_id);
        for entry in self.journal.iter_mut() {
            entry.change.rename_node_id(temp_id, canonical_id);
        }
        self.history
            .rewrite_states(|snapshot| rename_in_snapshot(snapshot, temp_id, canonical_id));
        if let Some(selection) = &mut self.selection {
            rename_in_selection(selection, temp_id, canonical_id);
        }
    }

    /// Handle a raw message posted by the preview surface
    pub fn handle_preview_message(&mut self, payload: &str) -> Result<InboundEvent, SessionError> {
        let message = decode(payload)?;
        // The handshake describes the view before the queued messages land on it
        let queued = match &message {
            PreviewMessage::PreviewReady { .. } => self.sender.queued_messages().to_vec(),
            _ => Vec::new(),
        };
        let event = self.sender.handle_message(message);
        match &event {
            InboundEvent::Ready { sections, flushed } => {
                debug!(flushed, "Preview ready");
                let mut view = PreviewReplica::with_sections(sections.clone());
                for message in &queued {
                    view.apply(message);
                }
                if view.sections() != self.template.sections.as_slice() {
                    info!("Preview view differs from template, sending full section list");
                    self.sender.send(PreviewMessage::SectionsReorder {
                        sections: self.template.sections.clone(),
                    });
                }
            }
            InboundEvent::SelectionChanged {
                section_id,
                block_id,
            } => {
                let selection = Selection {
                    section_id: section_id.clone(),
                    block_id: block_id.clone(),
                };
                if selection.resolves_in(&self.template) {
                    self.selection = Some(selection);
                } else {
                    debug!(section_id = %section_id, "Preview selected an unknown node");
                }
            }
            InboundEvent::Ignored => {}
        }
        Ok(event)
    }

    /// The preview surface reloaded; queue messages until its next handshake
    pub fn reset_preview(&mut self) {
        self.sender.reset();
    }

    fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            template: self.template.clone(),
            selection: self.selection.clone(),
        }
    }

    /// Drop the selection when the node it names is gone. A selected block
    /// that moved to another section follows it.
    fn reconcile_selection(&mut self) {
        let Some(selection) = &self.selection else {
            return;
        };
        let resolved = match &selection.block_id {
            Some(block_id) => self
                .template
                .section_of(block_id)
                .map(|section| Selection::block(section.id.clone(), block_id.clone())),
            None => self
                .template
                .find_section(&selection.section_id)
                .map(|_| selection.clone()),
        };
        if resolved.is_none() {
            debug!(node_id = selection.target_id(), "Selected node removed, clearing selection");
        }
        self.selection = resolved;
    }

    fn reject(&self, error: MutationError) -> DispatchOutcome {
        debug!(error = %error, "Intent rejected");
        let notice = if error.is_user_rejection() {
            Notice::info(error.to_string())
        } else {
            Notice::error(error.to_string())
        };
        DispatchOutcome::Rejected { error, notice }
    }
}

fn applied(action: &'static str) -> DispatchOutcome {
    DispatchOutcome::Applied {
        action,
        created_id: None,
    }
}

fn merge_settings(defaults: Option<Settings>, settings: Option<Settings>) -> Settings {
    let mut merged = defaults.unwrap_or_default();
    if let Some(settings) = settings {
        merged.extend(settings);
    }
    merged
}

fn node_of(template: &Template, id: &str) -> Option<Node> {
    if let Some(section) = template.find_section(id) {
        return Some(Node::Section(Section::clone(section)));
    }
    template
        .find_block(id)
        .map(|block| Node::Block(Block::clone(block)))
}

fn parent_of(template: &Template, id: &str) -> Option<String> {
    let location = template.locate(id)?;
    template.parent_id_at(&location).map(str::to_string)
}

fn rename_in_template(template: &mut Template, temp_id: &str, canonical_id: &str) {
    if template.contains_id(temp_id) {
        if let Ok(next) = mutations::rename_id(template, temp_id, canonical_id) {
            *template = next;
        }
    }
}

fn rename_in_snapshot(snapshot: &mut EditorSnapshot, temp_id: &str, canonical_id: &str) {
    rename_in_template(&mut snapshot.template, temp_id, canonical_id);
    if let Some(selection) = &mut snapshot.selection {
        rename_in_selection(selection, temp_id, canonical_id);
    }
}

fn rename_in_selection(selection: &mut Selection, temp_id: &str, canonical_id: &str) {
    if selection.section_id == temp_id {
        selection.section_id = canonical_id.to_string();
    }
    if selection.block_id.as_deref() == Some(temp_id) {
        selection.block_id = Some(canonical_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryPersistence;
    use pagecraft_model::StaticRegistry;
    use pagecraft_sync::RecordingTransport;

    fn session(template: Template) -> (EditSession, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let registry = Arc::new(StaticRegistry::new().container("group").leaf("text"));
        let session = EditSession::new(
            template,
            EditorConfig::default(),
            registry,
            Arc::new(MemoryPersistence::new()),
            transport.clone(),
        )
        .unwrap();
        (session, transport)
    }

    #[test]
    fn test_requires_runtime() {
        let result = EditSession::new(
            Template::new("tpl", "index"),
            EditorConfig::default(),
            Arc::new(StaticRegistry::new()),
            Arc::new(MemoryPersistence::new()),
            Arc::new(RecordingTransport::new()),
        );
        assert!(matches!(result, Err(SessionError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_invalid_template_rejected() {
        let template = Template::new("tpl", "index").with_sections([
            Section::new("a", "hero").with_blocks([Block::new("t", "text").with_children([Block::new("x", "text")])]),
        ]);
        let result = EditSession::new(
            template,
            EditorConfig::default(),
            Arc::new(StaticRegistry::new().leaf("text")),
            Arc::new(MemoryPersistence::new()),
            Arc::new(RecordingTransport::new()),
        );
        assert!(matches!(result, Err(SessionError::InvalidTemplate(_))));
    }

    #[tokio::test]
    async fn test_select_unknown_node_rejected() {
        let (mut session, _) = session(Template::new("tpl", "index").with_sections([Section::new("a", "hero")]));
        let outcome = session
            .dispatch(Intent::Select {
                section_id: Some("zzz".to_string()),
                block_id: None,
            })
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
        assert!(session.selection().is_none());
    }

    #[tokio::test]
    async fn test_add_section_merges_defaults() {
        let transport = Arc::new(RecordingTransport::new());
        let mut defaults = Settings::new();
        defaults.insert("title".to_string(), json!("Welcome"));
        defaults.insert("align".to_string(), json!("left"));
        let registry = StaticRegistry::new().with_section(
            "hero",
            pagecraft_model::TypeCapabilities {
                label: "Hero".to_string(),
                default_settings: defaults,
                ..Default::default()
            },
        );
        let mut session = EditSession::new(
            Template::new("tpl", "index"),
            EditorConfig::default(),
            Arc::new(registry),
            Arc::new(MemoryPersistence::new()),
            transport,
        )
        .unwrap();

        let mut overrides = Settings::new();
        overrides.insert("align".to_string(), json!("center"));
        let outcome = session
            .dispatch(Intent::AddSection {
                section_type: "hero".to_string(),
                index: None,
                settings: Some(overrides),
            })
            .unwrap();

        let DispatchOutcome::Applied { created_id: Some(id), .. } = outcome else {
            panic!("expected a created section");
        };
        let section = session.template().find_section(&id).unwrap();
        assert_eq!(section.settings["title"], "Welcome");
        assert_eq!(section.settings["align"], "center");
    }

    #[tokio::test]
    async fn test_messages_queue_until_preview_ready() {
        let (mut session, transport) = session(Template::new("tpl", "index").with_sections([Section::new("a", "hero")]));
        session
            .dispatch(Intent::ToggleEnabled {
                node_id: "a".to_string(),
            })
            .unwrap();
        assert!(transport.payloads().is_empty());
        assert_eq!(session.preview().queued(), 1);

        session
            .handle_preview_message(r#"{ "type": "PREVIEW_READY", "sections": [] }"#)
            .unwrap();
        let kinds: Vec<&str> = transport.messages().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["SECTION_UPDATE", "SECTIONS_REORDER"]);
    }
}
