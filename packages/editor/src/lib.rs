//! # Pagecraft Editor
//!
//! Editing core for storefront templates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ UI layer: user intents                      │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ editor: EditSession                         │
//! │  - Validate + apply pure tree mutations     │
//! │  - Record bounded undo/redo history         │
//! │  - Mirror changes to the preview            │
//! │  - Persist in the background, roll back     │
//! │    on failure                               │
//! └─────────────────────────────────────────────┘
//!          ↓                          ↓
//! ┌──────────────────────┐  ┌──────────────────────┐
//! │ sync: preview channel│  │ persistence (extern) │
//! └──────────────────────┘  └──────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **The tree is the source of truth**: the preview and the store are
//!    kept in step with it, never the other way round
//! 2. **Pure mutations**: every edit yields a new tree sharing unchanged
//!    subtrees; a rejected edit leaves the tree untouched
//! 3. **Optimistic updates**: the tree changes before the store confirms,
//!    and is restored if the store refuses
//! 4. **History never destroys data**: an empty snapshot cannot silently
//!    replace real content
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagecraft_editor::{EditSession, EditorConfig, Intent, MemoryPersistence};
//!
//! let config = EditorConfig::load(dir)?;
//! let mut session = EditSession::new(
//!     template,
//!     config.clone(),
//!     Arc::new(config.registry()),
//!     Arc::new(MemoryPersistence::new()),
//!     transport,
//! )?;
//!
//! session.dispatch(Intent::Move {
//!     node_id: "block-1".to_string(),
//!     new_parent_id: Some("group-1".to_string()),
//!     index: Some(0),
//! })?;
//!
//! // Later, on the same task
//! for report in session.process_persistence() {
//!     println!("{:?}", report);
//! }
//! ```

mod config;
mod debounce;
mod errors;
mod flatten;
mod history;
mod intent;
pub mod mutations;
mod persistence;
mod session;

pub use config::{EditorConfig, DEFAULT_CONFIG_NAME};
pub use debounce::Debouncer;
pub use errors::{ConfigError, PersistenceError, SessionError};
pub use flatten::{flatten, unflatten, FlatNode};
pub use history::{History, HistoryEntry, HistoryState, PushOutcome};
pub use intent::Intent;
pub use mutations::{BlockPatch, Mutation, MutationError, SectionPatch};
pub use persistence::{
    block_from_payload, persisted_block_payload, MemoryPersistence, PersistCall, PersistRequest,
    PersistedNode, Persistence,
};
pub use session::{DispatchOutcome, EditSession, EditorSnapshot, Notice, NoticeLevel, PersistenceReport};

// Re-export the model and channel types sessions are built from
pub use pagecraft_model::{Block, Node, Section, Selection, Settings, Template, TypeRegistry};
pub use pagecraft_sync::{PreviewMessage, PreviewTransport};
