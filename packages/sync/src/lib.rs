//! # Pagecraft Sync
//!
//! Keeps a sandboxed preview surface showing the same sections and blocks
//! as the editor's authoritative tree, without reloading the surface.
//!
//! ## Protocol
//!
//! Messages are plain JSON objects with a `type` discriminator and a flat
//! payload. The channel is best-effort and unordered, so every update
//! carries the full new value of whatever it patches: applying a message
//! twice, or two updates to one field in either order, converges on the
//! last one applied.
//!
//! ```text
//! editor ── SECTIONS_REORDER / SECTION_* / BLOCK_* ──▶ preview
//! editor ◀──────── PREVIEW_READY / SELECTION_CHANGED ── preview
//! ```
//!
//! Unknown `type` values decode to `PreviewMessage::Unknown` and are ignored
//! by every consumer.

mod diff;
mod errors;
mod protocol;
mod replica;
mod sender;
mod transport;

pub use diff::diff_sections;
pub use errors::{ProtocolError, TransportError};
pub use protocol::{decode, encode, PreviewMessage};
pub use replica::PreviewReplica;
pub use sender::{InboundEvent, PreviewSender, SendStatus};
pub use transport::{ChannelTransport, PreviewTransport, RecordingTransport};
