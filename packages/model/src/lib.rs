//! # Pagecraft Model
//!
//! Canonical in-memory representation of a storefront page.
//!
//! ```text
//! Template
//!  └─ Section (flat, ordered)
//!      └─ Block (ordered)
//!          └─ Block (only under container-capable types)
//! ```
//!
//! Subtrees are held behind `Arc` so that a mutated tree can share every
//! unchanged node with the tree it was derived from. Nodes are never mutated
//! in place once shared; callers go through `Arc::make_mut`, which clones a
//! node only when someone else still holds it.

mod error;
mod id_generator;
mod invariants;
mod registry;
mod tree;
pub mod visitor;

pub use error::ModelError;
pub use id_generator::IdGenerator;
pub use invariants::InvariantViolation;
pub use registry::{StaticRegistry, TypeCapabilities, TypeDefinition, TypeRegistry};
pub use tree::{Block, Node, NodeLocation, Section, Selection, Settings, Template};
