//! Retained-content caching for paginated rendering.
//!
//! `retain-core` scans the drawing operators of a chunk of pages, gives every
//! visible mark a content digest, merges marks that recur across pages into
//! supernodes, and plans each page as a stack of elements. Elements shared by
//! more than one page are rendered once, retained in an external cache store
//! and replayed on every later page. All digests are deterministic:
//! identical content on any page, under any resource name, produces the same
//! identity.
//!
//! The entry point is [`engine::RetainEngine`], driven by an interpreter
//! through the [`phase::OperatorHooks`] trait.

pub mod config;
pub mod engine;
pub mod hash;
pub mod merge;
pub mod node;
pub mod occurrence;
pub mod ops;
pub mod page;
pub mod phase;
pub mod protocol;
pub mod types;
pub mod window;

pub use config::{ConfigError, OutputMode, RetainConfig};
pub use engine::{ChunkReport, EngineError, RetainEngine};
