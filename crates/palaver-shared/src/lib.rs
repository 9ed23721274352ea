//! # palaver-shared
//!
//! Identifier newtypes and domain constants shared by every Palaver crate.
//!
//! Everything here is plain data: no I/O, no store access. The store and
//! client crates both build on these types, so this crate must stay at the
//! bottom of the dependency graph.

pub mod constants;
pub mod types;

pub use types::{pair_key, ChatId, MessageId, UserId};
