//! # palaver-store
//!
//! Abstract document-store collaborator for the Palaver chat engine.
//!
//! The engine never talks to a concrete database. It is written against the
//! [`DocumentStore`] trait: path-addressed documents holding typed field
//! maps, merge writes with field-level operations (server timestamps, field
//! deletion, array union/remove), atomic read-modify-write transactions, and
//! live document/query subscriptions.
//!
//! [`MemoryStore`] is the in-process implementation used by the test suite
//! and local tooling. A production build plugs in an adapter over whichever
//! replicated document database the deployment uses; the adapter owns wire
//! concerns (retries, auth) and no chat logic.

pub mod memory;
pub mod path;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod value;

mod error;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use path::{CollectionPath, DocPath};
pub use query::{Direction, Filter, Query};
pub use snapshot::Snapshot;
pub use store::{DocWatch, DocumentStore, QueryWatch, TxnBody, TxnReads, TxnWrite};
pub use value::{FieldOp, Patch, Value, WriteMode};
