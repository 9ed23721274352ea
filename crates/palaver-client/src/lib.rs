//! # palaver-client
//!
//! Conversation state reconciliation engine for the Palaver chat client.
//!
//! The engine turns raw message and per-user metadata writes into a
//! consistent view of delivery/read status, mute/archive/clear state, block
//! relationships, and unread flags across any number of devices sharing one
//! conversation document, with no central lock.
//!
//! [`ChatClient`] is the facade the UI layer talks to. It is bound to one
//! signed-in user and a [`palaver_store::DocumentStore`]; its operations are
//! spread over one module per concern, the way the store crate of this
//! workspace implements typed helpers per domain area:
//!
//! - [`chats`]: conversation lifecycle and group administration
//! - [`messaging`]: send, edit, delete, per-user preview cache
//! - [`status`]: read receipts and the sent/delivered/read state machine
//! - [`overlay`]: archive, mute, hide, clear (per-user private state)
//! - [`blocks`]: block edges and their conversation mirror
//! - [`project`]: pure projection into list rows (unread, masking)
//! - [`timeline`]: pure bubble-run grouping and delete eligibility
//! - [`watch`]: live subscriptions over store change streams

pub mod blocks;
pub mod chats;
pub mod client;
pub mod config;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod overlay;
pub mod project;
pub mod status;
pub mod timeline;
pub mod watch;

mod error;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use messaging::preview_text;
pub use models::{
    ChatKind, Conversation, DeliveryStatus, GeoPoint, LastMessage, MemberMeta, Message,
    MessageDraft, MessageKind, Overlay, OverlayPreview,
};
pub use project::{project, project_chat_list, ChatListView, ConversationRow, ListPlacement};
pub use status::{spawn_delivery_sweeper, SweeperHandle};
pub use timeline::{build_runs, delete_eligibility, DeleteEligibility, MessageRun};
pub use watch::{WatchHandle, WatcherSet};
