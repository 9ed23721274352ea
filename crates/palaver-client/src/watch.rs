//! Live subscriptions over store change streams.
//!
//! Each watcher is a background tokio task that owns its store
//! subscriptions and pushes recomputed view models over an unbounded
//! channel, the same command/notification shape the rest of this workspace
//! uses for long-lived tasks. The [`WatchHandle`] owns the task: dropping
//! it (or calling [`WatchHandle::close`]) tears the watcher down exactly
//! once. [`WatcherSet`] keys handles by (subscription, consumer) so
//! re-subscribing on parameter churn replaces the old listener instead of
//! stacking a duplicate.

use std::collections::HashMap;

use chrono::Utc;
use palaver_shared::{ChatId, UserId};
use palaver_store::{CollectionPath, Direction, DocumentStore, Query};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::ChatClient;
use crate::error::Result;
use crate::models::{Conversation, Message, Overlay};
use crate::project::{project_chat_list, ChatListView};

/// Owner of one background watcher task.
pub struct WatchHandle {
    handle: JoinHandle<()>,
}

impl WatchHandle {
    fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Stop the watcher now instead of at drop time.
    pub fn close(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Live watchers keyed on (subscription, consumer).
///
/// Inserting under an existing key replaces (and thereby stops) the
/// previous watcher, so a screen that re-subscribes with new parameters
/// never leaks its old listener. Dropping the set closes everything.
#[derive(Default)]
pub struct WatcherSet {
    watchers: HashMap<String, WatchHandle>,
}

impl WatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher under a key, replacing any previous holder.
    pub fn insert(&mut self, key: impl Into<String>, handle: WatchHandle) {
        let key = key.into();
        if self.watchers.insert(key.clone(), handle).is_some() {
            debug!(key = %key, "replaced existing watcher");
        }
    }

    /// Stop and remove the watcher under `key`, if any.
    pub fn remove(&mut self, key: &str) -> bool {
        self.watchers.remove(key).is_some()
    }

    /// Stop every watcher.
    pub fn close_all(&mut self) {
        self.watchers.clear();
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

impl<S: DocumentStore + 'static> ChatClient<S> {
    /// Subscribe to this user's projected conversation lists.
    ///
    /// The watcher follows (a) the conversations the user belongs to and
    /// (b) the user's own overlay collection, and re-projects the full
    /// [`ChatListView`] on every notification from either stream. The
    /// current view is delivered immediately.
    pub async fn watch_chat_list(
        &self,
    ) -> Result<(mpsc::UnboundedReceiver<ChatListView>, WatchHandle)> {
        let conversations_query = Query::collection(Self::chats())
            .filter_array_contains("members", self.user().as_str());
        let overlays_query = Query::collection(
            CollectionPath::root("userChats")
                .doc(self.user().as_str())
                .collection("chats"),
        );

        let mut convo_watch = self.store().watch_query(&conversations_query).await?;
        let mut overlay_watch = self.store().watch_query(&overlays_query).await?;

        let me = self.user().clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut conversations: Vec<Conversation> = Vec::new();
            let mut overlays: HashMap<ChatId, Overlay> = HashMap::new();

            loop {
                tokio::select! {
                    snaps = convo_watch.recv() => match snaps {
                        Some(snaps) => {
                            conversations =
                                snaps.iter().map(Conversation::from_snapshot).collect();
                        }
                        None => break,
                    },
                    snaps = overlay_watch.recv() => match snaps {
                        Some(snaps) => {
                            overlays = snaps
                                .iter()
                                .map(|snap| {
                                    (ChatId::new(snap.id()), Overlay::from_snapshot(snap))
                                })
                                .collect();
                        }
                        None => break,
                    },
                }

                let view = project_chat_list(
                    conversations.iter(),
                    |id| overlays.get(id).cloned().unwrap_or_default(),
                    &me,
                    Utc::now(),
                );
                if tx.send(view).is_err() {
                    break;
                }
            }
            debug!(user = %me, "chat list watcher stopped");
        });

        Ok((rx, WatchHandle::new(handle)))
    }

    /// Subscribe to one conversation document.
    pub async fn watch_conversation(
        &self,
        chat: &ChatId,
    ) -> Result<(mpsc::UnboundedReceiver<Option<Conversation>>, WatchHandle)> {
        let mut doc_watch = self.store().watch_doc(&Self::chat_doc(chat)).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(snap) = doc_watch.recv().await {
                let convo = snap.as_ref().map(Conversation::from_snapshot);
                if tx.send(convo).is_err() {
                    break;
                }
            }
        });
        Ok((rx, WatchHandle::new(handle)))
    }

    /// Subscribe to this user's overlay for one conversation. Emits the
    /// default overlay while no document exists yet.
    pub async fn watch_overlay(
        &self,
        chat: &ChatId,
    ) -> Result<(mpsc::UnboundedReceiver<Overlay>, WatchHandle)> {
        let mut doc_watch = self.store().watch_doc(&self.overlay_doc(chat)).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(snap) = doc_watch.recv().await {
                let overlay = snap
                    .as_ref()
                    .map(Overlay::from_snapshot)
                    .unwrap_or_default();
                if tx.send(overlay).is_err() {
                    break;
                }
            }
        });
        Ok((rx, WatchHandle::new(handle)))
    }

    /// Subscribe to the newest page of a conversation's messages, emitted
    /// oldest-first on every change.
    pub async fn watch_messages(
        &self,
        chat: &ChatId,
    ) -> Result<(mpsc::UnboundedReceiver<Vec<Message>>, WatchHandle)> {
        let query = Query::collection(Self::messages(chat))
            .order_by("createdAtClient", Direction::Descending)
            .limit(self.config().message_page_size);
        let mut query_watch = self.store().watch_query(&query).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(snaps) = query_watch.recv().await {
                let mut messages: Vec<Message> =
                    snaps.iter().map(Message::from_snapshot).collect();
                messages.reverse();
                if tx.send(messages).is_err() {
                    break;
                }
            }
        });
        Ok((rx, WatchHandle::new(handle)))
    }
}
