//! The engine facade bound to one signed-in user.
//!
//! Document layout, mirroring the deployed store:
//! - `chats/{chatId}`: shared conversation
//! - `chats/{chatId}/messages/{messageId}`: messages
//! - `userChats/{userId}/chats/{chatId}`: per-user overlay
//! - `users/{userId}/blocks/{peerId}`: authoritative block edges
//!
//! Overlay paths are only ever built from the client's own user id, so a
//! write to another user's overlay cannot be constructed at all.

use std::sync::Arc;

use palaver_shared::{ChatId, MessageId, UserId};
use palaver_store::{CollectionPath, DocPath, DocumentStore};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::{Conversation, Message, Overlay};

/// Handle to the chat engine for one signed-in user.
///
/// Cheap to clone; clones share the underlying store handle. Operations are
/// implemented in one module per concern (`chats`, `messaging`, `status`,
/// `overlay`, `blocks`).
pub struct ChatClient<S> {
    store: Arc<S>,
    user: UserId,
    config: ClientConfig,
}

impl<S> Clone for ChatClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            user: self.user.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: DocumentStore> ChatClient<S> {
    pub fn new(store: Arc<S>, user: UserId) -> Self {
        Self::with_config(store, user, ClientConfig::default())
    }

    pub fn with_config(store: Arc<S>, user: UserId, config: ClientConfig) -> Self {
        Self {
            store,
            user,
            config,
        }
    }

    /// The signed-in user this client acts as.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -- Path helpers --------------------------------------------------------

    pub(crate) fn chats() -> CollectionPath {
        CollectionPath::root("chats")
    }

    pub(crate) fn chat_doc(chat: &ChatId) -> DocPath {
        Self::chats().doc(chat.as_str())
    }

    pub(crate) fn messages(chat: &ChatId) -> CollectionPath {
        Self::chat_doc(chat).collection("messages")
    }

    pub(crate) fn message_doc(chat: &ChatId, message: &MessageId) -> DocPath {
        Self::messages(chat).doc(message.as_str())
    }

    /// This user's overlay for a conversation. Deliberately not
    /// parameterized by user: overlays are single-writer.
    pub(crate) fn overlay_doc(&self, chat: &ChatId) -> DocPath {
        CollectionPath::root("userChats")
            .doc(self.user.as_str())
            .collection("chats")
            .doc(chat.as_str())
    }

    pub(crate) fn block_doc(owner: &UserId, peer: &UserId) -> DocPath {
        CollectionPath::root("users")
            .doc(owner.as_str())
            .collection("blocks")
            .doc(peer.as_str())
    }

    // -- Typed reads ---------------------------------------------------------

    pub async fn get_conversation(&self, chat: &ChatId) -> Result<Conversation> {
        let snap = self
            .store
            .get(&Self::chat_doc(chat))
            .await?
            .ok_or_else(|| ClientError::ChatNotFound(chat.to_string()))?;
        Ok(Conversation::from_snapshot(&snap))
    }

    pub async fn get_message(&self, chat: &ChatId, message: &MessageId) -> Result<Message> {
        let snap = self
            .store
            .get(&Self::message_doc(chat, message))
            .await?
            .ok_or_else(|| ClientError::MessageNotFound(message.to_string()))?;
        Ok(Message::from_snapshot(&snap))
    }

    /// This user's overlay for a conversation; the default (all-absent)
    /// overlay when none has been written yet.
    pub async fn get_overlay(&self, chat: &ChatId) -> Result<Overlay> {
        Ok(self
            .store
            .get(&self.overlay_doc(chat))
            .await?
            .map(|snap| Overlay::from_snapshot(&snap))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_store::MemoryStore;

    #[test]
    fn test_paths_match_store_layout() {
        let chat = ChatId::new("c1");
        let msg = MessageId::new("m1");
        assert_eq!(ChatClient::<MemoryStore>::chat_doc(&chat).to_string(), "chats/c1");
        assert_eq!(
            ChatClient::<MemoryStore>::message_doc(&chat, &msg).to_string(),
            "chats/c1/messages/m1"
        );
        assert_eq!(
            ChatClient::<MemoryStore>::block_doc(&UserId::from("a"), &UserId::from("b"))
                .to_string(),
            "users/a/blocks/b"
        );

        let client = ChatClient::new(Arc::new(MemoryStore::new()), UserId::from("alice"));
        assert_eq!(
            client.overlay_doc(&chat).to_string(),
            "userChats/alice/chats/c1"
        );
    }
}
