//! Sending and mutating messages.
//!
//! A send appends the message document and refreshes the conversation's
//! `lastMessage` summary in one transaction, so no observer can see a
//! message without its summary or vice versa. The summary starts at `sent`;
//! the status state machine lives in [`crate::status`].

use chrono::Utc;
use palaver_shared::constants::{
    PREVIEW_LABEL_FILE, PREVIEW_LABEL_LOCATION, PREVIEW_LABEL_PHOTO, PREVIEW_LABEL_VIDEO,
    PREVIEW_TEXT_MAX_CHARS, PREVIEW_TOMBSTONE,
};
use palaver_shared::{ChatId, MessageId, UserId};
use palaver_store::{
    CollectionPath, Direction, DocumentStore, Patch, Query, StoreError, TxnWrite, Value,
    WriteMode,
};
use tracing::{info, warn};

use crate::client::ChatClient;
use crate::error::{ClientError, Result};
use crate::models::{ChatKind, Conversation, Message, MessageDraft, MessageKind};

/// Derive the list-row preview for a message, WhatsApp-style: text is
/// truncated, non-text kinds collapse to a fixed label, files show their
/// name.
pub fn preview_text(kind: MessageKind, text: Option<&str>, file_name: Option<&str>) -> String {
    match kind {
        MessageKind::Text => text
            .unwrap_or_default()
            .chars()
            .take(PREVIEW_TEXT_MAX_CHARS)
            .collect(),
        MessageKind::Image => PREVIEW_LABEL_PHOTO.to_string(),
        MessageKind::Video => PREVIEW_LABEL_VIDEO.to_string(),
        MessageKind::Location => PREVIEW_LABEL_LOCATION.to_string(),
        MessageKind::File => file_name
            .or(text)
            .unwrap_or(PREVIEW_LABEL_FILE)
            .to_string(),
    }
}

impl<S: DocumentStore> ChatClient<S> {
    /// Send a message.
    ///
    /// Policy gates run first and surface as distinct errors: membership,
    /// empty text, the authoritative block edges (never the mirror, which
    /// may lag), and group send-mutes. The append and the summary refresh
    /// then commit atomically.
    pub async fn send_message(&self, chat: &ChatId, draft: MessageDraft) -> Result<MessageId> {
        let convo = self.get_conversation(chat).await?;
        if !convo.is_member(self.user()) {
            return Err(ClientError::NotAMember);
        }

        let kind = draft.kind();
        let text = draft.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        if kind == MessageKind::Text && text.is_none() {
            return Err(ClientError::EmptyMessage);
        }

        match convo.kind {
            ChatKind::Private => {
                if let Some(peer) = convo.peer_of(self.user()) {
                    if self.has_blocked(peer).await? {
                        return Err(ClientError::BlockedPeer);
                    }
                    if self.is_blocked_by(peer).await? {
                        return Err(ClientError::BlockedByPeer);
                    }
                }
            }
            ChatKind::Group => {
                if convo.muted_member_ids.contains(self.user()) {
                    return Err(ClientError::MutedInGroup);
                }
            }
        }

        let message_id = MessageId::new(CollectionPath::new_doc_id());
        let preview = preview_text(kind, text, draft.file_name.as_deref());

        let mut message_patch = Patch::new()
            .set("senderId", self.user().as_str())
            .set("type", kind.as_str())
            .server_timestamp("createdAt")
            .set("createdAtClient", Utc::now())
            .set("deleted", false)
            .set("hiddenFor", Vec::<Value>::new());
        if let Some(t) = text {
            message_patch = message_patch.set("text", t);
        }
        if let Some(url) = draft.media_url.as_deref() {
            message_patch = message_patch.set("mediaUrl", url);
        }
        if let Some(point) = draft.location {
            let mut geo = std::collections::BTreeMap::new();
            geo.insert("lat".to_string(), Value::Float(point.lat));
            geo.insert("lng".to_string(), Value::Float(point.lng));
            message_patch = message_patch.set("location", Value::Map(geo));
        }
        if let Some(ct) = draft.content_type.as_deref() {
            message_patch = message_patch.set("contentType", ct);
        }
        if let Some(name) = draft.file_name.as_deref() {
            message_patch = message_patch.set("fileName", name);
        }
        if let Some(size) = draft.size_bytes {
            message_patch = message_patch.set("sizeBytes", size);
        }

        let summary_patch = Patch::new()
            .set("lastMessageId", message_id.as_str())
            .set("lastMessageText", preview)
            .set("lastMessageType", kind.as_str())
            .set("lastMessageSenderId", self.user().as_str())
            .set("lastMessageStatus", "sent")
            .server_timestamp("lastMessageTimestamp")
            .server_timestamp("updatedAt");

        let message_path = Self::message_doc(chat, &message_id);
        let chat_path = Self::chat_doc(chat);
        self.store()
            .run_transaction(
                vec![],
                Box::new(move |_| {
                    Ok(vec![
                        TxnWrite::replace(message_path.clone(), message_patch.clone()),
                        TxnWrite::merge(chat_path.clone(), summary_patch.clone()),
                    ])
                }),
            )
            .await?;

        info!(chat = %chat, msg = %message_id, kind = kind.as_str(), "message sent");
        Ok(message_id)
    }

    /// Edit a text message. When the edited message is still the
    /// conversation's latest, the cached summary text follows in the same
    /// transaction.
    pub async fn edit_message(
        &self,
        chat: &ChatId,
        message: &MessageId,
        new_text: &str,
    ) -> Result<()> {
        let trimmed = new_text.trim().to_string();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let existing = self.get_message(chat, message).await?;
        if existing.sender != *self.user() {
            return Err(ClientError::NotMessageSender);
        }

        let chat_path = Self::chat_doc(chat);
        let message_path = Self::message_doc(chat, message);
        let message_id = message.clone();
        let body_chat = chat_path.clone();
        let body_message = message_path.clone();
        self.store()
            .run_transaction(
                vec![chat_path, message_path],
                Box::new(move |reads| {
                    let Some(msg_snap) = reads.get(&body_message) else {
                        return Ok(vec![]);
                    };
                    if Message::from_snapshot(msg_snap).deleted {
                        // Deleted while the edit was in flight; nothing to do.
                        return Ok(vec![]);
                    }

                    let mut writes = vec![TxnWrite::merge(
                        body_message.clone(),
                        Patch::new()
                            .set("text", trimmed.clone())
                            .server_timestamp("editedAt"),
                    )];

                    let is_last = reads
                        .get(&body_chat)
                        .map(Conversation::from_snapshot)
                        .and_then(|c| c.last_message)
                        .map(|last| last.id == message_id)
                        .unwrap_or(false);
                    if is_last {
                        writes.push(TxnWrite::merge(
                            body_chat.clone(),
                            Patch::new()
                                .set("lastMessageText", trimmed.clone())
                                .server_timestamp("updatedAt"),
                        ));
                    }
                    Ok(writes)
                }),
            )
            .await?;
        Ok(())
    }

    /// Delete a message for every member. Clears the payload for good; the
    /// conversation preview becomes a tombstone when the deleted message
    /// was the latest. Idempotent: re-deleting stages nothing.
    pub async fn delete_for_everyone(&self, chat: &ChatId, message: &MessageId) -> Result<()> {
        let existing = self.get_message(chat, message).await?;
        if existing.sender != *self.user() {
            return Err(ClientError::NotMessageSender);
        }
        if existing.deleted {
            return Ok(());
        }

        let chat_path = Self::chat_doc(chat);
        let message_path = Self::message_doc(chat, message);
        let me = self.user().clone();
        let message_id = message.clone();
        let body_chat = chat_path.clone();
        let body_message = message_path.clone();
        self.store()
            .run_transaction(
                vec![chat_path, message_path],
                Box::new(move |reads| {
                    let Some(msg_snap) = reads.get(&body_message) else {
                        return Ok(vec![]);
                    };
                    if Message::from_snapshot(msg_snap).deleted {
                        return Ok(vec![]);
                    }

                    let mut writes = vec![TxnWrite::merge(
                        body_message.clone(),
                        Patch::new()
                            .set("deleted", true)
                            .set("deletedBy", me.as_str())
                            .server_timestamp("deletedAt")
                            .delete("text")
                            .delete("mediaUrl")
                            .delete("location")
                            .delete("contentType")
                            .delete("fileName")
                            .delete("sizeBytes"),
                    )];

                    let is_last = reads
                        .get(&body_chat)
                        .map(Conversation::from_snapshot)
                        .and_then(|c| c.last_message)
                        .map(|last| last.id == message_id)
                        .unwrap_or(false);
                    if is_last {
                        writes.push(TxnWrite::merge(
                            body_chat.clone(),
                            Patch::new()
                                .set("lastMessageText", PREVIEW_TOMBSTONE)
                                .server_timestamp("updatedAt"),
                        ));
                    }
                    Ok(writes)
                }),
            )
            .await?;

        info!(chat = %chat, msg = %message, "message deleted for everyone");
        Ok(())
    }

    /// Hide a message from this user only. Always allowed, regardless of
    /// sender, age, or deletion state; only appends to `hiddenFor`.
    pub async fn delete_for_me(&self, chat: &ChatId, message: &MessageId) -> Result<()> {
        let result = self
            .store()
            .update(
                &Self::message_doc(chat, message),
                Patch::new().array_union("hiddenFor", vec![Value::from(self.user().as_str())]),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                Err(ClientError::MessageNotFound(message.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh this user's cached conversation preview from a message page:
    /// the newest message that is neither deleted nor hidden for them.
    /// Best-effort; the next snapshot recomputes it anyway.
    pub async fn update_my_preview(&self, chat: &ChatId, messages: &[Message]) {
        let latest = messages
            .iter()
            .rev()
            .find(|m| !m.deleted && !m.is_hidden_for(self.user()));

        let patch = match latest {
            Some(m) => Patch::new()
                .set("lastMessageId", m.id.as_str())
                .set(
                    "lastMessageText",
                    preview_text(m.kind, m.text.as_deref(), m.file_name.as_deref()),
                )
                .set("lastMessageType", m.kind.as_str())
                .set("lastMessageSenderId", m.sender.as_str())
                .set(
                    "lastMessageTimestamp",
                    m.effective_timestamp()
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                )
                .server_timestamp("updatedAt"),
            None => Patch::new()
                .delete("lastMessageId")
                .delete("lastMessageText")
                .delete("lastMessageType")
                .delete("lastMessageSenderId")
                .delete("lastMessageTimestamp")
                .server_timestamp("updatedAt"),
        };

        if let Err(e) = self
            .store()
            .set(&self.overlay_doc(chat), patch, WriteMode::Merge)
            .await
        {
            warn!(chat = %chat, error = %e, "preview cache write failed");
        }
    }

    /// One-shot fetch of the newest message page, oldest first.
    pub async fn messages_page(&self, chat: &ChatId) -> Result<Vec<Message>> {
        let query = Query::collection(Self::messages(chat))
            .order_by("createdAtClient", Direction::Descending)
            .limit(self.config().message_page_size);
        let mut messages: Vec<Message> = self
            .store()
            .query(&query)
            .await?
            .iter()
            .map(Message::from_snapshot)
            .collect();
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use palaver_store::MemoryStore;

    use crate::models::DeliveryStatus;

    fn client(store: &Arc<MemoryStore>, user: &str) -> ChatClient<MemoryStore> {
        ChatClient::new(Arc::clone(store), UserId::from(user))
    }

    async fn private_chat(
        store: &Arc<MemoryStore>,
    ) -> (ChatClient<MemoryStore>, ChatClient<MemoryStore>, ChatId) {
        let alice = client(store, "alice");
        let bob = client(store, "bob");
        let chat = alice.ensure_private_chat(&UserId::from("bob")).await.unwrap();
        (alice, bob, chat)
    }

    #[tokio::test]
    async fn test_send_appends_message_and_summary_atomically() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;

        let id = alice
            .send_message(&chat, MessageDraft::text("  hello bob  "))
            .await
            .unwrap();

        let msg = alice.get_message(&chat, &id).await.unwrap();
        assert_eq!(msg.text.as_deref(), Some("hello bob"));
        assert!(msg.created_at.is_some());
        assert!(!msg.deleted);

        let convo = alice.get_conversation(&chat).await.unwrap();
        let last = convo.last_message.expect("summary written");
        assert_eq!(last.id, id);
        assert_eq!(last.text, "hello bob");
        assert_eq!(last.sender, UserId::from("alice"));
        assert_eq!(last.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_text() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;
        let err = alice
            .send_message(&chat, MessageDraft::text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::EmptyMessage));
    }

    #[tokio::test]
    async fn test_send_rejects_non_member() {
        let store = Arc::new(MemoryStore::new());
        let (_alice, _bob, chat) = private_chat(&store).await;
        let mallory = client(&store, "mallory");
        let err = mallory
            .send_message(&chat, MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotAMember));
    }

    #[tokio::test]
    async fn test_send_rejects_blocker_and_blocked() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat) = private_chat(&store).await;

        alice.block(&UserId::from("bob"), &chat).await.unwrap();

        let err = alice
            .send_message(&chat, MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BlockedPeer));

        let err = bob
            .send_message(&chat, MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BlockedByPeer));

        alice.unblock(&UserId::from("bob"), &chat).await.unwrap();
        bob.send_message(&chat, MessageDraft::text("hi")).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejects_muted_group_member() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let bob = client(&store, "bob");
        let chat = alice
            .create_group("g", None, &[UserId::from("bob")])
            .await
            .unwrap();
        alice.mute_member(&chat, &UserId::from("bob")).await.unwrap();

        let err = bob
            .send_message(&chat, MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MutedInGroup));

        alice.unmute_member(&chat, &UserId::from("bob")).await.unwrap();
        bob.send_message(&chat, MessageDraft::text("hi")).await.unwrap();
    }

    #[test]
    fn test_preview_labels_per_kind() {
        assert_eq!(preview_text(MessageKind::Text, Some("hey"), None), "hey");
        assert_eq!(preview_text(MessageKind::Image, None, None), "Photo");
        assert_eq!(preview_text(MessageKind::Video, None, None), "Video");
        assert_eq!(preview_text(MessageKind::Location, None, None), "Location");
        assert_eq!(
            preview_text(MessageKind::File, None, Some("report.pdf")),
            "report.pdf"
        );
        assert_eq!(preview_text(MessageKind::File, None, None), "File");
    }

    #[test]
    fn test_preview_text_is_truncated() {
        let long = "x".repeat(600);
        let preview = preview_text(MessageKind::Text, Some(&long), None);
        assert_eq!(preview.chars().count(), 500);
    }

    #[tokio::test]
    async fn test_attachment_summary_uses_label() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;

        alice
            .send_message(
                &chat,
                MessageDraft::image("https://cdn.example/p.jpg", "image/jpeg"),
            )
            .await
            .unwrap();

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert_eq!(convo.last_message.unwrap().text, "Photo");
    }

    #[tokio::test]
    async fn test_edit_refreshes_summary_only_for_latest() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;

        let first = alice
            .send_message(&chat, MessageDraft::text("one"))
            .await
            .unwrap();
        let _second = alice
            .send_message(&chat, MessageDraft::text("two"))
            .await
            .unwrap();

        // Editing an older message leaves the summary alone.
        alice.edit_message(&chat, &first, "one!").await.unwrap();
        let convo = alice.get_conversation(&chat).await.unwrap();
        assert_eq!(convo.last_message.as_ref().unwrap().text, "two");

        let msg = alice.get_message(&chat, &first).await.unwrap();
        assert_eq!(msg.text.as_deref(), Some("one!"));
        assert!(msg.edited_at.is_some());
    }

    #[tokio::test]
    async fn test_edit_latest_refreshes_summary() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;
        let id = alice
            .send_message(&chat, MessageDraft::text("draft"))
            .await
            .unwrap();

        alice.edit_message(&chat, &id, "final").await.unwrap();

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert_eq!(convo.last_message.unwrap().text, "final");
    }

    #[tokio::test]
    async fn test_edit_rejects_other_senders() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat) = private_chat(&store).await;
        let id = alice
            .send_message(&chat, MessageDraft::text("mine"))
            .await
            .unwrap();
        let err = bob.edit_message(&chat, &id, "yours").await.unwrap_err();
        assert!(matches!(err, ClientError::NotMessageSender));
    }

    #[tokio::test]
    async fn test_delete_for_everyone_clears_payload_and_tombstones() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;
        let id = alice
            .send_message(&chat, MessageDraft::text("secret"))
            .await
            .unwrap();

        alice.delete_for_everyone(&chat, &id).await.unwrap();

        let msg = alice.get_message(&chat, &id).await.unwrap();
        assert!(msg.deleted);
        assert!(msg.text.is_none());
        assert_eq!(msg.deleted_by, Some(UserId::from("alice")));
        assert!(msg.deleted_at.is_some());

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert_eq!(convo.last_message.unwrap().text, "Message deleted");

        // Idempotent.
        alice.delete_for_everyone(&chat, &id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_for_everyone_rejects_other_senders() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat) = private_chat(&store).await;
        let id = alice
            .send_message(&chat, MessageDraft::text("mine"))
            .await
            .unwrap();
        let err = bob.delete_for_everyone(&chat, &id).await.unwrap_err();
        assert!(matches!(err, ClientError::NotMessageSender));
    }

    #[tokio::test]
    async fn test_delete_for_me_appends_requester_only() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat) = private_chat(&store).await;
        let id = alice
            .send_message(&chat, MessageDraft::text("hello"))
            .await
            .unwrap();

        // Any member may hide any message for themselves.
        bob.delete_for_me(&chat, &id).await.unwrap();
        bob.delete_for_me(&chat, &id).await.unwrap();

        let msg = alice.get_message(&chat, &id).await.unwrap();
        assert!(!msg.deleted);
        assert_eq!(msg.hidden_for, vec![UserId::from("bob")]);
    }

    #[tokio::test]
    async fn test_update_my_preview_skips_hidden_and_deleted() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat) = private_chat(&store).await;

        let m1 = alice
            .send_message(&chat, MessageDraft::text("first"))
            .await
            .unwrap();
        let m2 = alice
            .send_message(&chat, MessageDraft::text("second"))
            .await
            .unwrap();
        bob.delete_for_me(&chat, &m2).await.unwrap();

        let page = bob.messages_page(&chat).await.unwrap();
        bob.update_my_preview(&chat, &page).await;

        let overlay = bob.get_overlay(&chat).await.unwrap();
        let preview = overlay.preview.expect("preview cached");
        assert_eq!(preview.message_id, m1);
        assert_eq!(preview.text.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_messages_page_is_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat) = private_chat(&store).await;
        let m1 = alice.send_message(&chat, MessageDraft::text("1")).await.unwrap();
        let m2 = alice.send_message(&chat, MessageDraft::text("2")).await.unwrap();

        let page = alice.messages_page(&chat).await.unwrap();
        let ids: Vec<&MessageId> = page.iter().map(|m| &m.id).collect();
        assert_eq!(ids, vec![&m1, &m2]);
    }
}
