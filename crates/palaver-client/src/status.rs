//! Read receipts and delivery promotion.
//!
//! `lastMessage.status` is a strictly monotonic machine (`sent → delivered
//! → read`) shared by every member's devices. All advancement runs through
//! transactions on the conversation document whose bodies re-check the
//! transition against the in-transaction snapshot, so concurrent reads,
//! races with fresh sends, and at-least-once body execution can only ever
//! move the status forward or leave it alone.

use std::time::Duration;

use futures::future::join_all;
use palaver_shared::{ChatId, MessageId};
use palaver_store::{DocumentStore, Patch, Query, TxnWrite, WriteMode};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::ChatClient;
use crate::error::Result;
use crate::models::{Conversation, DeliveryStatus};

impl<S: DocumentStore> ChatClient<S> {
    /// Record that this user has read the conversation's latest message.
    ///
    /// One transaction: advance `lastMessage.status` to `read` iff the
    /// reader is not the sender, `explicit` (when given) still names the
    /// latest message, and a latest message exists; unconditionally merge
    /// this member's read cursor (`lastOpenedAt` + `lastReadMessageId`).
    /// The same cursor then merges into the user's overlay outside the
    /// transaction.
    ///
    /// Read receipts are best-effort: failures are logged and swallowed,
    /// and the next read event implicitly retries. Nothing here ever blocks
    /// message delivery.
    pub async fn record_read(&self, chat: &ChatId, explicit: Option<&MessageId>) {
        // Cursor hint for the overlay merge below; the transaction itself
        // re-reads and uses the in-transaction latest id.
        let cursor_hint = match explicit {
            Some(id) => Some(id.clone()),
            None => match self.get_conversation(chat).await {
                Ok(convo) => convo.last_message.map(|last| last.id),
                Err(e) => {
                    warn!(chat = %chat, error = %e, "read receipt dropped");
                    return;
                }
            },
        };

        let chat_path = Self::chat_doc(chat);
        let me = self.user().clone();
        let explicit_owned = explicit.cloned();
        let body_path = chat_path.clone();
        let result = self
            .store()
            .run_transaction(
                vec![chat_path],
                Box::new(move |reads| {
                    let Some(snap) = reads.get(&body_path) else {
                        return Ok(vec![]);
                    };
                    let convo = Conversation::from_snapshot(snap);

                    let mut patch = Patch::new()
                        .server_timestamp(&format!("memberMeta.{me}.lastOpenedAt"));

                    if let Some(last) = &convo.last_message {
                        let cursor = explicit_owned.clone().unwrap_or_else(|| last.id.clone());
                        patch = patch.set(
                            &format!("memberMeta.{me}.lastReadMessageId"),
                            cursor.as_str(),
                        );

                        let names_latest =
                            explicit_owned.as_ref().map_or(true, |e| *e == last.id);
                        let advance = last.sender != me
                            && names_latest
                            && last.status.can_advance_to(DeliveryStatus::Read);
                        if advance {
                            patch = patch
                                .set("lastMessageStatus", DeliveryStatus::Read.as_str())
                                .server_timestamp("updatedAt");
                        }
                    } else if let Some(explicit) = &explicit_owned {
                        patch = patch.set(
                            &format!("memberMeta.{me}.lastReadMessageId"),
                            explicit.as_str(),
                        );
                    }

                    Ok(vec![TxnWrite::merge(body_path.clone(), patch)])
                }),
            )
            .await;

        if let Err(e) = result {
            warn!(chat = %chat, error = %e, "read receipt dropped");
            return;
        }

        let mut overlay_patch = Patch::new()
            .server_timestamp("lastOpenedAt")
            .server_timestamp("updatedAt");
        if let Some(cursor) = cursor_hint {
            overlay_patch = overlay_patch.set("lastReadMessageId", cursor.as_str());
        }
        if let Err(e) = self
            .store()
            .set(&self.overlay_doc(chat), overlay_patch, WriteMode::Merge)
            .await
        {
            warn!(chat = %chat, error = %e, "overlay read cursor write failed");
        }
    }

    /// Record that this user opened the conversation: bumps the shared
    /// `lastOpenedAt` marker and the overlay's, and unhides a
    /// hidden-for-me chat (opening it is the strongest possible signal the
    /// user wants it back).
    pub async fn mark_opened(&self, chat: &ChatId) -> Result<()> {
        self.store()
            .set(
                &Self::chat_doc(chat),
                Patch::new()
                    .server_timestamp(&format!("memberMeta.{}.lastOpenedAt", self.user())),
                WriteMode::Merge,
            )
            .await?;

        self.store()
            .set(
                &self.overlay_doc(chat),
                Patch::new()
                    .server_timestamp("lastOpenedAt")
                    .delete("hidden")
                    .server_timestamp("updatedAt"),
                WriteMode::Merge,
            )
            .await?;
        Ok(())
    }

    /// Recipient-side promotion sweep: conversations where this user is a
    /// member and someone else's latest message still reads `sent` advance
    /// to `delivered`. Stands in for a transport-level delivery ack: the
    /// client being alive and fetching is the acknowledgment.
    ///
    /// Batch-limited per run and idempotent: the query only selects
    /// `sent`, and each per-conversation transaction re-checks the status
    /// before advancing, so racing reads can only land further ahead.
    pub async fn promote_sent_to_delivered(&self, batch_limit: usize) -> Result<usize> {
        let query = Query::collection(Self::chats())
            .filter_array_contains("members", self.user().as_str())
            .filter_eq("lastMessageStatus", DeliveryStatus::Sent.as_str())
            .limit(batch_limit);
        let hits = self.store().query(&query).await?;

        let me = self.user().clone();
        let promotions = hits
            .into_iter()
            .filter(|snap| {
                snap.get_str("lastMessageSenderId")
                    .map(|sender| sender != me.as_str())
                    .unwrap_or(false)
            })
            .map(|snap| {
                let path = snap.path().clone();
                let me = me.clone();
                let body_path = path.clone();
                async move {
                    self.store()
                        .run_transaction(
                            vec![path],
                            Box::new(move |reads| {
                                let Some(snap) = reads.get(&body_path) else {
                                    return Ok(vec![]);
                                };
                                let convo = Conversation::from_snapshot(snap);
                                match convo.last_message {
                                    Some(last)
                                        if last.status == DeliveryStatus::Sent
                                            && last.sender != me =>
                                    {
                                        Ok(vec![TxnWrite::merge(
                                            body_path.clone(),
                                            Patch::new()
                                                .set(
                                                    "lastMessageStatus",
                                                    DeliveryStatus::Delivered.as_str(),
                                                )
                                                .server_timestamp("updatedAt"),
                                        )])
                                    }
                                    _ => Ok(vec![]),
                                }
                            }),
                        )
                        .await
                }
            });

        let promoted = join_all(promotions)
            .await
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        if promoted > 0 {
            debug!(promoted, "delivery sweep promoted conversations");
        }
        Ok(promoted)
    }
}

/// Handle to a running delivery sweeper task.
pub struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Spawn the periodic delivery-promotion sweep in a background tokio task.
///
/// Interval and batch size come from the client's [`crate::ClientConfig`].
/// Returns a handle whose [`SweeperHandle::shutdown`] stops the loop.
pub fn spawn_delivery_sweeper<S>(client: ChatClient<S>) -> SweeperHandle
where
    S: DocumentStore + 'static,
{
    let interval = Duration::from_secs(client.config().sweep_interval_secs);
    let batch = client.config().sweep_batch;
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("delivery sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = client.promote_sent_to_delivered(batch).await {
                        warn!(error = %e, "delivery sweep failed");
                    }
                }
            }
        }
    });

    SweeperHandle {
        shutdown_tx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use palaver_shared::UserId;
    use palaver_store::MemoryStore;

    use crate::config::ClientConfig;
    use crate::models::MessageDraft;

    fn client(store: &Arc<MemoryStore>, user: &str) -> ChatClient<MemoryStore> {
        ChatClient::new(Arc::clone(store), UserId::from(user))
    }

    async fn chat_with_message(
        store: &Arc<MemoryStore>,
    ) -> (
        ChatClient<MemoryStore>,
        ChatClient<MemoryStore>,
        palaver_shared::ChatId,
        MessageId,
    ) {
        let alice = client(store, "alice");
        let bob = client(store, "bob");
        let chat = alice.ensure_private_chat(&UserId::from("bob")).await.unwrap();
        let msg = alice
            .send_message(&chat, MessageDraft::text("hello"))
            .await
            .unwrap();
        (alice, bob, chat, msg)
    }

    async fn status_of(
        client: &ChatClient<MemoryStore>,
        chat: &palaver_shared::ChatId,
    ) -> DeliveryStatus {
        client
            .get_conversation(chat)
            .await
            .unwrap()
            .last_message
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_full_lifecycle_sent_delivered_read() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat, msg) = chat_with_message(&store).await;

        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Sent);

        let promoted = bob.promote_sent_to_delivered(25).await.unwrap();
        assert_eq!(promoted, 1);
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Delivered);

        bob.record_read(&chat, None).await;
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Read);

        let convo = alice.get_conversation(&chat).await.unwrap();
        let meta = convo.member_meta_for(&UserId::from("bob"));
        assert_eq!(meta.last_read_message_id, Some(msg.clone()));
        assert!(meta.last_opened_at.is_some());

        let overlay = bob.get_overlay(&chat).await.unwrap();
        assert_eq!(overlay.last_read_message_id, Some(msg));
    }

    #[tokio::test]
    async fn test_sender_reads_never_mark_read() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat, _msg) = chat_with_message(&store).await;

        // However many times the sender "reads" their own chat...
        for _ in 0..5 {
            alice.record_read(&chat, None).await;
        }
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Sent);

        // ...though their open marker does advance.
        let convo = alice.get_conversation(&chat).await.unwrap();
        assert!(convo
            .member_meta_for(&UserId::from("alice"))
            .last_opened_at
            .is_some());
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat, _msg) = chat_with_message(&store).await;

        bob.record_read(&chat, None).await;
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Read);

        // A late delivery sweep must not pull read back to delivered.
        let promoted = bob.promote_sent_to_delivered(25).await.unwrap();
        assert_eq!(promoted, 0);
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Read);

        // Re-reading is a no-op, not a downgrade.
        bob.record_read(&chat, None).await;
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn test_sender_never_promotes_own_message() {
        let store = Arc::new(MemoryStore::new());
        let (alice, _bob, chat, _msg) = chat_with_message(&store).await;

        let promoted = alice.promote_sent_to_delivered(25).await.unwrap();
        assert_eq!(promoted, 0);
        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn test_promotion_sweep_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (_alice, bob, chat, _msg) = chat_with_message(&store).await;

        assert_eq!(bob.promote_sent_to_delivered(25).await.unwrap(), 1);
        assert_eq!(bob.promote_sent_to_delivered(25).await.unwrap(), 0);
        assert_eq!(status_of(&bob, &chat).await, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_promotion_respects_batch_limit() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let bob = client(&store, "bob");
        for i in 0..3 {
            let chat = alice
                .create_group(&format!("g{i}"), None, &[UserId::from("bob")])
                .await
                .unwrap();
            alice
                .send_message(&chat, MessageDraft::text("ping"))
                .await
                .unwrap();
        }

        assert_eq!(bob.promote_sent_to_delivered(2).await.unwrap(), 2);
        assert_eq!(bob.promote_sent_to_delivered(2).await.unwrap(), 1);
        assert_eq!(bob.promote_sent_to_delivered(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_of_stale_message_only_moves_cursor() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob, chat, first) = chat_with_message(&store).await;
        let _second = alice
            .send_message(&chat, MessageDraft::text("newer"))
            .await
            .unwrap();

        // Bob read the first message, but a newer one is the latest now:
        // no status advance, cursor records what he actually saw.
        bob.record_read(&chat, Some(&first)).await;

        assert_eq!(status_of(&alice, &chat).await, DeliveryStatus::Sent);
        let convo = alice.get_conversation(&chat).await.unwrap();
        assert_eq!(
            convo.member_meta_for(&UserId::from("bob")).last_read_message_id,
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_record_read_on_empty_conversation() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let chat = alice.ensure_private_chat(&UserId::from("bob")).await.unwrap();

        alice.record_read(&chat, None).await;

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert!(convo.last_message.is_none());
        assert!(convo
            .member_meta_for(&UserId::from("alice"))
            .last_opened_at
            .is_some());
    }

    #[tokio::test]
    async fn test_record_read_swallows_store_failure() {
        let store = Arc::new(MemoryStore::new());
        let (_alice, bob, chat, _msg) = chat_with_message(&store).await;

        store.poison_writes("chats/").await;
        bob.record_read(&chat, None).await; // must not panic or error
        store.heal().await;

        assert_eq!(status_of(&bob, &chat).await, DeliveryStatus::Sent);

        // The next read event retries implicitly.
        bob.record_read(&chat, None).await;
        assert_eq!(status_of(&bob, &chat).await, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn test_mark_opened_unhides_chat() {
        let store = Arc::new(MemoryStore::new());
        let (_alice, bob, chat, _msg) = chat_with_message(&store).await;

        bob.hide_chat(&chat).await.unwrap();
        assert!(bob.get_overlay(&chat).await.unwrap().hidden);

        bob.mark_opened(&chat).await.unwrap();
        assert!(!bob.get_overlay(&chat).await.unwrap().hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_promotes_and_shuts_down() {
        let store = Arc::new(MemoryStore::new());
        let (_alice, bob, chat, _msg) = chat_with_message(&store).await;

        let config = ClientConfig {
            sweep_interval_secs: 30,
            ..ClientConfig::default()
        };
        let sweeper = spawn_delivery_sweeper(ChatClient::with_config(
            Arc::clone(&store),
            UserId::from("bob"),
            config,
        ));

        // Paused clock: sleeping past the interval auto-advances time.
        tokio::time::sleep(Duration::from_secs(31)).await;
        sweeper.shutdown().await;

        assert_eq!(status_of(&bob, &chat).await, DeliveryStatus::Delivered);
    }
}
