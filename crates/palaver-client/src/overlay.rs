//! Per-user private conversation state: archive, mute, pin, hide, clear.
//!
//! The overlay lives in the user's own document tree and is only ever
//! merged, never replaced, so independent flags from different devices
//! coexist under last-write-wins. Cleared flags are *deleted*, not set to
//! `false`: absence is the canonical "never set" state.
//!
//! Every write here also bumps `updatedAt`, which the projector compares
//! against the conversation's latest-message timestamp: traffic newer than
//! the last overlay action unconditionally resurfaces a hidden or archived
//! chat.

use chrono::{DateTime, Utc};
use palaver_shared::constants::mute_forever;
use palaver_shared::ChatId;
use palaver_store::{DocumentStore, Patch, WriteMode};
use tracing::info;

use crate::client::ChatClient;
use crate::error::Result;

impl<S: DocumentStore> ChatClient<S> {
    /// Archive or un-archive a conversation for this user.
    ///
    /// Archiving also mutes forever: an archived chat must never notify.
    /// Un-archiving deletes the archive fields and leaves the mute alone;
    /// the user lifts it separately.
    pub async fn set_archived(&self, chat: &ChatId, archived: bool) -> Result<()> {
        let patch = if archived {
            Patch::new()
                .set("archived", true)
                .server_timestamp("archivedAt")
                .set("mutedUntil", mute_forever())
                .server_timestamp("updatedAt")
        } else {
            Patch::new()
                .delete("archived")
                .delete("archivedAt")
                .server_timestamp("updatedAt")
        };

        self.store()
            .set(&self.overlay_doc(chat), patch, WriteMode::Merge)
            .await?;
        info!(chat = %chat, archived, "archive flag changed");
        Ok(())
    }

    /// Mute until a point in time, forever (`mute_forever()`), or not at
    /// all (`None` deletes the field). The projection check is uniformly
    /// `now < mutedUntil` for every case.
    pub async fn set_muted_until(
        &self,
        chat: &ChatId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let patch = match until {
            Some(until) => Patch::new()
                .set("mutedUntil", until)
                .server_timestamp("updatedAt"),
            None => Patch::new().delete("mutedUntil").server_timestamp("updatedAt"),
        };

        self.store()
            .set(&self.overlay_doc(chat), patch, WriteMode::Merge)
            .await?;
        Ok(())
    }

    /// Pin or unpin a conversation for this user.
    pub async fn set_pinned(&self, chat: &ChatId, pinned: bool) -> Result<()> {
        let patch = if pinned {
            Patch::new().set("pinned", true).server_timestamp("updatedAt")
        } else {
            Patch::new().delete("pinned").server_timestamp("updatedAt")
        };

        self.store()
            .set(&self.overlay_doc(chat), patch, WriteMode::Merge)
            .await?;
        Ok(())
    }

    /// Hide the conversation from this user's list ("delete chat").
    ///
    /// Hiding also bumps `clearedBefore`: when new traffic resurfaces the
    /// chat, only messages after the hide point show. The hidden history
    /// must not come back with it.
    pub async fn hide_chat(&self, chat: &ChatId) -> Result<()> {
        self.store()
            .set(
                &self.overlay_doc(chat),
                Patch::new()
                    .set("hidden", true)
                    .server_timestamp("clearedBefore")
                    .server_timestamp("updatedAt"),
                WriteMode::Merge,
            )
            .await?;
        info!(chat = %chat, "chat hidden");
        Ok(())
    }

    /// Clear history for this user while keeping the chat visible.
    ///
    /// Moves `clearedBefore` to now; server clocks are monotonic, so the
    /// mark never goes backwards. Nothing is deleted server-side; content
    /// at or before the mark is only masked out of this user's projection.
    pub async fn clear_chat_for_me(&self, chat: &ChatId) -> Result<()> {
        self.store()
            .set(
                &self.overlay_doc(chat),
                Patch::new()
                    .server_timestamp("clearedBefore")
                    .server_timestamp("updatedAt"),
                WriteMode::Merge,
            )
            .await?;
        info!(chat = %chat, "chat history cleared");
        Ok(())
    }
}
