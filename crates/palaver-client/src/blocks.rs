//! Block relationships and their conversation mirror.
//!
//! The directed edge under `users/{me}/blocks/{peerId}` is the source of
//! truth. It is mirrored into both members' `memberMeta` on the shared
//! conversation (`iBlockedPeer` / `blockedByOther`) so list screens can
//! show block state from the snapshot they already hold, without extra
//! reads. The mirror is best-effort and may lag; anything that must be
//! correct (the send gate above all) re-checks the edge.

use palaver_shared::{ChatId, UserId};
use palaver_store::{DocumentStore, Patch, WriteMode};
use tracing::{info, warn};

use crate::client::ChatClient;
use crate::error::Result;

impl<S: DocumentStore> ChatClient<S> {
    /// Block `peer`. The edge write is authoritative and its failure
    /// surfaces; the conversation mirror write is best-effort.
    pub async fn block(&self, peer: &UserId, chat: &ChatId) -> Result<()> {
        self.store()
            .set(
                &Self::block_doc(self.user(), peer),
                Patch::new()
                    .set("blocked", true)
                    .server_timestamp("createdAt"),
                WriteMode::Merge,
            )
            .await?;
        info!(peer = %peer, "blocked user");

        self.mirror_block_flags(peer, chat, true).await;
        Ok(())
    }

    /// Unblock `peer`. Deletes the edge document, then clears the mirror.
    pub async fn unblock(&self, peer: &UserId, chat: &ChatId) -> Result<()> {
        self.store()
            .delete(&Self::block_doc(self.user(), peer))
            .await?;
        info!(peer = %peer, "unblocked user");

        self.mirror_block_flags(peer, chat, false).await;
        Ok(())
    }

    /// Authoritative: have I blocked `peer`?
    pub async fn has_blocked(&self, peer: &UserId) -> Result<bool> {
        let snap = self.store().get(&Self::block_doc(self.user(), peer)).await?;
        Ok(snap
            .map(|s| s.get_bool("blocked").unwrap_or(false))
            .unwrap_or(false))
    }

    /// Authoritative: has `peer` blocked me?
    pub async fn is_blocked_by(&self, peer: &UserId) -> Result<bool> {
        let snap = self.store().get(&Self::block_doc(peer, self.user())).await?;
        Ok(snap
            .map(|s| s.get_bool("blocked").unwrap_or(false))
            .unwrap_or(false))
    }

    /// Merge the denormalized block flags into the shared conversation. A
    /// failure here leaves the mirror stale until the next block/unblock;
    /// the edge remains correct either way.
    async fn mirror_block_flags(&self, peer: &UserId, chat: &ChatId, blocked: bool) {
        let patch = Patch::new()
            .set(
                &format!("memberMeta.{}.iBlockedPeer", self.user()),
                blocked,
            )
            .set(&format!("memberMeta.{}.blockedByOther", peer), blocked)
            .server_timestamp("updatedAt");

        if let Err(e) = self
            .store()
            .set(&Self::chat_doc(chat), patch, WriteMode::Merge)
            .await
        {
            warn!(chat = %chat, peer = %peer, error = %e, "block mirror write failed");
        }
    }
}
