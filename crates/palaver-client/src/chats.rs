//! Conversation lifecycle and group administration.
//!
//! Private chats use a deterministic document id derived from the member
//! pair, so no query is needed to find (or race-free create) the
//! conversation between two users. Group membership and role changes are
//! observe-then-decide and therefore run as transactions on the
//! conversation document: the body re-checks its precondition against the
//! in-transaction snapshot and stages nothing if it no longer holds.

use palaver_shared::{pair_key, ChatId, UserId};
use palaver_store::{CollectionPath, DocumentStore, Patch, TxnWrite, Value, WriteMode};
use tracing::info;

use crate::client::ChatClient;
use crate::error::{ClientError, Result};
use crate::models::{ChatKind, Conversation};

fn user_values(users: &[UserId]) -> Vec<Value> {
    users.iter().map(|u| Value::from(u.as_str())).collect()
}

impl<S: DocumentStore> ChatClient<S> {
    /// Get or create the private conversation with `peer`.
    ///
    /// Both members resolve the same deterministic document id, so two
    /// clients opening the chat concurrently converge on one document (the
    /// second merge write is a no-op).
    pub async fn ensure_private_chat(&self, peer: &UserId) -> Result<ChatId> {
        if peer == self.user() {
            return Err(ClientError::SelfChat);
        }

        let chat_id = ChatId::for_private_pair(self.user(), peer);
        let path = Self::chat_doc(&chat_id);

        if self.store().get(&path).await?.is_none() {
            let members = [self.user().clone(), peer.clone()];
            self.store()
                .set(
                    &path,
                    Patch::new()
                        .set("type", ChatKind::Private.as_str())
                        .set("members", user_values(&members))
                        .set("pairKey", pair_key(self.user(), peer))
                        .server_timestamp("createdAt")
                        .server_timestamp("updatedAt"),
                    WriteMode::Merge,
                )
                .await?;
            info!(chat = %chat_id, peer = %peer, "created private chat");
        }

        Ok(chat_id)
    }

    /// Create a group conversation. The creator becomes a member and the
    /// sole initial admin.
    pub async fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
        members: &[UserId],
    ) -> Result<ChatId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::BlankGroupName);
        }

        let mut all_members: Vec<UserId> = vec![self.user().clone()];
        for member in members {
            if !all_members.contains(member) {
                all_members.push(member.clone());
            }
        }

        let chat_id = ChatId::new(CollectionPath::new_doc_id());
        let mut patch = Patch::new()
            .set("type", ChatKind::Group.as_str())
            .set("groupName", name)
            .set("members", user_values(&all_members))
            .set("adminIds", user_values(&[self.user().clone()]))
            .set("mutedMemberIds", Vec::<Value>::new())
            .server_timestamp("createdAt")
            .server_timestamp("updatedAt");
        if let Some(desc) = description.map(str::trim).filter(|d| !d.is_empty()) {
            patch = patch.set("groupDescription", desc);
        }

        self.store()
            .set(&Self::chat_doc(&chat_id), patch, WriteMode::Replace)
            .await?;
        info!(chat = %chat_id, members = all_members.len(), "created group");
        Ok(chat_id)
    }

    /// Admin-only: add members.
    pub async fn add_members(&self, chat: &ChatId, new_members: &[UserId]) -> Result<()> {
        if new_members.is_empty() {
            return Ok(());
        }
        self.require_group_admin(chat).await?;

        let path = Self::chat_doc(chat);
        let me = self.user().clone();
        let additions = user_values(new_members);
        let body_path = path.clone();
        self.store()
            .run_transaction(
                vec![path],
                Box::new(move |reads| {
                    let Some(snap) = reads.get(&body_path) else {
                        return Ok(vec![]);
                    };
                    let convo = Conversation::from_snapshot(snap);
                    if convo.kind != ChatKind::Group || !convo.is_admin(&me) {
                        // Precondition vanished since the pre-check; stage nothing.
                        return Ok(vec![]);
                    }
                    Ok(vec![TxnWrite::merge(
                        body_path.clone(),
                        Patch::new()
                            .array_union("members", additions.clone())
                            .server_timestamp("updatedAt"),
                    )])
                }),
            )
            .await?;
        Ok(())
    }

    /// Admin-only: remove members. Also strips any admin/muted role the
    /// removed users held.
    pub async fn remove_members(&self, chat: &ChatId, members: &[UserId]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.require_group_admin(chat).await?;

        let path = Self::chat_doc(chat);
        let me = self.user().clone();
        let removals = user_values(members);
        let body_path = path.clone();
        self.store()
            .run_transaction(
                vec![path],
                Box::new(move |reads| {
                    let Some(snap) = reads.get(&body_path) else {
                        return Ok(vec![]);
                    };
                    let convo = Conversation::from_snapshot(snap);
                    if convo.kind != ChatKind::Group || !convo.is_admin(&me) {
                        return Ok(vec![]);
                    }
                    Ok(vec![TxnWrite::merge(
                        body_path.clone(),
                        Patch::new()
                            .array_remove("members", removals.clone())
                            .array_remove("adminIds", removals.clone())
                            .array_remove("mutedMemberIds", removals.clone())
                            .server_timestamp("updatedAt"),
                    )])
                }),
            )
            .await?;
        Ok(())
    }

    /// Admin-only: grant admin.
    pub async fn make_admin(&self, chat: &ChatId, user: &UserId) -> Result<()> {
        self.set_role_membership(chat, user, "adminIds", true).await
    }

    /// Admin-only: revoke admin.
    pub async fn revoke_admin(&self, chat: &ChatId, user: &UserId) -> Result<()> {
        self.set_role_membership(chat, user, "adminIds", false).await
    }

    /// Admin-only: mute a member (stays in the group, cannot send).
    pub async fn mute_member(&self, chat: &ChatId, user: &UserId) -> Result<()> {
        self.set_role_membership(chat, user, "mutedMemberIds", true)
            .await
    }

    /// Admin-only: unmute a member.
    pub async fn unmute_member(&self, chat: &ChatId, user: &UserId) -> Result<()> {
        self.set_role_membership(chat, user, "mutedMemberIds", false)
            .await
    }

    async fn set_role_membership(
        &self,
        chat: &ChatId,
        user: &UserId,
        field: &'static str,
        present: bool,
    ) -> Result<()> {
        self.require_group_admin(chat).await?;

        let path = Self::chat_doc(chat);
        let me = self.user().clone();
        let target = vec![Value::from(user.as_str())];
        let body_path = path.clone();
        self.store()
            .run_transaction(
                vec![path],
                Box::new(move |reads| {
                    let Some(snap) = reads.get(&body_path) else {
                        return Ok(vec![]);
                    };
                    let convo = Conversation::from_snapshot(snap);
                    if convo.kind != ChatKind::Group || !convo.is_admin(&me) {
                        return Ok(vec![]);
                    }
                    let patch = if present {
                        Patch::new().array_union(field, target.clone())
                    } else {
                        Patch::new().array_remove(field, target.clone())
                    };
                    Ok(vec![TxnWrite::merge(
                        body_path.clone(),
                        patch.server_timestamp("updatedAt"),
                    )])
                }),
            )
            .await?;
        Ok(())
    }

    /// Admin-only: rename the group and optionally replace its description
    /// (a blank description removes the field).
    pub async fn update_group_profile(
        &self,
        chat: &ChatId,
        name: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::BlankGroupName);
        }
        self.require_group_admin(chat).await?;

        let mut patch = Patch::new()
            .set("groupName", name)
            .server_timestamp("updatedAt");
        if let Some(desc) = description {
            let desc = desc.trim();
            patch = if desc.is_empty() {
                patch.delete("groupDescription")
            } else {
                patch.set("groupDescription", desc)
            };
        }

        self.store()
            .set(&Self::chat_doc(chat), patch, WriteMode::Merge)
            .await?;
        Ok(())
    }

    /// Leave a group. Removes the caller from the member list and any role
    /// lists in one transaction; if the caller was the last admin and other
    /// members remain, the longest-standing member (first in the member
    /// array) is promoted in the same transaction so the group is never
    /// left adminless.
    pub async fn leave_group(&self, chat: &ChatId) -> Result<()> {
        let convo = self.get_conversation(chat).await?;
        if convo.kind != ChatKind::Group {
            return Err(ClientError::NotAGroup);
        }
        if !convo.is_member(self.user()) {
            return Err(ClientError::NotAMember);
        }

        let path = Self::chat_doc(chat);
        let me = self.user().clone();
        let body_path = path.clone();
        self.store()
            .run_transaction(
                vec![path],
                Box::new(move |reads| {
                    let Some(snap) = reads.get(&body_path) else {
                        return Ok(vec![]);
                    };
                    let convo = Conversation::from_snapshot(snap);
                    if !convo.is_member(&me) {
                        // Already gone (retry or concurrent removal).
                        return Ok(vec![]);
                    }

                    let members: Vec<UserId> =
                        convo.members.iter().filter(|m| **m != me).cloned().collect();
                    let mut admins: Vec<UserId> =
                        convo.admin_ids.iter().filter(|a| **a != me).cloned().collect();
                    let muted: Vec<UserId> = convo
                        .muted_member_ids
                        .iter()
                        .filter(|m| **m != me)
                        .cloned()
                        .collect();

                    if admins.is_empty() {
                        if let Some(successor) = members.first() {
                            admins.push(successor.clone());
                        }
                    }

                    Ok(vec![TxnWrite::merge(
                        body_path.clone(),
                        Patch::new()
                            .set("members", user_values(&members))
                            .set("adminIds", user_values(&admins))
                            .set("mutedMemberIds", user_values(&muted))
                            .server_timestamp("updatedAt"),
                    )])
                }),
            )
            .await?;
        info!(chat = %chat, "left group");
        Ok(())
    }

    async fn require_group_admin(&self, chat: &ChatId) -> Result<Conversation> {
        let convo = self.get_conversation(chat).await?;
        if convo.kind != ChatKind::Group {
            return Err(ClientError::NotAGroup);
        }
        if !convo.is_member(self.user()) {
            return Err(ClientError::NotAMember);
        }
        if !convo.is_admin(self.user()) {
            return Err(ClientError::AdminRequired);
        }
        Ok(convo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use palaver_store::MemoryStore;

    fn client(store: &Arc<MemoryStore>, user: &str) -> ChatClient<MemoryStore> {
        ChatClient::new(Arc::clone(store), UserId::from(user))
    }

    #[tokio::test]
    async fn test_ensure_private_chat_is_idempotent_and_symmetric() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let bob = client(&store, "bob");

        let c1 = alice.ensure_private_chat(&UserId::from("bob")).await.unwrap();
        let c2 = bob.ensure_private_chat(&UserId::from("alice")).await.unwrap();
        assert_eq!(c1, c2);

        let convo = alice.get_conversation(&c1).await.unwrap();
        assert_eq!(convo.kind, ChatKind::Private);
        assert_eq!(convo.members.len(), 2);
        assert_eq!(convo.pair_key.as_deref(), Some("alice#bob"));
    }

    #[tokio::test]
    async fn test_private_chat_with_self_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let err = alice
            .ensure_private_chat(&UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SelfChat));
    }

    #[tokio::test]
    async fn test_group_creator_is_member_and_admin() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let chat = alice
            .create_group("Climbing", Some("weekend plans"), &[UserId::from("bob")])
            .await
            .unwrap();

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert_eq!(convo.kind, ChatKind::Group);
        assert!(convo.is_member(&UserId::from("alice")));
        assert!(convo.is_member(&UserId::from("bob")));
        assert!(convo.is_admin(&UserId::from("alice")));
        assert!(!convo.is_admin(&UserId::from("bob")));
        assert_eq!(convo.group_description.as_deref(), Some("weekend plans"));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_administer() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let bob = client(&store, "bob");
        let chat = alice
            .create_group("g", None, &[UserId::from("bob")])
            .await
            .unwrap();

        let err = bob
            .add_members(&chat, &[UserId::from("carol")])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AdminRequired));

        let err = bob
            .mute_member(&chat, &UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AdminRequired));
    }

    #[tokio::test]
    async fn test_remove_members_strips_roles() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let chat = alice
            .create_group("g", None, &[UserId::from("bob"), UserId::from("carol")])
            .await
            .unwrap();
        alice.make_admin(&chat, &UserId::from("bob")).await.unwrap();
        alice
            .mute_member(&chat, &UserId::from("bob"))
            .await
            .unwrap();

        alice
            .remove_members(&chat, &[UserId::from("bob")])
            .await
            .unwrap();

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert!(!convo.is_member(&UserId::from("bob")));
        assert!(!convo.is_admin(&UserId::from("bob")));
        assert!(!convo.muted_member_ids.contains(&UserId::from("bob")));
    }

    #[tokio::test]
    async fn test_last_admin_leaving_promotes_first_remaining_member() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let chat = alice
            .create_group("g", None, &[UserId::from("bob"), UserId::from("carol")])
            .await
            .unwrap();

        alice.leave_group(&chat).await.unwrap();

        let convo = alice.get_conversation(&chat).await.unwrap();
        assert!(!convo.is_member(&UserId::from("alice")));
        // Bob joined first among the remaining members.
        assert_eq!(convo.admin_ids, vec![UserId::from("bob")]);
    }

    #[tokio::test]
    async fn test_leave_group_rejected_on_private_chat() {
        let store = Arc::new(MemoryStore::new());
        let alice = client(&store, "alice");
        let chat = alice.ensure_private_chat(&UserId::from("bob")).await.unwrap();
        let err = alice.leave_group(&chat).await.unwrap_err();
        assert!(matches!(err, ClientError::NotAGroup));
    }
}
