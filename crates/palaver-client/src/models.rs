//! Domain model structs decoded from store snapshots.
//!
//! Decoding is lenient the way the store is: a missing or mistyped field
//! falls back to its zero value rather than failing the whole document, so
//! one malformed write from an old client version cannot blank a chat list.
//! Every struct derives `Serialize` so it can be handed to the UI layer
//! over IPC.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palaver_shared::{ChatId, MessageId, UserId};
use palaver_store::Snapshot;

// ---------------------------------------------------------------------------
// Delivery status
// ---------------------------------------------------------------------------

/// Status of a conversation's latest message.
///
/// Strictly monotonic state machine: `Sent → Delivered → Read`, terminal at
/// `Read`. `Sent` is assigned atomically with message creation; no
/// transition ever regresses, regardless of how calls interleave.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Sent => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Read => 2,
        }
    }

    /// Whether moving to `next` is a forward transition.
    pub fn can_advance_to(&self, next: DeliveryStatus) -> bool {
        next.rank() > self.rank()
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

/// Denormalized summary of a conversation's latest message, kept on the
/// conversation document so list screens need no message reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    pub text: String,
    pub kind: MessageKind,
    pub sender: UserId,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// Per-member shared metadata on a conversation (read cursors and the block
/// mirror). Lives under `memberMeta.{userId}` on the conversation document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberMeta {
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<MessageId>,
    pub i_blocked_peer: bool,
    pub blocked_by_other: bool,
}

/// A shared conversation document (`chats/{chatId}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ChatId,
    pub kind: ChatKind,
    pub members: Vec<UserId>,
    /// Order-independent member pair key, private chats only.
    pub pair_key: Option<String>,
    pub group_name: Option<String>,
    pub group_description: Option<String>,
    pub group_photo_url: Option<String>,
    pub admin_ids: Vec<UserId>,
    /// Members an admin muted: they stay in the group but cannot send.
    pub muted_member_ids: Vec<UserId>,
    pub last_message: Option<LastMessage>,
    pub member_meta: BTreeMap<UserId, MemberMeta>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn from_snapshot(snap: &Snapshot) -> Self {
        let kind = snap
            .get_str("type")
            .and_then(ChatKind::parse)
            .unwrap_or(ChatKind::Private);

        let last_message = match (snap.get_str("lastMessageId"), snap.get_timestamp("lastMessageTimestamp")) {
            (Some(id), Some(timestamp)) if !id.is_empty() => Some(LastMessage {
                id: MessageId::new(id),
                text: snap.get_str("lastMessageText").unwrap_or_default().to_string(),
                kind: snap
                    .get_str("lastMessageType")
                    .and_then(MessageKind::parse)
                    .unwrap_or(MessageKind::Text),
                sender: UserId::new(snap.get_str("lastMessageSenderId").unwrap_or_default()),
                timestamp,
                status: snap
                    .get_str("lastMessageStatus")
                    .and_then(DeliveryStatus::parse)
                    .unwrap_or(DeliveryStatus::Sent),
            }),
            _ => None,
        };

        let member_meta = snap
            .get_map("memberMeta")
            .map(|map| {
                map.iter()
                    .filter_map(|(uid, value)| {
                        let meta = value.as_map()?;
                        Some((
                            UserId::new(uid.clone()),
                            MemberMeta {
                                last_opened_at: meta
                                    .get("lastOpenedAt")
                                    .and_then(|v| v.as_timestamp()),
                                last_read_message_id: meta
                                    .get("lastReadMessageId")
                                    .and_then(|v| v.as_str())
                                    .filter(|s| !s.is_empty())
                                    .map(MessageId::new),
                                i_blocked_peer: meta
                                    .get("iBlockedPeer")
                                    .and_then(|v| v.as_bool())
                                    .unwrap_or(false),
                                blocked_by_other: meta
                                    .get("blockedByOther")
                                    .and_then(|v| v.as_bool())
                                    .unwrap_or(false),
                            },
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: ChatId::new(snap.id()),
            kind,
            members: snap.get_str_array("members").into_iter().map(UserId::new).collect(),
            pair_key: snap.get_str("pairKey").map(str::to_string),
            group_name: snap.get_str("groupName").map(str::to_string),
            group_description: snap.get_str("groupDescription").map(str::to_string),
            group_photo_url: snap.get_str("groupPhotoUrl").map(str::to_string),
            admin_ids: snap.get_str_array("adminIds").into_iter().map(UserId::new).collect(),
            muted_member_ids: snap
                .get_str_array("mutedMemberIds")
                .into_iter()
                .map(UserId::new)
                .collect(),
            last_message,
            member_meta,
            created_at: snap.get_timestamp("createdAt"),
            updated_at: snap.get_timestamp("updatedAt"),
        }
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admin_ids.contains(user)
    }

    /// The other member of a private conversation.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        match self.kind {
            ChatKind::Private => self.members.iter().find(|m| *m != me),
            ChatKind::Group => None,
        }
    }

    /// Shared metadata for one member, defaulted when never written.
    pub fn member_meta_for(&self, user: &UserId) -> MemberMeta {
        self.member_meta.get(user).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    File,
    Location,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::File => "file",
            MessageKind::Location => "location",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            "file" => Some(MessageKind::File),
            "location" => Some(MessageKind::Location),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A single chat message (`chats/{chatId}/messages/{messageId}`).
///
/// Immutable once created except for edit, delete-for-everyone (payload
/// cleared, never restored), and the append-only `hidden_for` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub location: Option<GeoPoint>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<i64>,
    /// Server-assigned; authoritative for ordering.
    pub created_at: Option<DateTime<Utc>>,
    /// Optimistic local time, used only until the server time is known.
    pub created_at_client: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Users who deleted this message for themselves. Append-only.
    pub hidden_for: Vec<UserId>,
}

impl Message {
    pub fn from_snapshot(snap: &Snapshot) -> Self {
        let location = snap.get_map("location").and_then(|map| {
            Some(GeoPoint {
                lat: map.get("lat")?.as_f64()?,
                lng: map.get("lng")?.as_f64()?,
            })
        });

        Self {
            id: MessageId::new(snap.id()),
            sender: UserId::new(snap.get_str("senderId").unwrap_or_default()),
            kind: snap
                .get_str("type")
                .and_then(MessageKind::parse)
                .unwrap_or(MessageKind::Text),
            text: snap.get_str("text").map(str::to_string),
            media_url: snap.get_str("mediaUrl").map(str::to_string),
            location,
            content_type: snap.get_str("contentType").map(str::to_string),
            file_name: snap.get_str("fileName").map(str::to_string),
            size_bytes: snap.get_i64("sizeBytes"),
            created_at: snap.get_timestamp("createdAt"),
            created_at_client: snap.get_timestamp("createdAtClient"),
            edited_at: snap.get_timestamp("editedAt"),
            deleted: snap.get_bool("deleted").unwrap_or(false),
            deleted_by: snap.get_str("deletedBy").map(UserId::new),
            deleted_at: snap.get_timestamp("deletedAt"),
            hidden_for: snap.get_str_array("hiddenFor").into_iter().map(UserId::new).collect(),
        }
    }

    /// Server time when known, optimistic client time until then.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.created_at_client)
    }

    pub fn is_hidden_for(&self, user: &UserId) -> bool {
        self.hidden_for.contains(user)
    }
}

/// Outgoing message payload, before the store assigns an id and server time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub kind: Option<MessageKind>,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub location: Option<GeoPoint>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<i64>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Some(MessageKind::Text),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(media_url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            kind: Some(MessageKind::Image),
            media_url: Some(media_url.into()),
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    pub fn video(media_url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            kind: Some(MessageKind::Video),
            media_url: Some(media_url.into()),
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    pub fn file(
        media_url: impl Into<String>,
        file_name: impl Into<String>,
        size_bytes: Option<i64>,
    ) -> Self {
        Self {
            kind: Some(MessageKind::File),
            media_url: Some(media_url.into()),
            file_name: Some(file_name.into()),
            size_bytes,
            ..Self::default()
        }
    }

    pub fn location(lat: f64, lng: f64) -> Self {
        Self {
            kind: Some(MessageKind::Location),
            location: Some(GeoPoint { lat, lng }),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind.unwrap_or(MessageKind::Text)
    }
}

// ---------------------------------------------------------------------------
// Per-user overlay
// ---------------------------------------------------------------------------

/// Preview of the newest message this user is entitled to see (skipping
/// deleted and hidden-for-me messages), cached on the overlay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPreview {
    pub message_id: MessageId,
    pub text: Option<String>,
    pub kind: MessageKind,
    pub sender: Option<UserId>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Private per-user conversation state (`userChats/{userId}/chats/{chatId}`).
///
/// Absence of a field is its canonical "never set" state: `archived` and
/// `mutedUntil` are removed, not set to `false`/`null`, when cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub hidden: bool,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub muted_until: Option<DateTime<Utc>>,
    /// Content with effective timestamp ≤ this is masked for this user only.
    /// Never decreases.
    pub cleared_before: Option<DateTime<Utc>>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<MessageId>,
    pub pinned: bool,
    pub preview: Option<OverlayPreview>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Overlay {
    pub fn from_snapshot(snap: &Snapshot) -> Self {
        let preview = snap
            .get_str("lastMessageId")
            .filter(|id| !id.is_empty())
            .map(|id| OverlayPreview {
                message_id: MessageId::new(id),
                text: snap.get_str("lastMessageText").map(str::to_string),
                kind: snap
                    .get_str("lastMessageType")
                    .and_then(MessageKind::parse)
                    .unwrap_or(MessageKind::Text),
                sender: snap.get_str("lastMessageSenderId").map(UserId::new),
                timestamp: snap.get_timestamp("lastMessageTimestamp"),
            });

        Self {
            hidden: snap.get_bool("hidden").unwrap_or(false),
            archived: snap.get_bool("archived").unwrap_or(false),
            archived_at: snap.get_timestamp("archivedAt"),
            muted_until: snap.get_timestamp("mutedUntil"),
            cleared_before: snap.get_timestamp("clearedBefore"),
            last_opened_at: snap.get_timestamp("lastOpenedAt"),
            last_read_message_id: snap
                .get_str("lastReadMessageId")
                .filter(|s| !s.is_empty())
                .map(MessageId::new),
            pinned: snap.get_bool("pinned").unwrap_or(false),
            preview,
            updated_at: snap.get_timestamp("updatedAt"),
        }
    }

    /// Whether notifications are muted at `now`. Works identically for timed
    /// mutes and the "forever" sentinel.
    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.map(|until| now < until).unwrap_or(false)
    }
}
