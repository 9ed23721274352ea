//! Pure projection of (conversation, overlay) into list-row view models.
//!
//! Everything here is a side-effect-free function of its inputs and is
//! recomputed on every store notification; nothing it produces is ever
//! written back. Unread is a boolean, not a count: the badge model
//! collapses "some unseen traffic" into one bit.

use chrono::{DateTime, Utc};
use serde::Serialize;

use palaver_shared::{ChatId, UserId};

use crate::models::{
    ChatKind, Conversation, DeliveryStatus, MessageKind, Overlay,
};

/// Which list a conversation row belongs to for this viewer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListPlacement {
    Home,
    Archived,
    /// Not shown at all (hidden, with no traffic newer than the hide).
    Hidden,
}

/// One row of the conversation list, fully resolved for display.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    pub chat_id: ChatId,
    pub kind: ChatKind,
    pub group_name: Option<String>,
    pub group_photo_url: Option<String>,
    /// The other member of a private chat; the UI resolves the profile.
    pub counterpart: Option<UserId>,
    pub preview_text: Option<String>,
    pub preview_kind: Option<MessageKind>,
    pub preview_sender: Option<UserId>,
    pub preview_timestamp: Option<DateTime<Utc>>,
    /// Delivery ticks; only meaningful while the displayed message is the
    /// conversation's latest.
    pub preview_status: Option<DeliveryStatus>,
    pub unread: bool,
    pub muted: bool,
    pub pinned: bool,
    pub i_blocked_peer: bool,
    pub blocked_by_other: bool,
    pub placement: ListPlacement,
    /// Timestamp the lists sort by (latest message, else creation time).
    pub sort_key: Option<DateTime<Utc>>,
}

/// Project one conversation through one viewer's overlay.
pub fn project(
    convo: &Conversation,
    overlay: &Overlay,
    viewer: &UserId,
    now: DateTime<Utc>,
) -> ConversationRow {
    // Display source: the overlay's cached preview is the newest message
    // this viewer is entitled to see (it skips deleted / hidden-for-me);
    // without one, the shared summary stands in.
    let (mut text, mut kind, mut sender, mut timestamp, mut status) = match &overlay.preview {
        Some(preview) => {
            let shares_latest = convo
                .last_message
                .as_ref()
                .map(|last| last.id == preview.message_id)
                .unwrap_or(false);
            (
                preview.text.clone(),
                Some(preview.kind),
                preview.sender.clone(),
                preview.timestamp,
                convo
                    .last_message
                    .as_ref()
                    .filter(|_| shares_latest)
                    .map(|last| last.status),
            )
        }
        None => match &convo.last_message {
            Some(last) => (
                Some(last.text.clone()),
                Some(last.kind),
                Some(last.sender.clone()),
                Some(last.timestamp),
                Some(last.status),
            ),
            None => (None, None, None, None, None),
        },
    };

    // Masking: content at or before the clear mark vanishes from this
    // viewer's row (boundary inclusive). The data itself is untouched.
    if let (Some(cleared), Some(ts)) = (overlay.cleared_before, timestamp) {
        if ts <= cleared {
            text = None;
            kind = None;
            sender = None;
            timestamp = None;
            status = None;
        }
    }

    // Unread is computed from the shared summary, not the masked view: a
    // boolean, by design.
    let unread = match &convo.last_message {
        Some(last) => {
            last.sender != *viewer
                && overlay
                    .last_read_message_id
                    .as_ref()
                    .map(|read| *read != last.id)
                    .unwrap_or(true)
        }
        None => false,
    };

    // Resilience rule: traffic newer than the last overlay action
    // unconditionally resurfaces a hidden or archived chat. A user's
    // archive/delete must never permanently bury a conversation that is
    // still alive.
    let last_ts = convo.last_message.as_ref().map(|last| last.timestamp);
    let resurfaced = match (last_ts, overlay.updated_at) {
        (Some(last), Some(acted)) => last > acted,
        // Overlay flags without an action timestamp cannot prove they are
        // newer than the traffic; err toward surfacing.
        (Some(_), None) => true,
        (None, _) => false,
    };
    let hidden = overlay.hidden && !resurfaced;
    let archived = overlay.archived && !resurfaced;
    let placement = if hidden {
        ListPlacement::Hidden
    } else if archived {
        ListPlacement::Archived
    } else {
        ListPlacement::Home
    };

    let meta = convo.member_meta_for(viewer);

    ConversationRow {
        chat_id: convo.id.clone(),
        kind: convo.kind,
        group_name: convo.group_name.clone(),
        group_photo_url: convo.group_photo_url.clone(),
        counterpart: convo.peer_of(viewer).cloned(),
        preview_text: text,
        preview_kind: kind,
        preview_sender: sender,
        preview_timestamp: timestamp,
        preview_status: status,
        unread,
        muted: overlay.is_muted(now),
        pinned: overlay.pinned,
        i_blocked_peer: meta.i_blocked_peer,
        blocked_by_other: meta.blocked_by_other,
        placement,
        sort_key: last_ts.or(convo.created_at),
    }
}

/// The two conversation lists plus the aggregate badge count.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatListView {
    pub home: Vec<ConversationRow>,
    pub archived: Vec<ConversationRow>,
    /// Number of home-list conversations with unseen traffic (not a
    /// message count).
    pub unread_conversations: usize,
}

/// Project a set of conversations against the viewer's overlays into the
/// home and archived lists, both newest-first.
pub fn project_chat_list<'a, I>(
    conversations: I,
    overlay_for: impl Fn(&ChatId) -> Overlay,
    viewer: &UserId,
    now: DateTime<Utc>,
) -> ChatListView
where
    I: IntoIterator<Item = &'a Conversation>,
{
    let mut home = Vec::new();
    let mut archived = Vec::new();

    for convo in conversations {
        let overlay = overlay_for(&convo.id);
        let row = project(convo, &overlay, viewer, now);
        match row.placement {
            ListPlacement::Home => home.push(row),
            ListPlacement::Archived => archived.push(row),
            ListPlacement::Hidden => {}
        }
    }

    // Newest first; rows without any timestamp sink to the bottom.
    home.sort_by(|a, b| b.sort_key.cmp(&a.sort_key));
    archived.sort_by(|a, b| b.sort_key.cmp(&a.sort_key));

    let unread_conversations = home.iter().filter(|row| row.unread).count();

    ChatListView {
        home,
        archived,
        unread_conversations,
    }
}
