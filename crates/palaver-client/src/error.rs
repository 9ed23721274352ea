use palaver_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the chat engine.
///
/// Policy rejections carry a stable, user-presentable reason; the UI maps
/// them to specific banners/toasts. Store errors bubble up only from
/// operations that are not best-effort (best-effort paths log and swallow).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Conversation not found: {0}")]
    ChatNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("You are not a member of this conversation")]
    NotAMember,

    #[error("Only a group admin can do that")]
    AdminRequired,

    #[error("This is not a group conversation")]
    NotAGroup,

    #[error("You blocked this user")]
    BlockedPeer,

    #[error("You can no longer message this user")]
    BlockedByPeer,

    #[error("An admin muted you in this group")]
    MutedInGroup,

    #[error("Message text must not be empty")]
    EmptyMessage,

    #[error("You cannot open a chat with yourself")]
    SelfChat,

    #[error("Only the sender can modify a message")]
    NotMessageSender,

    #[error("Group name must not be blank")]
    BlankGroupName,
}

impl ClientError {
    /// True for errors a user caused and can act on (as opposed to
    /// transient infrastructure failures).
    pub fn is_policy_rejection(&self) -> bool {
        !matches!(self, ClientError::Store(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
