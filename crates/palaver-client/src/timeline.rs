//! Presentation-side calculations over an ordered message list.
//!
//! Both functions are pure and recomputed on every render; they persist
//! nothing and read no state beyond their arguments, which is what keeps
//! them trivially testable.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use palaver_shared::constants::{DELETE_FOR_EVERYONE_WINDOW_SECS, MESSAGE_RUN_GAP_SECS};
use palaver_shared::{MessageId, UserId};

use crate::models::Message;

/// A contiguous run of messages from one sender, used for bubble shaping
/// and avatar collapsing. `start..=end` index into the input slice.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageRun {
    pub start: usize,
    pub end: usize,
    pub sender: UserId,
}

/// Split an ordered message list into sender runs. A new run starts when
/// the sender changes or the gap since the previous message exceeds five
/// minutes. Messages without any timestamp sort as far past, matching how
/// the list itself orders them.
pub fn build_runs(messages: &[Message]) -> Vec<MessageRun> {
    let mut runs = Vec::new();
    let Some(first) = messages.first() else {
        return runs;
    };

    let gap_limit = Duration::seconds(MESSAGE_RUN_GAP_SECS);
    let millis = |m: &Message| {
        m.effective_timestamp()
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN)
    };

    let mut start = 0;
    let mut sender = first.sender.clone();
    let mut last_ms = millis(first);

    for (i, message) in messages.iter().enumerate().skip(1) {
        let current_ms = millis(message);
        let same_sender = message.sender == sender;
        let close = current_ms - last_ms <= gap_limit.num_milliseconds();
        if !(same_sender && close) {
            runs.push(MessageRun {
                start,
                end: i - 1,
                sender: sender.clone(),
            });
            start = i;
            sender = message.sender.clone();
        }
        last_ms = current_ms;
    }
    runs.push(MessageRun {
        start,
        end: messages.len() - 1,
        sender,
    });
    runs
}

/// Partition of a delete-for-everyone selection into the one bucket each
/// id belongs to. The union of the four buckets is exactly the selection.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeleteEligibility {
    pub eligible: Vec<MessageId>,
    /// Not sent by the requester (or not present in the list at all, which
    /// means ownership cannot be shown).
    pub not_mine: Vec<MessageId>,
    pub already_deleted: Vec<MessageId>,
    /// Older than the two-hour window (or missing a timestamp entirely).
    pub too_old: Vec<MessageId>,
}

/// Classify each selected message for delete-for-everyone: it must be the
/// requester's own, not already deleted, and no older than two hours.
/// Delete-for-me needs no such gate; it is unconditionally allowed.
pub fn delete_eligibility(
    messages: &[Message],
    selected: &[MessageId],
    requester: &UserId,
    now: DateTime<Utc>,
) -> DeleteEligibility {
    let window = Duration::seconds(DELETE_FOR_EVERYONE_WINDOW_SECS);
    let mut out = DeleteEligibility::default();

    for id in selected {
        let Some(message) = messages.iter().find(|m| m.id == *id) else {
            out.not_mine.push(id.clone());
            continue;
        };
        if message.sender != *requester {
            out.not_mine.push(id.clone());
        } else if message.deleted {
            out.already_deleted.push(id.clone());
        } else {
            let age = message
                .effective_timestamp()
                .map(|ts| now - ts)
                .unwrap_or(Duration::MAX);
            if age > window {
                out.too_old.push(id.clone());
            } else {
                out.eligible.push(id.clone());
            }
        }
    }
    out
}
