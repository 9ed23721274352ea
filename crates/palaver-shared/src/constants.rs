use chrono::{DateTime, TimeZone, Utc};

/// Gap between two messages from the same sender that still reads as one
/// run of bubbles (5 minutes).
pub const MESSAGE_RUN_GAP_SECS: i64 = 5 * 60;

/// How long after sending a message "delete for everyone" stays available.
pub const DELETE_FOR_EVERYONE_WINDOW_SECS: i64 = 2 * 60 * 60;

/// Maximum length of the text preview cached on a conversation row.
pub const PREVIEW_TEXT_MAX_CHARS: usize = 500;

/// Preview label shown for image messages.
pub const PREVIEW_LABEL_PHOTO: &str = "Photo";

/// Preview label shown for video messages.
pub const PREVIEW_LABEL_VIDEO: &str = "Video";

/// Preview label shown for location messages.
pub const PREVIEW_LABEL_LOCATION: &str = "Location";

/// Fallback preview label for file messages without a file name.
pub const PREVIEW_LABEL_FILE: &str = "File";

/// Preview text left behind when the latest message is deleted for everyone.
pub const PREVIEW_TOMBSTONE: &str = "Message deleted";

/// Default number of conversations promoted per delivery sweep.
pub const DEFAULT_SWEEP_BATCH: usize = 25;

/// Default delivery sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default page size for live message streams.
pub const DEFAULT_MESSAGE_PAGE_SIZE: usize = 50;

/// Sentinel for "muted forever".
///
/// A mute is a single `mutedUntil` timestamp so the check is always
/// `now < mutedUntil`; "forever" is just a timestamp no running client will
/// ever reach. Kept well clear of any real expiry a user can pick.
pub fn mute_forever() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0)
        .single()
        .expect("valid sentinel timestamp")
}
