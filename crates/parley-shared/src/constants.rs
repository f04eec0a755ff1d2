/// Maximum length of a user id in characters
pub const MAX_USER_ID_LEN: usize = 64;

/// Separator between the two participants of a conversation id
pub const CONVERSATION_SEPARATOR: char = '_';

/// Messages older than this are evicted from a conversation log (hours)
pub const RETENTION_HOURS: i64 = 48;

/// Maximum number of messages retained per conversation
pub const MAX_MESSAGES_PER_CONVERSATION: usize = 250;

/// Maximum text message length in characters
pub const MAX_TEXT_LENGTH: usize = 4000;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 50 * 1024 * 1024;

/// Minimum gap between two admitted text messages (seconds)
pub const MIN_MESSAGE_GAP_SECS: i64 = 2;

/// Sliding window used to detect bursts (seconds)
pub const BURST_WINDOW_SECS: i64 = 30;

/// Number of messages inside the window that triggers a warning
pub const BURST_THRESHOLD: usize = 5;

/// Warnings within one reset cycle that trigger a mute
pub const WARNINGS_BEFORE_MUTE: usize = 3;

/// Quiet period after which warnings and escalation decay (seconds)
pub const WARNING_RESET_SECS: i64 = 5 * 60;

/// Mute applied for escalation levels 0 and 1 (seconds)
pub const SHORT_MUTE_SECS: i64 = 60;

/// Mute applied from escalation level 2 onwards (seconds)
pub const LONG_MUTE_SECS: i64 = 60 * 60;

/// Cooldown between pictures, videos or documents (seconds)
pub const MEDIA_COOLDOWN_SECS: i64 = 30;

/// Cooldown between voice notes (seconds)
pub const VOICE_COOLDOWN_SECS: i64 = 3;

/// Trailing window for daily upload caps (hours)
pub const QUOTA_WINDOW_HOURS: i64 = 24;

/// Default background sweep cadence (seconds)
pub const MAINTENANCE_INTERVAL_SECS: u64 = 30 * 60;
