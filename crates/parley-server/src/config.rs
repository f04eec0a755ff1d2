//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the service can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;

use parley_shared::constants::{
    MAINTENANCE_INTERVAL_SECS, MAX_ATTACHMENT_SIZE, MAX_MESSAGES_PER_CONVERSATION,
    MEDIA_COOLDOWN_SECS, RETENTION_HOURS, VOICE_COOLDOWN_SECS,
};
use parley_shared::UploadCategory;

// Upper bounds for time settings read from the environment.  Anything larger
// is treated as a typo and falls back to the default.
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;
const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Daily upload caps for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub pictures: u32,
    pub videos: u32,
    pub documents: u32,
    pub voice: u32,
}

impl TierLimits {
    pub fn for_category(&self, category: UploadCategory) -> u32 {
        match category {
            UploadCategory::Pictures => self.pictures,
            UploadCategory::Videos => self.videos,
            UploadCategory::Documents => self.documents,
            UploadCategory::Voice => self.voice,
        }
    }
}

/// Upload quota policy.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Cooldown shared by pictures, videos and documents.
    pub media_cooldown: Duration,
    /// Cooldown between voice notes.
    pub voice_cooldown: Duration,
    /// Caps for tier 1, 2, 3, ...  Tiers above the last entry use the last
    /// entry.
    pub tiers: Vec<TierLimits>,
}

impl QuotaConfig {
    pub fn cooldown(&self, category: UploadCategory) -> Duration {
        match category {
            UploadCategory::Voice => self.voice_cooldown,
            _ => self.media_cooldown,
        }
    }

    /// Caps for an approved tier (>= 1).  Returns `None` for tier 0.
    pub fn limits(&self, tier: u8) -> Option<TierLimits> {
        if tier == 0 {
            return None;
        }
        let idx = usize::from(tier - 1).min(self.tiers.len().saturating_sub(1));
        self.tiers.get(idx).copied()
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            media_cooldown: Duration::seconds(MEDIA_COOLDOWN_SECS),
            voice_cooldown: Duration::seconds(VOICE_COOLDOWN_SECS),
            tiers: vec![
                TierLimits {
                    pictures: 5,
                    videos: 2,
                    documents: 3,
                    voice: 20,
                },
                TierLimits {
                    pictures: 20,
                    videos: 8,
                    documents: 10,
                    voice: 60,
                },
                TierLimits {
                    pictures: 50,
                    videos: 20,
                    documents: 25,
                    voice: 150,
                },
            ],
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// SQLite database holding conversations, mutes and quotas.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/parley.db`
    pub database_path: PathBuf,

    /// Root of the attachment tree (`<root>/<conversation>/<category>/<file>`).
    /// Env: `ATTACHMENT_PATH`
    /// Default: `./data/attachments`
    pub attachment_path: PathBuf,

    /// Cadence of the background maintenance sweep.
    /// Env: `MAINTENANCE_INTERVAL_SECS`
    /// Default: 1800
    pub maintenance_interval: StdDuration,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_ATTACHMENT_SIZE`
    /// Default: 50 MiB
    pub max_attachment_size: usize,

    /// Messages older than this are evicted.
    /// Env: `RETENTION_HOURS`
    /// Default: 48
    pub retention: Duration,

    /// Maximum messages kept per conversation.
    /// Env: `MAX_MESSAGES_PER_CONVERSATION`
    /// Default: 250
    pub max_messages: usize,

    /// Upload quota policy.  Cooldowns read `MEDIA_COOLDOWN_SECS` and
    /// `VOICE_COOLDOWN_SECS`; tier caps are built in.
    pub quota: QuotaConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/parley.db"),
            attachment_path: PathBuf::from("./data/attachments"),
            maintenance_interval: StdDuration::from_secs(MAINTENANCE_INTERVAL_SECS),
            max_attachment_size: MAX_ATTACHMENT_SIZE,
            retention: Duration::hours(RETENTION_HOURS),
            max_messages: MAX_MESSAGES_PER_CONVERSATION,
            quota: QuotaConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("ATTACHMENT_PATH") {
            config.attachment_path = PathBuf::from(path);
        }

        if let Some(secs) = parse_bounded("MAINTENANCE_INTERVAL_SECS", MAX_INTERVAL_SECS) {
            config.maintenance_interval = StdDuration::from_secs(secs);
        }

        if let Some(bytes) = parse_bounded("MAX_ATTACHMENT_SIZE", usize::MAX as u64) {
            config.max_attachment_size = bytes as usize;
        }

        if let Some(hours) = parse_bounded("RETENTION_HOURS", MAX_RETENTION_HOURS) {
            config.retention = Duration::hours(hours as i64);
        }

        if let Some(max) = parse_bounded("MAX_MESSAGES_PER_CONVERSATION", usize::MAX as u64) {
            config.max_messages = max as usize;
        }

        if let Some(secs) = parse_bounded("MEDIA_COOLDOWN_SECS", MAX_COOLDOWN_SECS) {
            config.quota.media_cooldown = Duration::seconds(secs as i64);
        }

        if let Some(secs) = parse_bounded("VOICE_COOLDOWN_SECS", MAX_COOLDOWN_SECS) {
            config.quota.voice_cooldown = Duration::seconds(secs as i64);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Read an integer in `1..=max` from the environment.  Unset variables
/// yield `None`; invalid ones are logged and ignored.
fn parse_bounded(var: &str, max: u64) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match parse_bounded_value(&raw, max) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(var, value = %raw, error = %e, "Invalid value, using default");
            None
        }
    }
}

fn parse_bounded_value(raw: &str, max: u64) -> Result<u64, String> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("not a number: {e}"))?;
    if value == 0 {
        return Err("must be greater than zero".to_string());
    }
    if value > max {
        return Err(format!("must be at most {max}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.retention, Duration::hours(48));
        assert_eq!(config.max_messages, 250);
        assert_eq!(config.maintenance_interval, StdDuration::from_secs(1800));
    }

    #[test]
    fn test_parse_bounded_value() {
        assert_eq!(parse_bounded_value(" 30 ", 100), Ok(30));
        assert_eq!(parse_bounded_value("100", 100), Ok(100));
        assert!(parse_bounded_value("0", 100).is_err());
        assert!(parse_bounded_value("-1", 100).is_err());
        assert!(parse_bounded_value("soon", 100).is_err());
        assert!(parse_bounded_value("101", 100).is_err());
    }

    #[test]
    fn test_time_bounds_convert_without_overflow() {
        let retention = Duration::hours(MAX_RETENTION_HOURS as i64);
        let _ = chrono::Utc::now() - retention;
        let huge = u64::MAX.to_string();
        assert!(parse_bounded_value(&huge, MAX_RETENTION_HOURS).is_err());
        assert!(parse_bounded_value(&huge, MAX_COOLDOWN_SECS).is_err());
        assert!(parse_bounded_value(&huge, MAX_INTERVAL_SECS).is_err());
    }

    #[test]
    fn test_tier_limits() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.limits(0), None);
        assert_eq!(quota.limits(1).unwrap().pictures, 5);
        assert_eq!(quota.limits(9), quota.limits(3));
        assert!(quota.cooldown(UploadCategory::Voice) < quota.cooldown(UploadCategory::Videos));
        assert_eq!(
            quota.cooldown(UploadCategory::Pictures),
            quota.cooldown(UploadCategory::Documents)
        );
    }
}
