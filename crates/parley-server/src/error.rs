use chrono::Duration;
use thiserror::Error;

use parley_shared::{IdError, UploadCategory};
use parley_store::StoreError;

/// Why an inbound message or upload was refused.  The `Display` text is the
/// human-readable reason surfaced to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("You are sending messages too fast, slow down")]
    TooFast,

    #[error("You have been muted for {} for sending too many messages", format_duration(.duration))]
    SpamMuted { duration: Duration },

    #[error("You are muted for another {}: {reason}", format_duration(.remaining))]
    Muted { remaining: Duration, reason: String },

    #[error("Please wait {} before uploading more {category}", format_duration(.remaining))]
    Cooldown {
        category: UploadCategory,
        remaining: Duration,
    },

    #[error("Daily limit of {limit} {category} reached")]
    DailyLimit { category: UploadCategory, limit: u32 },

    #[error("Your account is pending approval")]
    PendingApproval,

    #[error("You can only message your friends")]
    NotFriends,

    #[error("This conversation is blocked")]
    Blocked,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    AdmissionDenied(#[from] Denial),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Message safe to show to the caller.  Storage and internal details are
    /// logged, never surfaced.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Storage(_) => "Storage error".to_string(),
            ServiceError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Store operation failed");
        ServiceError::Storage(err.to_string())
    }
}

impl From<IdError> for ServiceError {
    fn from(err: IdError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

/// Render a duration the way users read it ("1 minute", "2 hours", "45 seconds").
pub fn format_duration(duration: &Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let (value, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::minutes(1)), "1 minute");
        assert_eq!(format_duration(&Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(&Duration::seconds(90)), "90 seconds");
        assert_eq!(format_duration(&Duration::seconds(-5)), "0 seconds");
    }

    #[test]
    fn test_denial_reasons_are_readable() {
        let muted = Denial::SpamMuted {
            duration: Duration::hours(1),
        };
        assert_eq!(
            muted.to_string(),
            "You have been muted for 1 hour for sending too many messages"
        );
        let limit = Denial::DailyLimit {
            category: UploadCategory::Pictures,
            limit: 5,
        };
        assert_eq!(limit.to_string(), "Daily limit of 5 pictures reached");
    }

    #[test]
    fn test_storage_details_hidden() {
        let err = ServiceError::Storage("disk on fire at /var/lib".into());
        assert_eq!(err.public_message(), "Storage error");
        let denied = ServiceError::from(Denial::TooFast);
        assert_eq!(denied.public_message(), Denial::TooFast.to_string());
    }
}
