//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the transport layer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_shared::{ConversationId, IdError, MessageKind, UploadCategory, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The durable record of a conversation between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
///
/// For attachment kinds `content` is the stored file name inside the
/// conversation's category directory; for text it is the message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message with a fresh id, stamped now.
    pub fn new(sender_id: UserId, receiver_id: UserId, kind: MessageKind, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            kind,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn conversation_id(&self) -> Result<ConversationId, IdError> {
        ConversationId::between(&self.sender_id, &self.receiver_id)
    }
}

// ---------------------------------------------------------------------------
// Mute
// ---------------------------------------------------------------------------

/// An active (or not yet purged) mute for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MuteRecord {
    pub user_id: UserId,
    pub mute_end: DateTime<Utc>,
    pub reason: String,
    /// Escalation level at the time the mute was issued (0 for admin mutes).
    pub escalation_level: u32,
    /// Whether the mute was imposed by an administrator.
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl MuteRecord {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.mute_end > now
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.mute_end - now).max(Duration::zero())
    }
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// Upload history of one category for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaUsage {
    /// Uploads counted against the daily cap, oldest first.
    pub daily_uploads: Vec<DateTime<Utc>>,
    /// Last upload of this category; drives the cooldown and survives the
    /// daily reset.
    pub last_upload_at: Option<DateTime<Utc>>,
}

/// Per-user quota ledger entry covering the four upload categories.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaRecord {
    pub pictures: QuotaUsage,
    pub videos: QuotaUsage,
    pub documents: QuotaUsage,
    pub voice: QuotaUsage,
}

impl QuotaRecord {
    pub fn usage(&self, category: UploadCategory) -> &QuotaUsage {
        match category {
            UploadCategory::Pictures => &self.pictures,
            UploadCategory::Videos => &self.videos,
            UploadCategory::Documents => &self.documents,
            UploadCategory::Voice => &self.voice,
        }
    }

    pub fn usage_mut(&mut self, category: UploadCategory) -> &mut QuotaUsage {
        match category {
            UploadCategory::Pictures => &mut self.pictures,
            UploadCategory::Videos => &mut self.videos,
            UploadCategory::Documents => &mut self.documents,
            UploadCategory::Voice => &mut self.voice,
        }
    }
}
