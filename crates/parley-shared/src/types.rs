use serde::{Deserialize, Serialize};

use crate::constants::{CONVERSATION_SEPARATOR, MAX_USER_ID_LEN};
use crate::error::IdError;

// User identity = account id issued by the directory, restricted to [A-Za-z0-9-]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdError::Empty);
        }
        let len = raw.chars().count();
        if len > MAX_USER_ID_LEN {
            return Err(IdError::TooLong {
                len,
                max: MAX_USER_ID_LEN,
            });
        }
        if let Some(bad) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
            return Err(IdError::InvalidChar(bad));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the conversation between two users.
///
/// Built from the sorted pair of participants, so the same two users always
/// map to the same id regardless of who sends first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: &UserId, b: &UserId) -> Result<Self, IdError> {
        if a == b {
            return Err(IdError::SameParticipant);
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Ok(Self(format!("{lo}{CONVERSATION_SEPARATOR}{hi}")))
    }

    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let (a, b) = raw
            .split_once(CONVERSATION_SEPARATOR)
            .ok_or_else(|| IdError::MalformedConversation(raw.to_string()))?;
        let a = UserId::new(a).map_err(|_| IdError::MalformedConversation(raw.to_string()))?;
        let b = UserId::new(b).map_err(|_| IdError::MalformedConversation(raw.to_string()))?;
        let id = Self::between(&a, &b)?;
        // Reject unsorted spellings so every pair has a single textual form.
        if id.0 != raw {
            return Err(IdError::MalformedConversation(raw.to_string()));
        }
        Ok(id)
    }

    /// The two participants, in canonical (sorted) order.
    pub fn participants(&self) -> (UserId, UserId) {
        let (a, b) = self
            .0
            .split_once(CONVERSATION_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""));
        (UserId(a.to_string()), UserId(b.to_string()))
    }

    pub fn includes(&self, user: &UserId) -> bool {
        let (a, b) = self.participants();
        &a == user || &b == user
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConversationId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Document,
    Audio,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }

    /// Upload category backing this kind, `None` for plain text.
    pub fn category(&self) -> Option<UploadCategory> {
        match self {
            Self::Text => None,
            Self::Image => Some(UploadCategory::Pictures),
            Self::Video => Some(UploadCategory::Videos),
            Self::Document => Some(UploadCategory::Documents),
            Self::Audio => Some(UploadCategory::Voice),
        }
    }

    pub fn has_attachment(&self) -> bool {
        self.category().is_some()
    }
}

impl std::str::FromStr for MessageKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            other => Err(IdError::UnknownKind(other.to_string())),
        }
    }
}

/// The four quota-tracked upload categories. Each also names the
/// attachment sub-directory of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadCategory {
    Pictures,
    Videos,
    Documents,
    Voice,
}

impl UploadCategory {
    pub const ALL: [UploadCategory; 4] = [
        Self::Pictures,
        Self::Videos,
        Self::Documents,
        Self::Voice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pictures => "pictures",
            Self::Videos => "videos",
            Self::Documents => "documents",
            Self::Voice => "voice",
        }
    }
}

impl std::str::FromStr for UploadCategory {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pictures" => Ok(Self::Pictures),
            "videos" => Ok(Self::Videos),
            "documents" => Ok(Self::Documents),
            "voice" => Ok(Self::Voice),
            other => Err(IdError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    /// Roles that bypass upload quotas and tier gating.
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Owner)
    }
}

impl std::str::FromStr for Role {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(IdError::UnknownRole(other.to_string())),
        }
    }
}

/// Account facts supplied by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub role: Role,
    /// Purchased service level. 0 means the account is still pending approval.
    pub tier: u8,
}

impl UserProfile {
    pub fn is_approved(&self) -> bool {
        self.tier >= 1 || self.role.is_unrestricted()
    }
}
