use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("User id is empty")]
    Empty,

    #[error("User id too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("User id contains invalid character {0:?}")]
    InvalidChar(char),

    #[error("A conversation needs two distinct participants")]
    SameParticipant,

    #[error("Malformed conversation id: {0}")]
    MalformedConversation(String),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}
