use serde::Serialize;

/// Recoverable command failures. Surfaced to the originating connection only;
/// none of them leave the meeting partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeetingError {
    #[error("display name is already taken")]
    NameTaken,
    #[error("session is invalid or has expired")]
    InvalidResumeToken,
    #[error("display name must not be empty")]
    InvalidDisplayName,
    #[error("connection has already joined")]
    AlreadyJoined,
    #[error("no eligible voters are present, the vote cannot start")]
    NoEligibleVoters,
    #[error("you are not allowed to perform this action")]
    Unauthorized,
    #[error("join the meeting first")]
    NotAuthenticated,
}

impl MeetingError {
    /// Stable wire identifier for the `error` event's `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NameTaken => "NameTaken",
            Self::InvalidResumeToken => "InvalidResumeToken",
            Self::InvalidDisplayName => "InvalidDisplayName",
            Self::AlreadyJoined => "AlreadyJoined",
            Self::NoEligibleVoters => "NoEligibleVoters",
            Self::Unauthorized => "Unauthorized",
            Self::NotAuthenticated => "NotAuthenticated",
        }
    }

    /// Join failures terminate the connection once the error has been delivered.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::NameTaken | Self::InvalidResumeToken | Self::InvalidDisplayName
        )
    }
}

/// Payload of the outbound `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&MeetingError> for ErrorPayload {
    fn from(err: &MeetingError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
