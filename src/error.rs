use serde::{ Deserialize, Serialize };
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Broad classes used to decide whether an error is surfaced, retried or reconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Transient,
    Validation,
    Channel,
    Internal,
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("user {user_id} is not a member of group {group_id}")] NotAMember {
        user_id: String,
        group_id: String,
    },
    #[error("user {0} is not a participant of this conversation")] NotAParticipant(String),
    #[error("invalid or expired session: {0}")] Unauthenticated(String),
    #[error("message store unavailable: {0}")] StoreUnavailable(String),
    #[error("push channel disconnected: {0}")] ChannelDisconnected(String),
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("message content exceeds {max} characters")] ContentTooLong {
        max: usize,
    },
    #[error("invalid conversation target: {0}")] InvalidTarget(String),
    #[error("invalid pagination cursor: {0}")] InvalidCursor(String),
    #[error("unknown user: {0}")] UnknownUser(String),
    #[error("unknown group: {0}")] UnknownGroup(String),
    #[error("serialization error: {0}")] Serialization(#[from] serde_json::Error),
    #[error("internal error: {0}")] Internal(String),
}

impl MessagingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MessagingError::NotAMember { .. }
            | MessagingError::NotAParticipant(_)
            | MessagingError::Unauthenticated(_) => ErrorKind::Authorization,
            MessagingError::StoreUnavailable(_) => ErrorKind::Transient,
            MessagingError::ChannelDisconnected(_) => ErrorKind::Channel,
            MessagingError::EmptyContent
            | MessagingError::ContentTooLong { .. }
            | MessagingError::InvalidTarget(_)
            | MessagingError::InvalidCursor(_)
            | MessagingError::UnknownUser(_)
            | MessagingError::UnknownGroup(_) => ErrorKind::Validation,
            MessagingError::Serialization(_) | MessagingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient store failures may be re-attempted by the caller.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn code(&self) -> &'static str {
        match self {
            MessagingError::NotAMember { .. } => "not_a_member",
            MessagingError::NotAParticipant(_) => "not_a_participant",
            MessagingError::Unauthenticated(_) => "unauthenticated",
            MessagingError::StoreUnavailable(_) => "store_unavailable",
            MessagingError::ChannelDisconnected(_) => "channel_disconnected",
            MessagingError::EmptyContent => "empty_content",
            MessagingError::ContentTooLong { .. } => "content_too_long",
            MessagingError::InvalidTarget(_) => "invalid_target",
            MessagingError::InvalidCursor(_) => "invalid_cursor",
            MessagingError::UnknownUser(_) => "unknown_user",
            MessagingError::UnknownGroup(_) => "unknown_group",
            MessagingError::Serialization(_) => "serialization_error",
            MessagingError::Internal(_) => "internal_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            MessagingError::NotAMember { user_id, group_id } =>
                Some(serde_json::json!({ "user_id": user_id, "group_id": group_id })),
            MessagingError::NotAParticipant(id)
            | MessagingError::UnknownUser(id)
            | MessagingError::UnknownGroup(id) => Some(serde_json::json!({ "id": id })),
            MessagingError::ContentTooLong { max } => Some(serde_json::json!({ "max": max })),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for MessagingError {
    fn from(err: redis::RedisError) -> Self {
        MessagingError::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for MessagingError {
    fn from(err: reqwest::Error) -> Self {
        MessagingError::StoreUnavailable(err.to_string())
    }
}

/// Error payload shared by the HTTP API and the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    fn detail(&self, key: &str) -> String {
        self.details
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn into_error(self) -> MessagingError {
        match self.code.as_str() {
            "not_a_member" =>
                MessagingError::NotAMember {
                    user_id: self.detail("user_id"),
                    group_id: self.detail("group_id"),
                },
            "not_a_participant" => MessagingError::NotAParticipant(self.detail("id")),
            "unauthenticated" => MessagingError::Unauthenticated(self.message),
            "store_unavailable" => MessagingError::StoreUnavailable(self.message),
            "empty_content" => MessagingError::EmptyContent,
            "content_too_long" => {
                let max = self.details
                    .as_ref()
                    .and_then(|d| d.get("max"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or_default() as usize;
                MessagingError::ContentTooLong { max }
            }
            "invalid_target" => MessagingError::InvalidTarget(self.message),
            "invalid_cursor" => MessagingError::InvalidCursor(self.message),
            "unknown_user" => MessagingError::UnknownUser(self.detail("id")),
            "unknown_group" => MessagingError::UnknownGroup(self.detail("id")),
            _ => MessagingError::Internal(self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_the_only_retryable_ones() {
        assert!(MessagingError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!MessagingError::EmptyContent.is_retryable());
        assert!(
            !(MessagingError::NotAMember {
                user_id: "u1".into(),
                group_id: "g1".into(),
            }).is_retryable()
        );
        assert_eq!(
            MessagingError::ChannelDisconnected("eof".into()).kind(),
            ErrorKind::Channel
        );
    }

    #[test]
    fn error_body_maps_back_to_the_same_variant() {
        let err = MessagingError::NotAMember { user_id: "u1".into(), group_id: "g9".into() };
        match err.to_body().into_error() {
            MessagingError::NotAMember { user_id, group_id } => {
                assert_eq!(user_id, "u1");
                assert_eq!(group_id, "g9");
            }
            other => panic!("unexpected variant: {:?}", other),
        }

        let body = MessagingError::ContentTooLong { max: 4000 }.to_body();
        assert!(matches!(body.into_error(), MessagingError::ContentTooLong { max: 4000 }));
    }

    #[test]
    fn unknown_codes_become_internal_errors() {
        let body = ErrorBody {
            code: "teapot".into(),
            message: "short and stout".into(),
            details: None,
        };
        assert_eq!(body.into_error().kind(), ErrorKind::Internal);
    }
}
