//! Unified client error model and mapping helpers.
//! A single error enum is shared by the session manager, the remote actor
//! transport, the query cache and the CLI, along with helpers that map remote
//! HTTP replies back onto it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Auth { code: String, message: String },
    Transport { code: String, message: String },
    Rejected { code: String, message: String },
    Decode { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Transport { code, .. }
            | AppError::Rejected { code, .. }
            | AppError::Decode { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Transport { message, .. }
            | AppError::Rejected { message, .. }
            | AppError::Decode { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn transport<S: Into<String>>(code: S, msg: S) -> Self { AppError::Transport { code: code.into(), message: msg.into() } }
    pub fn rejected<S: Into<String>>(code: S, msg: S) -> Self { AppError::Rejected { code: code.into(), message: msg.into() } }
    pub fn decode<S: Into<String>>(code: S, msg: S) -> Self { AppError::Decode { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Handle absent or channel down. Reads degrade to "not ready" on these.
    pub fn is_transport(&self) -> bool { matches!(self, AppError::Transport { .. }) }

    /// The remote refused a call because it was made through an anonymous handle.
    pub fn is_caller_identity_required(&self) -> bool {
        match self {
            AppError::Auth { code, .. } => code == "caller_identity_required",
            AppError::Rejected { message, .. } => message.to_ascii_lowercase().contains("anonymous"),
            _ => false,
        }
    }

    /// A paper submission refused over its citations. Display-side only.
    pub fn is_citation_error(&self) -> bool {
        let m = self.message();
        m.contains("must review") || m.contains("does not exist")
    }

    /// Map a non-success remote reply (status + body text) onto the taxonomy.
    /// The body is kept verbatim as the message so callers can display it.
    pub fn from_remote_status(status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() { format!("HTTP {}", status) } else { body.trim().to_string() };
        match status {
            400 | 409 | 422 => AppError::rejected("remote_rejected".to_string(), message),
            401 | 403 => AppError::auth("caller_identity_required".to_string(), message),
            404 => AppError::not_found("not_found".to_string(), message),
            500..=599 => AppError::transport("remote_unavailable".to_string(), message),
            _ => AppError::internal("unexpected_status".to_string(), message),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::Decode { code: "decode_error".into(), message: err.to_string() };
        }
        AppError::Transport { code: "network_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode { code: "decode_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_status_mapping() {
        assert!(matches!(AppError::from_remote_status(400, "bad"), AppError::Rejected { .. }));
        assert!(matches!(AppError::from_remote_status(422, "x"), AppError::Rejected { .. }));
        assert!(matches!(AppError::from_remote_status(401, ""), AppError::Auth { .. }));
        assert!(matches!(AppError::from_remote_status(404, "gone"), AppError::NotFound { .. }));
        assert!(matches!(AppError::from_remote_status(503, ""), AppError::Transport { .. }));
        assert!(matches!(AppError::from_remote_status(302, ""), AppError::Internal { .. }));
    }

    #[test]
    fn remote_body_is_kept_verbatim() {
        let e = AppError::from_remote_status(400, "  must review paper before citing it ");
        assert_eq!(e.message(), "must review paper before citing it");
        let e = AppError::from_remote_status(500, "");
        assert_eq!(e.message(), "HTTP 500");
    }

    #[test]
    fn citation_errors_are_recognised() {
        assert!(AppError::rejected("remote_rejected", "must review paper before citing it: p1").is_citation_error());
        assert!(AppError::rejected("remote_rejected", "cited paper p9 does not exist").is_citation_error());
        assert!(!AppError::rejected("remote_rejected", "rating must be between 1 and 5").is_citation_error());
    }

    #[test]
    fn caller_identity_required_detection() {
        assert!(AppError::from_remote_status(401, "nope").is_caller_identity_required());
        assert!(AppError::rejected("remote_rejected", "Unauthorized: anonymous callers cannot submit papers").is_caller_identity_required());
        // signed in but lacking the role is a different refusal
        assert!(!AppError::rejected("remote_rejected", "Unauthorized: only admins can assign user roles").is_caller_identity_required());
        assert!(!AppError::rejected("remote_rejected", "must review paper before citing it").is_caller_identity_required());
        assert!(!AppError::transport("network_error", "refused").is_caller_identity_required());
    }

    #[test]
    fn display_includes_code_and_message() {
        let e = AppError::transport("actor_unavailable", "Actor not available");
        assert_eq!(e.to_string(), "actor_unavailable: Actor not available");
    }
}
