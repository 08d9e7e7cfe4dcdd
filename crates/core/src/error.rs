// Error taxonomy shared by every transport

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error kinds exposed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    CursorError,
    Unauthorized,
    RateLimited,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::CursorError => "CursorError",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single dispatched invocation.
///
/// Messages are short and fixed; nothing produced by a handler's internals
/// ever ends up in one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{message}")]
    NotFound { message: String },

    #[error("{field} {reason}")]
    Validation { field: String, reason: String },

    #[error("{0}")]
    Cursor(#[from] crate::cursor::CursorError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Tool execution timed out")]
    Timeout,

    #[error("Internal error")]
    Internal,
}

impl DispatchError {
    pub fn unknown_tool() -> Self {
        Self::NotFound {
            message: "Unknown tool".to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Cursor(_) => ErrorKind::CursorError,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Timeout => ErrorKind::Timeout,
            Self::Internal => ErrorKind::Internal,
        }
    }

    /// Field the error refers to, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            Self::Cursor(_) => Some("cursor"),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            field: self.field().map(str::to_string),
            retry_after_secs: match self {
                Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
        }
    }
}

impl From<crate::schema::ValidationError> for DispatchError {
    fn from(err: crate::schema::ValidationError) -> Self {
        Self::Validation {
            field: err.field,
            reason: err.reason,
        }
    }
}

impl From<crate::guard::GuardError> for DispatchError {
    fn from(err: crate::guard::GuardError) -> Self {
        match err {
            crate::guard::GuardError::Unauthorized => Self::Unauthorized,
            crate::guard::GuardError::RateLimited { retry_after_secs } => {
                Self::RateLimited { retry_after_secs }
            }
        }
    }
}

/// Wire shape of an error: `{kind, message, field?, retryAfterSecs?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorError;

    #[test]
    fn test_unknown_tool_body() {
        let body = DispatchError::unknown_tool().to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "NotFound", "message": "Unknown tool"})
        );
    }

    #[test]
    fn test_validation_body_names_field() {
        let body = DispatchError::validation("query", "is required").to_body();
        assert_eq!(body.kind, ErrorKind::ValidationError);
        assert_eq!(body.field.as_deref(), Some("query"));
        assert_eq!(body.message, "query is required");
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let body = DispatchError::RateLimited { retry_after_secs: 12 }.to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["retryAfterSecs"], 12);
        assert_eq!(json["kind"], "RateLimited");
    }

    #[test]
    fn test_cursor_error_kind() {
        let err: DispatchError = CursorError::StaleOrForeign.into();
        assert_eq!(err.kind(), ErrorKind::CursorError);
        assert_eq!(err.field(), Some("cursor"));
    }
}
