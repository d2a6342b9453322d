use reqwest::StatusCode;
use thiserror::Error;

/// Failures at the task store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: StatusCode,
        message: String,
    },

    #[error("{endpoint} rejected the session credential")]
    Unauthorized { endpoint: String, message: String },

    #[error("failed encoding request for {endpoint}: {source}")]
    Encode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed decoding response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Human-readable text the server attached to a rejection, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } | Self::Unauthorized { message, .. }
                if !message.is_empty() =>
            {
                Some(message)
            }
            _ => None,
        }
    }
}

/// Client-side preconditions checked before any request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("task text is empty")]
    EmptyText,

    #[error("sign in first")]
    NotAuthenticated,

    #[error("nothing to change")]
    EmptyPatch,

    #[error("no such task")]
    UnknownTask,
}

/// Displayable failure from login or registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthFailure {
    pub message: String,
}

impl AuthFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
