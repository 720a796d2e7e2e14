use reqwest::StatusCode;
use runservice_client::RunServiceClientError;
use thiserror::Error;

use crate::authz::AuthorizerError;

/// Classification of a failure reported by the run service or its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
    Unavailable,
}

impl RemoteErrorKind {
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::BadRequest,
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::NotFound,
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Self::Conflict,
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Self::Unavailable,
            status if status.is_client_error() => Self::BadRequest,
            _ => Self::Internal,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    Forbidden,
    BadRequest,
    Internal,
    Remote(RemoteErrorKind),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("user not authorized")]
    Forbidden,
    #[error("{message}")]
    BadRequest { message: String },
    #[error("failed to determine permissions: {source}")]
    Permissions {
        #[source]
        source: AuthorizerError,
    },
    #[error("{message}")]
    Remote {
        kind: RemoteErrorKind,
        status: Option<StatusCode>,
        message: String,
        #[source]
        source: RunServiceClientError,
    },
}

impl ActionError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ActionErrorKind {
        match self {
            Self::Forbidden => ActionErrorKind::Forbidden,
            Self::BadRequest { .. } => ActionErrorKind::BadRequest,
            Self::Permissions { .. } => ActionErrorKind::Internal,
            Self::Remote { kind, .. } => ActionErrorKind::Remote(*kind),
        }
    }
}

impl From<AuthorizerError> for ActionError {
    fn from(source: AuthorizerError) -> Self {
        Self::Permissions { source }
    }
}

/// Maps any run service failure to the gateway taxonomy. HTTP failures keep
/// the remote status and message; transport failures are classified by what
/// went wrong on the wire.
#[must_use]
pub fn error_from_remote(error: RunServiceClientError) -> ActionError {
    let (kind, status, message) = match &error {
        RunServiceClientError::Http { status, message } => (
            RemoteErrorKind::from_status(*status),
            Some(*status),
            message.clone(),
        ),
        RunServiceClientError::InvalidId { .. } => {
            (RemoteErrorKind::BadRequest, None, error.to_string())
        }
        RunServiceClientError::Request { .. } | RunServiceClientError::Read { .. } => {
            (RemoteErrorKind::Unavailable, None, error.to_string())
        }
        RunServiceClientError::BaseUrlMissing
        | RunServiceClientError::InvalidPath
        | RunServiceClientError::Build { .. }
        | RunServiceClientError::Decode { .. } => {
            (RemoteErrorKind::Internal, None, error.to_string())
        }
    };
    ActionError::Remote {
        kind,
        status,
        message,
        source: error,
    }
}
