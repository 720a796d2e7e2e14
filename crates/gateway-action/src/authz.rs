use async_trait::async_trait;
use thiserror::Error;

/// Identity of whoever issued the request, as resolved by the inbound layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub subject: Option<String>,
}

impl Caller {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.subject.is_none()
    }
}

/// The authorizer could not reach a decision. Never used to signal a denial.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("authorizer_failed:{message}")]
pub struct AuthorizerError {
    pub message: String,
}

impl AuthorizerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait RunAuthorizer: Send + Sync {
    async fn can_get_run(&self, caller: &Caller, group: &str) -> Result<bool, AuthorizerError>;

    async fn can_do_run_actions(
        &self,
        caller: &Caller,
        group: &str,
    ) -> Result<bool, AuthorizerError>;
}
