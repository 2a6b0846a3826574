use crate::gateway::GatewayError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// Credential failures and any other gateway error propagated
    /// verbatim to the caller (the UI decides wording).
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("classification timed out")]
    ClassificationTimeout,
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("sign-up failed: {0}")]
    SignUp(String),
    #[error("session lost during sign-up")]
    SessionLost,
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    pub fn classification(message: impl Into<String>) -> Self {
        Self::Classification(message.into())
    }

    pub fn sign_up(message: impl Into<String>) -> Self {
        Self::SignUp(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Timeout is the one classification failure callers recover from by
    /// keeping their previous state instead of clearing it.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ClassificationTimeout)
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(value: anyhow::Error) -> Self {
        Self::Classification(value.to_string())
    }
}
