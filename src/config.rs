use std::time::Duration;

use crate::errors::AuthError;

/// Timing and retry knobs for classification and sign-up.
///
/// Defaults match production behavior; tests shrink the durations so the
/// backoff/timeout paths run in milliseconds.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Hard wall-clock ceiling raced against the whole lookup chain.
    pub classify_timeout: Duration,
    /// Base unit for the linear backoff: attempt n sleeps `backoff * (n + 1)`.
    pub retry_backoff: Duration,
    /// Retry budget for routine classification (sign-in, auth-change).
    pub max_retries: u32,
    /// Elevated retry budget used right after sign-up, when the membership
    /// row was written moments ago and may not be visible yet.
    pub signup_retries: u32,
    /// Attempts to observe a session before classification gives up.
    pub session_retries: u32,
    /// Wait after the company-provisioning procedure before re-reading
    /// authorization-checked rows.
    pub settle_delay: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            classify_timeout: Duration::from_millis(10_000),
            retry_backoff: Duration::from_millis(1_000),
            max_retries: 2,
            signup_retries: 5,
            session_retries: 3,
            settle_delay: Duration::from_millis(1_500),
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let defaults = Self::default();

        Ok(Self {
            classify_timeout: env_millis("AUTH_CLASSIFY_TIMEOUT_MS", defaults.classify_timeout)?,
            retry_backoff: env_millis("AUTH_RETRY_BACKOFF_MS", defaults.retry_backoff)?,
            max_retries: env_u32("AUTH_MAX_RETRIES", defaults.max_retries)?,
            signup_retries: env_u32("AUTH_SIGNUP_RETRIES", defaults.signup_retries)?,
            session_retries: env_u32("AUTH_SESSION_RETRIES", defaults.session_retries)?,
            settle_delay: env_millis("AUTH_SETTLE_DELAY_MS", defaults.settle_delay)?,
        })
    }

    /// Backoff for a given zero-based attempt number.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff * (attempt + 1)
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, AuthError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| AuthError::configuration(format!("{key} must be a valid integer"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, AuthError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|_| AuthError::configuration(format!("{key} must be a valid integer"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_in_attempt() {
        let config = AuthConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_millis(1_000));
        assert_eq!(config.backoff_for(1), Duration::from_millis(2_000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(3_000));
    }
}
