//! Connection and execution options.

use std::time::Duration;

use crate::error::Error;

/// Retry policy for [`RetryingExecutionStrategy`](crate::RetryingExecutionStrategy).
///
/// Retries are never applied implicitly; a strategy must be asked to run an
/// operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (default: 3).
    pub max_retries: u32,
    /// Backoff before the first retry; each later retry doubles it
    /// (default: 100ms).
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the initial backoff duration.
    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Disable retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate the backoff duration for a given retry attempt.
    ///
    /// Attempt 0 is the first try and never waits.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_backoff.saturating_mul(factor)
    }

    /// Check if more retries are allowed after `attempt` retries.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Options for a [`RelationalConnection`](crate::RelationalConnection).
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields in
/// future releases without breaking semver. Use
/// [`RelationalOptions::default()`] or
/// [`RelationalOptions::from_connection_string()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RelationalOptions {
    /// Connection string handed to the native driver.
    pub connection_string: Option<String>,

    /// Default command timeout; `None` uses the driver default.
    pub command_timeout: Option<Duration>,

    /// Log parameter values and unmasked command text.
    pub sensitive_data_logging: bool,

    /// Include extra detail when reporting errors.
    pub detailed_errors: bool,

    /// Whether callers may create savepoints automatically inside
    /// user transactions.
    pub auto_savepoints: bool,

    /// Retry policy for execution strategies.
    pub retry: RetryPolicy,
}

impl Default for RelationalOptions {
    fn default() -> Self {
        Self {
            connection_string: None,
            command_timeout: None,
            sensitive_data_logging: false,
            detailed_errors: false,
            auto_savepoints: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl RelationalOptions {
    /// Create options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from a connection string.
    ///
    /// The whole string is kept for the driver. `Command Timeout` (seconds)
    /// is also read into [`RelationalOptions::command_timeout`]; every other
    /// key is left for the driver to interpret.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut options = Self {
            connection_string: Some(conn_str.to_string()),
            ..Self::default()
        };

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "command timeout" | "default command timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    options.command_timeout = Some(Duration::from_secs(secs));
                }
                _ => {
                    tracing::trace!(key = key, "connection string option left to the driver");
                }
            }
        }

        Ok(options)
    }

    /// Set the connection string.
    #[must_use]
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    /// Set the default command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Enable or disable sensitive-data logging.
    #[must_use]
    pub fn sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.sensitive_data_logging = enabled;
        self
    }

    /// Enable or disable detailed errors.
    #[must_use]
    pub fn detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = enabled;
        self
    }

    /// Enable or disable automatic savepoints.
    #[must_use]
    pub fn auto_savepoints(mut self, enabled: bool) -> Self {
        self.auto_savepoints = enabled;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_parsing() {
        let conn = "Server=localhost;Database=test;Command Timeout=45;";
        let options = RelationalOptions::from_connection_string(conn).unwrap();

        assert_eq!(options.connection_string.as_deref(), Some(conn));
        assert_eq!(options.command_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_connection_string_keys_are_case_insensitive() {
        let options =
            RelationalOptions::from_connection_string("COMMAND TIMEOUT = 5").unwrap();
        assert_eq!(options.command_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_connection_string_invalid_timeout() {
        let err = RelationalOptions::from_connection_string("Command Timeout=soon").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_connection_string_missing_equals() {
        assert!(RelationalOptions::from_connection_string("Server=x;garbage").is_err());
    }

    #[test]
    fn test_options_defaults() {
        let options = RelationalOptions::default();
        assert!(options.connection_string.is_none());
        assert!(options.command_timeout.is_none());
        assert!(!options.sensitive_data_logging);
        assert!(options.auto_savepoints);
    }

    #[test]
    fn test_options_builder() {
        let options = RelationalOptions::new()
            .connection_string("Data Source=db")
            .command_timeout(Duration::from_secs(10))
            .sensitive_data_logging(true)
            .retry(RetryPolicy::no_retry());
        assert_eq!(options.connection_string.as_deref(), Some("Data Source=db"));
        assert!(options.sensitive_data_logging);
        assert_eq!(options.retry.max_retries, 0);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::new().initial_backoff(Duration::from_millis(100));

        assert_eq!(policy.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(400));

        let huge = RetryPolicy::new().initial_backoff(Duration::MAX);
        assert_eq!(huge.backoff_for_attempt(40), Duration::MAX);
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy::new().max_retries(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }
}
