//! Server engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default maximum command line length, CRLF included (RFC 5321 §4.5.3.1.6).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1000;

/// Smallest command line limit the engine accepts (RFC 5321 §4.5.3.1.4).
pub const MIN_LINE_LENGTH: usize = 512;

/// Default maximum message size (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Default recipient cap per transaction (RFC 5321 §4.5.3.1.8).
pub const DEFAULT_MAX_RECIPIENTS: usize = 100;

/// Default number of complete command lines a client may queue.
pub const DEFAULT_MAX_PIPELINE_DEPTH: usize = 100;

/// Default idle timeout while waiting for a command (RFC 5321 §4.5.3.2.7).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default timeout while receiving a message body.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default TLS handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP server configuration.
///
/// Shared read-only by every session of an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname announced in the greeting, HELO and EHLO replies.
    pub hostname: String,
    /// Free text appended to the 220 greeting.
    pub banner: String,
    /// Maximum command line length in bytes, CRLF included.
    pub max_line_length: usize,
    /// Maximum message size in bytes, advertised with SIZE.
    pub max_message_size: usize,
    /// Maximum accepted recipients per transaction.
    pub max_recipients: usize,
    /// Maximum complete command lines queued ahead of the current one.
    pub max_pipeline_depth: usize,
    /// Timeout while waiting for the next command.
    pub command_timeout: Duration,
    /// Timeout while receiving a DATA body or BDAT chunk.
    pub data_timeout: Duration,
    /// Timeout for the STARTTLS handshake.
    pub handshake_timeout: Duration,
    /// Offer 8BITMIME.
    pub eight_bit_mime: bool,
    /// Offer SMTPUTF8.
    pub smtputf8: bool,
    /// Offer CHUNKING (BDAT).
    pub chunking: bool,
    /// Offer BINARYMIME. Requires `chunking`.
    pub binary_mime: bool,
    /// Offer ENHANCEDSTATUSCODES.
    pub enhanced_status_codes: bool,
    /// Reject commands pipelined by clients that did not negotiate PIPELINING.
    pub reject_unauth_pipelining: bool,
}

impl Config {
    /// Creates a configuration with default limits for the given hostname.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            banner: format!("mailgate {}", env!("CARGO_PKG_VERSION")),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_recipients: DEFAULT_MAX_RECIPIENTS,
            max_pipeline_depth: DEFAULT_MAX_PIPELINE_DEPTH,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            eight_bit_mime: true,
            smtputf8: true,
            chunking: true,
            binary_mime: true,
            enhanced_status_codes: true,
            reject_unauth_pipelining: true,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(hostname: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(hostname)
    }

    /// Checks the configuration for inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() || self.hostname.contains(char::is_whitespace) {
            return Err(Error::InvalidConfig(format!(
                "hostname {:?} is not a valid domain",
                self.hostname
            )));
        }
        if self.banner.contains(['\r', '\n']) {
            return Err(Error::InvalidConfig("banner must be a single line".into()));
        }
        if self.max_line_length < MIN_LINE_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "max_line_length {} is below the minimum of {MIN_LINE_LENGTH}",
                self.max_line_length
            )));
        }
        if self.max_message_size == 0 {
            return Err(Error::InvalidConfig("max_message_size must be non-zero".into()));
        }
        if self.max_recipients == 0 {
            return Err(Error::InvalidConfig("max_recipients must be non-zero".into()));
        }
        if self.max_pipeline_depth == 0 {
            return Err(Error::InvalidConfig(
                "max_pipeline_depth must be non-zero".into(),
            ));
        }
        if self.binary_mime && !self.chunking {
            return Err(Error::InvalidConfig(
                "BINARYMIME requires CHUNKING to be enabled".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Builder for server configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new builder with default limits.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            config: Config::new(hostname),
        }
    }

    /// Sets the greeting banner text.
    #[must_use]
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.config.banner = banner.into();
        self
    }

    /// Sets the maximum command line length.
    #[must_use]
    pub const fn max_line_length(mut self, length: usize) -> Self {
        self.config.max_line_length = length;
        self
    }

    /// Sets the maximum message size.
    #[must_use]
    pub const fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Sets the recipient cap per transaction.
    #[must_use]
    pub const fn max_recipients(mut self, count: usize) -> Self {
        self.config.max_recipients = count;
        self
    }

    /// Sets the maximum pipeline depth.
    #[must_use]
    pub const fn max_pipeline_depth(mut self, depth: usize) -> Self {
        self.config.max_pipeline_depth = depth;
        self
    }

    /// Sets the command timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Sets the body timeout.
    #[must_use]
    pub const fn data_timeout(mut self, timeout: Duration) -> Self {
        self.config.data_timeout = timeout;
        self
    }

    /// Sets the TLS handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Enables or disables 8BITMIME.
    #[must_use]
    pub const fn eight_bit_mime(mut self, enabled: bool) -> Self {
        self.config.eight_bit_mime = enabled;
        self
    }

    /// Enables or disables SMTPUTF8.
    #[must_use]
    pub const fn smtputf8(mut self, enabled: bool) -> Self {
        self.config.smtputf8 = enabled;
        self
    }

    /// Enables or disables CHUNKING.
    #[must_use]
    pub const fn chunking(mut self, enabled: bool) -> Self {
        self.config.chunking = enabled;
        self
    }

    /// Enables or disables BINARYMIME.
    #[must_use]
    pub const fn binary_mime(mut self, enabled: bool) -> Self {
        self.config.binary_mime = enabled;
        self
    }

    /// Enables or disables ENHANCEDSTATUSCODES.
    #[must_use]
    pub const fn enhanced_status_codes(mut self, enabled: bool) -> Self {
        self.config.enhanced_status_codes = enabled;
        self
    }

    /// Enables or disables rejection of unnegotiated pipelining.
    #[must_use]
    pub const fn reject_unauth_pipelining(mut self, enabled: bool) -> Self {
        self.config.reject_unauth_pipelining = enabled;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the values are inconsistent.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.max_line_length, 1000);
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.max_recipients, 100);
        assert_eq!(config.max_pipeline_depth, 100);
        assert_eq!(config.command_timeout, Duration::from_secs(300));
        assert_eq!(config.data_timeout, Duration::from_secs(600));
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert!(config.eight_bit_mime && config.smtputf8 && config.chunking);
        assert!(config.reject_unauth_pipelining);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder("mx.example.com")
            .banner("ready")
            .max_message_size(1024)
            .max_recipients(5)
            .smtputf8(false)
            .build()
            .unwrap();

        assert_eq!(config.hostname, "mx.example.com");
        assert_eq!(config.banner, "ready");
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.max_recipients, 5);
        assert!(!config.smtputf8);
    }

    #[test]
    fn test_rejects_short_line_limit() {
        let result = Config::builder("mx.example.com").max_line_length(100).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert!(Config::builder("mx").max_message_size(0).build().is_err());
        assert!(Config::builder("mx").max_recipients(0).build().is_err());
        assert!(Config::builder("mx").max_pipeline_depth(0).build().is_err());
    }

    #[test]
    fn test_binarymime_requires_chunking() {
        let result = Config::builder("mx.example.com").chunking(false).build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let config = Config::builder("mx.example.com")
            .chunking(false)
            .binary_mime(false)
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn test_rejects_bad_hostname_and_banner() {
        assert!(Config::builder("mx example").build().is_err());
        assert!(Config::builder("").build().is_err());
        assert!(Config::builder("mx").banner("a\r\n250 injected").build().is_err());
    }
}
