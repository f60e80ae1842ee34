//! Centralized configuration for deeplink.
//!
//! Protocol constants live on [`CoordinatorConfig`]; the per-application
//! values live on [`LinkConfig`], which is immutable once built.

use crate::error::{DeeplinkError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Coordination protocol constants.
pub struct CoordinatorConfig;

impl CoordinatorConfig {
    /// Read buffer for the unframed wire format; longer messages are truncated.
    pub const RAW_READ_BUFFER: usize = 1024;
    /// Upper bound on a length-prefixed message.
    pub const MAX_FRAMED_MESSAGE_SIZE: usize = 64 * 1024;

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const CONNECT_ATTEMPTS: u32 = 3;
    pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);
    /// How long the primary waits for a single connection to deliver its message.
    pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

    // IANA dynamic/private range used for derived ports
    pub const DERIVED_PORT_MIN: u16 = 49152;
    pub const DERIVED_PORT_MAX: u16 = 65535;

    pub const DEFAULT_SCHEME: &'static str = "deeplink";
}

/// Encoding of a message on a coordination connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// `[u32 BE length][UTF-8 bytes]`, rejected above the configured maximum.
    #[default]
    Framed,
    /// Unframed UTF-8 ended by the peer closing; truncated at the read buffer.
    Raw,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Framed => "framed",
            WireFormat::Raw => "raw",
        }
    }

    /// Default message limit for this format.
    pub fn default_max_message_bytes(&self) -> usize {
        match self {
            WireFormat::Framed => CoordinatorConfig::MAX_FRAMED_MESSAGE_SIZE,
            WireFormat::Raw => CoordinatorConfig::RAW_READ_BUFFER,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callback invoked on the primary instance for every received link.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Immutable configuration for one application's link handling.
#[derive(Clone)]
pub struct LinkConfig {
    scheme: String,
    port: u16,
    handler: Option<MessageHandler>,
    wire_format: WireFormat,
    max_message_bytes: usize,
    connect_timeout: Duration,
    connect_attempts: u32,
    retry_delay: Duration,
    read_timeout: Duration,
}

impl fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfig")
            .field("scheme", &self.scheme)
            .field("port", &self.port)
            .field("handler", &self.handler.is_some())
            .field("wire_format", &self.wire_format)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_attempts", &self.connect_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl LinkConfig {
    /// Start building a configuration for `scheme` on `port`.
    pub fn builder(scheme: impl Into<String>, port: u16) -> LinkConfigBuilder {
        LinkConfigBuilder::new(scheme, port)
    }

    /// Build a configuration whose port is derived from the scheme.
    pub fn for_scheme(scheme: impl Into<String>) -> LinkConfigBuilder {
        let scheme = scheme.into();
        let port = Self::derived_port(&scheme);
        LinkConfigBuilder::new(scheme, port)
    }

    /// Stable loopback port for a scheme.
    ///
    /// FNV-1a over the lowercase scheme, folded into the dynamic port range.
    /// The mapping must never change between releases: an old and a new build
    /// of the same app have to land on the same port.
    pub fn derived_port(scheme: &str) -> u16 {
        const FNV_OFFSET: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;

        let hash = scheme
            .to_ascii_lowercase()
            .bytes()
            .fold(FNV_OFFSET, |acc, b| (acc ^ u32::from(b)).wrapping_mul(FNV_PRIME));

        let span = u32::from(CoordinatorConfig::DERIVED_PORT_MAX - CoordinatorConfig::DERIVED_PORT_MIN) + 1;
        CoordinatorConfig::DERIVED_PORT_MIN + (hash % span) as u16
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handler(&self) -> Option<&MessageHandler> {
        self.handler.as_ref()
    }

    pub fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Whether `link` is a URI of this configuration's scheme.
    pub fn matches_scheme(&self, link: &str) -> bool {
        link.split_once(':')
            .map(|(scheme, _)| scheme.eq_ignore_ascii_case(&self.scheme))
            .unwrap_or(false)
    }
}

/// Builder for [`LinkConfig`].
pub struct LinkConfigBuilder {
    scheme: String,
    port: u16,
    handler: Option<MessageHandler>,
    wire_format: WireFormat,
    max_message_bytes: Option<usize>,
    connect_timeout: Duration,
    connect_attempts: u32,
    retry_delay: Duration,
    read_timeout: Duration,
}

impl LinkConfigBuilder {
    fn new(scheme: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            port,
            handler: None,
            wire_format: WireFormat::default(),
            max_message_bytes: None,
            connect_timeout: CoordinatorConfig::CONNECT_TIMEOUT,
            connect_attempts: CoordinatorConfig::CONNECT_ATTEMPTS,
            retry_delay: CoordinatorConfig::CONNECT_RETRY_DELAY,
            read_timeout: CoordinatorConfig::READ_TIMEOUT,
        }
    }

    /// Set the callback invoked for each received link.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Deliver received links into a channel instead of a callback.
    ///
    /// Replaces any handler set earlier.
    pub fn channel(self) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let builder = self.handler(move |message| {
            // Receiver dropped means the embedder stopped listening.
            let _ = tx.send(message);
        });
        (builder, rx)
    }

    pub fn wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    /// Override the message limit (read buffer for raw, cap for framed).
    pub fn max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = Some(max);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<LinkConfig> {
        validate_scheme(&self.scheme)?;

        if self.connect_attempts == 0 {
            return Err(DeeplinkError::Config {
                message: "connect_attempts must be at least 1".to_string(),
            });
        }

        let max_message_bytes = self
            .max_message_bytes
            .unwrap_or_else(|| self.wire_format.default_max_message_bytes());
        if max_message_bytes == 0 {
            return Err(DeeplinkError::Config {
                message: "max_message_bytes must be greater than zero".to_string(),
            });
        }

        Ok(LinkConfig {
            scheme: self.scheme,
            port: self.port,
            handler: self.handler,
            wire_format: self.wire_format,
            max_message_bytes,
            connect_timeout: self.connect_timeout,
            connect_attempts: self.connect_attempts,
            retry_delay: self.retry_delay,
            read_timeout: self.read_timeout,
        })
    }
}

/// Check that `scheme` is a bare URI scheme name (`myapp`, not `myapp://`).
///
/// Follows RFC 3986: a letter followed by letters, digits, `+`, `-` or `.`.
pub fn validate_scheme(scheme: &str) -> Result<()> {
    let invalid = |reason: &str| DeeplinkError::InvalidScheme {
        scheme: scheme.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = scheme.chars();
    let first = chars.next().ok_or_else(|| invalid("scheme is empty"))?;

    if scheme.contains(':') {
        return Err(invalid("scheme must not include ':' or '://'"));
    }
    if !first.is_ascii_alphabetic() {
        return Err(invalid("scheme must start with a letter"));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '+' | '-' | '.'))) {
        return Err(invalid(&format!("unexpected character {:?}", bad)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_scheme() {
        assert!(validate_scheme("myapp").is_ok());
        assert!(validate_scheme("web+app.v2-beta").is_ok());

        assert!(validate_scheme("").is_err());
        assert!(validate_scheme("myapp://").is_err());
        assert!(validate_scheme("1app").is_err());
        assert!(validate_scheme("my app").is_err());
        assert!(validate_scheme("my\\app").is_err());
    }

    #[test]
    fn test_derived_port_is_stable_and_in_range() {
        let port = LinkConfig::derived_port("resourcer");
        assert_eq!(port, LinkConfig::derived_port("resourcer"));
        assert_eq!(port, LinkConfig::derived_port("Resourcer"));
        assert!(port >= CoordinatorConfig::DERIVED_PORT_MIN);

        assert_ne!(
            LinkConfig::derived_port("resourcer"),
            LinkConfig::derived_port("myapp")
        );
    }

    #[test]
    fn test_builder_defaults() {
        let config = LinkConfig::builder("myapp", 8080).build().unwrap();

        assert_eq!(config.scheme(), "myapp");
        assert_eq!(config.port(), 8080);
        assert!(config.handler().is_none());
        assert_eq!(config.wire_format(), WireFormat::Framed);
        assert_eq!(
            config.max_message_bytes(),
            CoordinatorConfig::MAX_FRAMED_MESSAGE_SIZE
        );
        assert_eq!(config.connect_attempts(), CoordinatorConfig::CONNECT_ATTEMPTS);
    }

    #[test]
    fn test_raw_format_uses_read_buffer_limit() {
        let config = LinkConfig::builder("myapp", 8080)
            .wire_format(WireFormat::Raw)
            .build()
            .unwrap();
        assert_eq!(config.max_message_bytes(), CoordinatorConfig::RAW_READ_BUFFER);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(LinkConfig::builder("myapp://", 8080).build().is_err());
        assert!(LinkConfig::builder("myapp", 8080)
            .connect_attempts(0)
            .build()
            .is_err());
        assert!(LinkConfig::builder("myapp", 8080)
            .max_message_bytes(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_matches_scheme() {
        let config = LinkConfig::for_scheme("myapp").build().unwrap();
        assert!(config.matches_scheme("myapp://open/item"));
        assert!(config.matches_scheme("MyApp:thing"));
        assert!(!config.matches_scheme("other://x"));
        assert!(!config.matches_scheme("myapp"));
    }

    #[tokio::test]
    async fn test_channel_handler_forwards_messages() {
        let (builder, mut rx) = LinkConfig::builder("myapp", 0).channel();
        let config = builder.build().unwrap();

        let handler = config.handler().expect("channel installs a handler");
        handler("myapp://one".to_string());

        assert_eq!(rx.recv().await.as_deref(), Some("myapp://one"));
    }
}
