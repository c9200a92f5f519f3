use std::sync::Arc;
use std::time::Duration;

/// Fine-grained configuration of the HTTP client engine.
///
/// Named, overridable fields for the engine's timeouts and read buffer
/// size, following a builder-then-`.done()` shape.
#[derive(Debug, Clone)]
pub struct Config {
    should_not_occur_timeout: Duration,
    default_retry_backoff: Duration,
    default_read_timeout: Duration,
    read_buffer_size: usize,
}

impl Config {
    /// Create a config with sensible defaults.
    pub fn new() -> Config {
        Config {
            should_not_occur_timeout: Duration::from_secs(10 * 60),
            default_retry_backoff: Duration::from_secs(30),
            default_read_timeout: Duration::from_secs(10 * 60),
            read_buffer_size: 1024,
        }
    }

    /// Guard timeout armed while waiting for events that should always
    /// arrive promptly (socket open, post-send before any read timeout is
    /// known). Firing this is a bug in the transport, not a real timeout.
    pub fn should_not_occur_timeout(&mut self, value: Duration) -> &mut Self {
        self.should_not_occur_timeout = value;
        self
    }

    /// Backoff used by `RetrySocketOpen` when the codec does not pick an
    /// explicit one via `RetryCtl::retry`.
    pub fn default_retry_backoff(&mut self, value: Duration) -> &mut Self {
        self.default_retry_backoff = value;
        self
    }

    /// Read timeout used for requests that never call
    /// `Request::keepalive` to set one explicitly.
    pub fn default_read_timeout(&mut self, value: Duration) -> &mut Self {
        self.default_read_timeout = value;
        self
    }

    /// Minimum size of the scratch buffer the engine reads into on each
    /// `Transport` read event.
    pub fn read_buffer_size(&mut self, value: usize) -> &mut Self {
        assert!(value >= 1024, "read buffer must be at least 1 KiB");
        self.read_buffer_size = value;
        self
    }

    pub(crate) fn should_not_occur(&self) -> Duration {
        self.should_not_occur_timeout
    }

    pub(crate) fn retry_backoff(&self) -> Duration {
        self.default_retry_backoff
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.default_read_timeout
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Create an `Arc`'d config clone to pass to `Client::new`.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
