use crate::wire::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for the client side of a call
///
/// # Examples
///
/// ```
/// use echorpc::transport::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     connect_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// assert_eq!(config.send_buffer, 64);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for TCP connect, call setup and interceptor chain
    pub connect_timeout: Duration,
    /// Upper bound for a single frame write; `None` waits on backpressure forever
    pub write_timeout: Option<Duration>,
    /// Messages buffered on the write side before `write` suspends
    pub send_buffer: usize,
    /// Largest frame accepted or produced
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: None,
            send_buffer: 64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for client configuration
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = Some(timeout);
        self
    }

    /// Zero is treated as one; the write side always holds at least one message
    pub fn send_buffer(mut self, messages: usize) -> Self {
        self.config.send_buffer = messages.max(1);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfigBuilder::new()
            .connect_timeout(Duration::from_millis(250))
            .write_timeout(Duration::from_secs(5))
            .send_buffer(0)
            .max_frame_size(1024)
            .build();

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.send_buffer, 1);
        assert_eq!(config.max_frame_size, 1024);
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, None);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }
}
