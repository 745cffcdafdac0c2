use crate::wire::DEFAULT_MAX_FRAME_SIZE;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the echo RPC server
///
/// # Examples
///
/// ```
/// use echorpc::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig {
///     bind_addr: "127.0.0.1:50051".parse().unwrap(),
///     max_connections: 100,
///     ..Default::default()
/// };
/// assert_eq!(config.handshake_timeout, Duration::from_secs(10));
/// assert_eq!(config.read_timeout, None);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent calls
    pub max_connections: usize,
    /// Longest gap between two client frames once the call is open; `None` waits forever
    pub read_timeout: Option<Duration>,
    /// Upper bound for a single response write; `None` waits on backpressure forever
    pub write_timeout: Option<Duration>,
    /// Time a new connection has to send its call setup
    pub handshake_timeout: Duration,
    /// How long in-flight calls may run after shutdown was requested
    pub drain_timeout: Duration,
    /// Largest frame accepted or produced
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_connections: 100,
            read_timeout: None,
            write_timeout: None,
            handshake_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
