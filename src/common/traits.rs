use crate::Result;
use async_trait::async_trait;

/// Common trait for servers
///
/// Lets callers run a server and stop it through its shutdown signal
/// without knowing what it serves.
#[async_trait]
pub trait RpcServer {
    /// Starts the server and serves until shutdown
    async fn run(&self) -> Result<()>;

    /// Returns a shutdown signal sender that can be used to gracefully shutdown the server
    fn shutdown_signal(&self) -> tokio::sync::broadcast::Sender<()>;
}
