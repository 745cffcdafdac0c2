use std::sync::Arc;
use thiserror::Error;

/// Error types for the echorpc library
#[derive(Error, Debug, Clone)]
pub enum EchoError {
    /// Endpoint unreachable or refused, call rejected, or setup timed out
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Mid-stream I/O failure, or the peer went away without ending its stream
    #[error("Transport broken: {0}")]
    TransportBroken(String),

    /// `write` after `close_writes` on the same call
    #[error("Write after close")]
    WriteAfterClose,

    /// `close_writes` called twice
    #[error("Writes already closed")]
    AlreadyClosed,

    /// An interceptor failed while establishing the call
    #[error("Interceptor failed: {0}")]
    InterceptorFailed(String),

    /// The call was torn down by its owner
    #[error("Call cancelled")]
    Cancelled,

    /// Malformed or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener I/O (bind, accept, socket options)
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for EchoError {
    fn from(err: std::io::Error) -> Self {
        EchoError::Io(Arc::new(err))
    }
}

/// Result type for the echorpc library
pub type Result<T> = std::result::Result<T, EchoError>;

/// The single method served by [`EchoService`]
pub const ECHO_METHOD: &str = "/echo.EchoService/Echo";

pub mod client;
pub mod common;
pub mod duplex;
pub mod interceptor;
pub mod message;
pub mod server;
pub mod transport;
pub mod wire;

// Re-export main types for convenience
pub use client::{EchoClient, run_session};
pub use common::RpcServer;
pub use duplex::DuplexCall;
pub use interceptor::{
    InterceptorChain, LoggingInterceptor, MetadataInterceptor, Next, PassThrough,
    StreamInterceptor,
};
pub use message::Message;
pub use server::{EchoServer, EchoService, ServerConfig, StreamHandler};
pub use transport::{CallDetails, CallState, ClientConfig, ClientConfigBuilder, Transport};
pub use wire::Metadata;
