//! Server side: call setup, method routing and the echo service loop

pub mod config;
pub mod listener;
pub mod service;

pub use config::ServerConfig;
pub use listener::EchoServer;
pub use service::{EchoService, RequestStream, ResponseSink, StreamHandler};
