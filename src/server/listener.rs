use super::config::ServerConfig;
use super::service::{EchoService, RequestStream, ResponseSink, StreamHandler};
use crate::common::RpcServer;
use crate::wire::{Frame, FrameCodec};
use crate::{ECHO_METHOD, EchoError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::{signal, time::timeout};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{Instrument, error, info, warn};

type Handlers = Arc<HashMap<String, Arc<dyn StreamHandler>>>;

/// Streaming RPC server hosting the echo service
///
/// Every accepted connection carries one call and runs its handler in a
/// separate task. On shutdown the server stops accepting and waits up to
/// `drain_timeout` for in-flight calls before returning.
///
/// # Examples
///
/// Server with graceful shutdown:
///
/// ```no_run
/// use echorpc::{EchoServer, RpcServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = EchoServer::new(ServerConfig::default());
///     let shutdown_signal = server.shutdown_signal();
///
///     let server_handle = tokio::spawn(async move { server.run().await });
///
///     // Do other work...
///
///     let _ = shutdown_signal.send(());
///     server_handle.await??;
///     Ok(())
/// }
/// ```
pub struct EchoServer {
    config: ServerConfig,
    handlers: HashMap<String, Arc<dyn StreamHandler>>,
    shutdown_signal: Arc<tokio::sync::broadcast::Sender<()>>,
}

impl EchoServer {
    /// Creates a server serving [`EchoService`] at [`ECHO_METHOD`]
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_signal, _) = tokio::sync::broadcast::channel(1);
        let mut handlers: HashMap<String, Arc<dyn StreamHandler>> = HashMap::new();
        handlers.insert(ECHO_METHOD.to_string(), Arc::new(EchoService));
        Self {
            config,
            handlers,
            shutdown_signal: Arc::new(shutdown_signal),
        }
    }

    /// Serves `handler` at `method`, replacing any previous handler
    pub fn with_handler(mut self, method: impl Into<String>, handler: impl StreamHandler) -> Self {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            EchoError::Config(format!("Failed to bind {}: {}", self.config.bind_addr, e))
        })
    }

    /// Accepts calls on `listener` until shutdown, then drains in-flight calls
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Echo RPC server listening");

        let handlers: Handlers = Arc::new(self.handlers.clone());
        let connection_count = Arc::new(AtomicUsize::new(0));
        let mut shutdown_rx = self.shutdown_signal.subscribe();
        let mut calls = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let current_count = connection_count.load(Ordering::SeqCst);
                            if current_count >= self.config.max_connections {
                                warn!(%addr, current = current_count, limit = self.config.max_connections, "Connection rejected: limit reached");
                                continue;
                            }

                            let new_count = connection_count.fetch_add(1, Ordering::SeqCst) + 1;
                            info!(%addr, current = new_count, "Accepted connection");

                            let config = self.config.clone();
                            let handlers = handlers.clone();
                            let connection_count = connection_count.clone();
                            let span = tracing::info_span!("connection", %addr);
                            calls.spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, handlers, config).instrument(span).await {
                                    error!(%addr, error = %e, "Error handling call");
                                }
                                let final_count = connection_count.fetch_sub(1, Ordering::SeqCst) - 1;
                                info!(%addr, current = final_count, "Connection closed");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Call handler panicked");
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received internal shutdown signal, stopping server");
                    break;
                }
            }
        }

        drop(listener);
        self.drain(calls).await;

        info!("Echo RPC server stopped");
        Ok(())
    }

    async fn drain(&self, mut calls: JoinSet<()>) {
        if calls.is_empty() {
            return;
        }

        info!(in_flight = calls.len(), "Draining in-flight calls");
        let drained = timeout(self.config.drain_timeout, async {
            while calls.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = calls.len(), timeout = ?self.config.drain_timeout, "Drain timeout elapsed, aborting remaining calls");
            calls.abort_all();
            while calls.join_next().await.is_some() {}
        }
    }
}

#[async_trait]
impl RpcServer for EchoServer {
    /// Binds the configured address and serves until shutdown
    async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Returns a shutdown signal sender that can be used to gracefully shutdown the server
    fn shutdown_signal(&self) -> tokio::sync::broadcast::Sender<()> {
        self.shutdown_signal.as_ref().clone()
    }
}

/// Runs call setup and the handler for one connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handlers: Handlers,
    config: ServerConfig,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let codec = FrameCodec::new(config.max_frame_size);
    let mut reader = FramedRead::new(read_half, codec.clone());
    let mut writer = FramedWrite::new(write_half, codec);

    let (method, metadata) = match timeout(config.handshake_timeout, reader.next()).await {
        Ok(Some(Ok(Frame::Open { method, metadata }))) => (method, metadata),
        Ok(Some(Ok(other))) => {
            return Err(EchoError::Protocol(format!(
                "expected open frame, got {}",
                other.kind()
            )));
        }
        Ok(Some(Err(e))) => return Err(e),
        Ok(None) => {
            info!(%addr, "Client closed connection before opening a call");
            return Ok(());
        }
        Err(_) => {
            warn!(%addr, "Call setup timeout");
            return Ok(());
        }
    };

    let Some(handler) = handlers.get(&method).cloned() else {
        warn!(%addr, %method, "Rejecting call to unknown method");
        writer
            .send(Frame::Reject {
                reason: format!("unknown method {method}"),
            })
            .await?;
        return Ok(());
    };

    writer.send(Frame::Ready).await?;
    info!(%addr, %method, ?metadata, "Call opened");

    let mut requests = RequestStream::new(reader, metadata, config.read_timeout);
    let mut responses = ResponseSink::new(writer, config.write_timeout);

    match handler.handle(&mut requests, &mut responses).await {
        Ok(()) => {
            responses.finish().await?;
            info!(%addr, %method, responses = responses.sent(), "Call completed");
            Ok(())
        }
        Err(e) => {
            let _ = responses.abort(e.to_string()).await;
            Err(e)
        }
    }
}
