use crate::server::{EchoServer, ServerConfig};
use crate::wire::{Frame, FrameCodec, Metadata};
use crate::{EchoError, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

/// A server running in the background for tests
pub struct TestServer {
    pub handle: JoinHandle<Result<()>>,
    pub addr: SocketAddr,
    pub shutdown: broadcast::Sender<()>,
}

impl TestServer {
    /// Requests graceful shutdown and waits for the server to return
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.handle
            .await
            .map_err(|e| EchoError::Config(format!("server task failed: {e}")))?
    }
}

/// Starts an echo server on an ephemeral port
pub async fn spawn_test_server(server: EchoServer) -> Result<TestServer> {
    let listener = server.bind().await?;
    let addr = listener.local_addr()?;
    let shutdown = crate::common::RpcServer::shutdown_signal(&server);

    let handle = tokio::spawn(async move { server.serve(listener).await });

    Ok(TestServer {
        handle,
        addr,
        shutdown,
    })
}

/// Creates a controlled echo server with a connection limit for integration tests
pub async fn create_controlled_test_server_with_limit(max_connections: usize) -> Result<TestServer> {
    let config = ServerConfig {
        max_connections,
        ..Default::default()
    };
    spawn_test_server(EchoServer::new(config)).await
}

/// Server end of a single call, driven frame by frame
///
/// Used to script peers that misbehave in ways the echo server never does,
/// such as closing the connection mid-stream.
pub struct ScriptedPeer {
    pub reader: FramedRead<OwnedReadHalf, FrameCodec>,
    pub writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    pub method: String,
    pub metadata: Metadata,
}

impl ScriptedPeer {
    /// Accepts one connection, reads its call setup and answers `Ready`
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _) = listener.accept().await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, FrameCodec::default());
        let mut writer = FramedWrite::new(write_half, FrameCodec::default());

        let (method, metadata) = match reader.next().await.transpose()? {
            Some(Frame::Open { method, metadata }) => (method, metadata),
            other => {
                return Err(EchoError::Protocol(format!(
                    "expected open frame, got {other:?}"
                )));
            }
        };
        writer.send(Frame::Ready).await?;

        Ok(Self {
            reader,
            writer,
            method,
            metadata,
        })
    }

    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        self.reader.next().await.transpose()
    }

    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        self.writer.send(frame).await
    }
}
