use super::call::{Call, CallDetails, Inbound, Outbound};
use super::config::ClientConfig;
use super::context::CallContext;
use crate::wire::{Frame, FrameCodec};
use crate::{EchoError, Message, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Client side of the stream transport
///
/// Each [`connect`](Transport::connect) opens one TCP connection carrying
/// exactly one call. The outbound stream is drained into the socket by a
/// background task; the inbound side is read lazily by whoever polls the
/// returned [`Call`].
///
/// # Examples
///
/// ```no_run
/// use echorpc::transport::{CallContext, CallDetails, ClientConfig, Transport};
/// use echorpc::{Message, ECHO_METHOD};
/// use futures::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = Transport::new("127.0.0.1:50051".parse()?, ClientConfig::default());
///     let ctx = CallContext::new();
///     let outbound = futures::stream::iter(vec![Message::new("hello")]).boxed();
///
///     let call = transport.connect(CallDetails::new(ECHO_METHOD), outbound, &ctx).await?;
///     let (mut inbound, _teardown) = call.into_parts();
///     while let Some(message) = inbound.next().await {
///         println!("Server echoed: {}", message?);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Transport {
    addr: SocketAddr,
    config: ClientConfig,
}

impl Transport {
    pub fn new(addr: SocketAddr, config: ClientConfig) -> Self {
        Self { addr, config }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects and performs call setup within the connect timeout.
    ///
    /// Fails with [`EchoError::ConnectionFailed`] when the endpoint is
    /// unreachable, rejects the call or does not answer in time, and with the
    /// call's failure (usually [`EchoError::Cancelled`]) when `ctx` fails first.
    pub async fn connect(
        &self,
        details: CallDetails,
        outbound: Outbound,
        ctx: &CallContext,
    ) -> Result<Call> {
        let (reader, writer) = tokio::select! {
            biased;
            err = ctx.failed() => return Err(err),
            established = timeout(self.config.connect_timeout, self.handshake(&details)) => {
                established.map_err(|_| {
                    EchoError::ConnectionFailed(format!(
                        "no answer from {} within {:?}",
                        self.addr, self.config.connect_timeout
                    ))
                })??
            }
        };

        debug!(addr = %self.addr, method = %details.method, "Call established");

        let connection = ctx.child_token();
        tokio::spawn(
            pump_outbound(
                writer,
                outbound,
                ctx.clone(),
                connection.clone(),
                self.config.write_timeout,
            )
            .instrument(Span::current()),
        );
        let inbound = inbound_stream(reader, ctx.clone(), connection.clone());

        Ok(Call::new(inbound, connection.drop_guard()))
    }

    async fn handshake(&self, details: &CallDetails) -> Result<(FrameReader, FrameWriter)> {
        let stream = TcpStream::connect(self.addr).await.map_err(|e| {
            EchoError::ConnectionFailed(format!("Failed to connect to {}: {}", self.addr, e))
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| EchoError::ConnectionFailed(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let codec = FrameCodec::new(self.config.max_frame_size);
        let mut reader = FramedRead::new(read_half, codec.clone());
        let mut writer = FramedWrite::new(write_half, codec);

        writer
            .send(Frame::Open {
                method: details.method.clone(),
                metadata: details.metadata.clone(),
            })
            .await
            .map_err(|e| EchoError::ConnectionFailed(format!("call setup failed: {e}")))?;

        match reader.next().await {
            Some(Ok(Frame::Ready)) => Ok((reader, writer)),
            Some(Ok(Frame::Reject { reason })) => Err(EchoError::ConnectionFailed(format!(
                "call rejected by {}: {}",
                self.addr, reason
            ))),
            Some(Ok(other)) => Err(EchoError::ConnectionFailed(format!(
                "unexpected {} frame during call setup",
                other.kind()
            ))),
            Some(Err(e)) => Err(EchoError::ConnectionFailed(format!("call setup failed: {e}"))),
            None => Err(EchoError::ConnectionFailed(
                "connection closed during call setup".to_string(),
            )),
        }
    }
}

/// Drains `outbound` into the socket, finishing with an `End` frame.
async fn pump_outbound(
    mut writer: FrameWriter,
    mut outbound: Outbound,
    ctx: CallContext,
    connection: CancellationToken,
    write_timeout: Option<Duration>,
) {
    let mut sent: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = connection.cancelled() => return,
            _ = ctx.failed() => return,
            next = outbound.next() => next,
        };

        let frame = match next {
            Some(message) => Frame::Message(message),
            None => Frame::End,
        };
        let is_end = frame == Frame::End;

        let written = tokio::select! {
            biased;
            _ = connection.cancelled() => return,
            _ = ctx.failed() => return,
            written = send_frame(&mut writer, frame, write_timeout) => written,
        };

        if let Err(e) = written {
            warn!(error = %e, sent, "Outbound write failed");
            ctx.fail(e);
            return;
        }

        if is_end {
            debug!(sent, "Writes closed");
            return;
        }
        sent += 1;
    }
}

/// Writes one frame; without a limit it waits as long as the peer applies backpressure.
async fn send_frame(writer: &mut FrameWriter, frame: Frame, limit: Option<Duration>) -> Result<()> {
    let sent = match limit {
        Some(limit) => timeout(limit, writer.send(frame)).await.map_err(|_| {
            EchoError::TransportBroken(format!("write timed out after {limit:?}"))
        })?,
        None => writer.send(frame).await,
    };
    sent.map_err(|e| EchoError::TransportBroken(format!("write failed: {e}")))
}

struct ReadState {
    reader: FrameReader,
    ctx: CallContext,
    connection: CancellationToken,
}

/// Lazily reads frames until `End`; anything else ending the stream is a broken transport.
fn inbound_stream(reader: FrameReader, ctx: CallContext, connection: CancellationToken) -> Inbound {
    let state = ReadState {
        reader,
        ctx,
        connection,
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;

        let next: Result<Option<Message>> = tokio::select! {
            biased;
            _ = state.connection.cancelled() => {
                Err(state.ctx.failure().unwrap_or(EchoError::Cancelled))
            }
            err = state.ctx.failed() => Err(err),
            frame = state.reader.next() => match frame {
                Some(Ok(Frame::Message(message))) => Ok(Some(message)),
                Some(Ok(Frame::End)) => Ok(None),
                Some(Ok(Frame::Abort { reason })) => Err(EchoError::TransportBroken(format!(
                    "peer aborted the call: {reason}"
                ))),
                Some(Ok(other)) => Err(EchoError::TransportBroken(format!(
                    "unexpected {} frame mid-stream",
                    other.kind()
                ))),
                Some(Err(e)) => Err(EchoError::TransportBroken(format!("read failed: {e}"))),
                None => Err(EchoError::TransportBroken(
                    "connection closed before end of stream".to_string(),
                )),
            },
        };

        match next {
            Ok(Some(message)) => Some((Ok(message), Some(state))),
            Ok(None) => {
                debug!("Inbound stream ended");
                None
            }
            Err(err) => {
                let err = state.ctx.fail(err);
                Some((Err(err), None))
            }
        }
    })
    .boxed()
}
