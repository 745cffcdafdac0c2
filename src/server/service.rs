use crate::wire::{Frame, FrameCodec, Metadata};
use crate::{EchoError, Message, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::trace;

/// Requests of one call, as seen by a handler
pub struct RequestStream {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    metadata: Metadata,
    read_timeout: Option<Duration>,
    finished: bool,
}

impl RequestStream {
    pub(crate) fn new(
        reader: FramedRead<OwnedReadHalf, FrameCodec>,
        metadata: Metadata,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            reader,
            metadata,
            read_timeout,
            finished: false,
        }
    }

    /// Metadata the client sent with call setup
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Next request, or `None` once the client closed its writes
    pub async fn next_request(&mut self) -> Result<Option<Message>> {
        if self.finished {
            return Ok(None);
        }

        let next = match self.read_timeout {
            Some(limit) => timeout(limit, self.reader.next()).await.map_err(|_| {
                EchoError::TransportBroken(format!("no request within {limit:?}"))
            })?,
            None => self.reader.next().await,
        };

        match next {
            Some(Ok(Frame::Message(message))) => Ok(Some(message)),
            Some(Ok(Frame::End)) => {
                self.finished = true;
                Ok(None)
            }
            Some(Ok(other)) => Err(EchoError::Protocol(format!(
                "unexpected {} frame from client",
                other.kind()
            ))),
            Some(Err(e)) => Err(EchoError::TransportBroken(format!("read failed: {e}"))),
            None => Err(EchoError::TransportBroken(
                "client closed connection before end of stream".to_string(),
            )),
        }
    }
}

/// Responses of one call
pub struct ResponseSink {
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    write_timeout: Option<Duration>,
    sent: u64,
}

impl ResponseSink {
    pub(crate) fn new(
        writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            writer,
            write_timeout,
            sent: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.write(Frame::Message(message)).await?;
        self.sent += 1;
        Ok(())
    }

    pub(crate) async fn finish(&mut self) -> Result<()> {
        self.write(Frame::End).await
    }

    pub(crate) async fn abort(&mut self, reason: String) -> Result<()> {
        self.write(Frame::Abort { reason }).await
    }

    /// Suspends while the client is not reading, unless a write timeout is configured
    async fn write(&mut self, frame: Frame) -> Result<()> {
        let written = match self.write_timeout {
            Some(limit) => timeout(limit, self.writer.send(frame)).await.map_err(|_| {
                EchoError::TransportBroken(format!("write timed out after {limit:?}"))
            })?,
            None => self.writer.send(frame).await,
        };

        match written {
            Err(EchoError::Io(e)) => Err(EchoError::TransportBroken(format!("write failed: {e}"))),
            other => other,
        }
    }
}

/// Server-side implementation of one streaming method
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Consumes requests and produces responses until the call is done.
    ///
    /// Returning `Ok` ends the response stream cleanly; returning an error
    /// aborts the call.
    async fn handle(&self, requests: &mut RequestStream, responses: &mut ResponseSink) -> Result<()>;
}

enum LoopState {
    AwaitingRequest,
    Responding(Message),
    Done,
}

/// Echoes every request back as one response with the same text
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

#[async_trait]
impl StreamHandler for EchoService {
    async fn handle(&self, requests: &mut RequestStream, responses: &mut ResponseSink) -> Result<()> {
        let mut state = LoopState::AwaitingRequest;

        loop {
            state = match state {
                LoopState::AwaitingRequest => match requests.next_request().await? {
                    Some(request) => LoopState::Responding(request),
                    None => LoopState::Done,
                },
                LoopState::Responding(request) => {
                    trace!(size = request.text().len(), "Echoing request");
                    responses.send(Message::new(request.into_text())).await?;
                    LoopState::AwaitingRequest
                }
                LoopState::Done => return Ok(()),
            };
        }
    }
}
