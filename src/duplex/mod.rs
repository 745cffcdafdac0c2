//! The client-facing handle of one bidirectional call
//!
//! A [`DuplexCall`] is returned immediately while establishment runs in the
//! background. Its write side and read side keep separate state, so a writer
//! task and a reader task can share one handle (behind an `Arc`) without any
//! locking of their own.


use crate::interceptor::InterceptorChain;
use crate::transport::{CallContext, CallDetails, CallState, Inbound, Outbound, Transport};
use crate::{EchoError, Message, Result};
use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::DropGuard;
use tracing::{Instrument, debug, info, warn};

enum ReadSide {
    Pending,
    Streaming(Inbound),
    Finished,
}

/// One bidirectional streaming call
///
/// # Examples
///
/// ```no_run
/// use echorpc::EchoClient;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> echorpc::Result<()> {
///     let client = EchoClient::new("127.0.0.1:50051".parse().unwrap());
///     let call = Arc::new(client.echo());
///
///     let writer = {
///         let call = call.clone();
///         tokio::spawn(async move {
///             for text in ["a", "b", "c"] {
///                 call.write(text).await?;
///             }
///             call.close_writes().await
///         })
///     };
///
///     while let Some(message) = call.next_message().await? {
///         println!("Server echoed: {}", message);
///     }
///     writer.await.expect("writer panicked")?;
///     call.done().await
/// }
/// ```
pub struct DuplexCall {
    ctx: CallContext,
    writer: Mutex<Option<mpsc::Sender<Message>>>,
    writes_closed: AtomicBool,
    reader: Arc<AsyncMutex<ReadSide>>,
    reads_done: AtomicBool,
    teardown: Arc<Mutex<Option<DropGuard>>>,
}

impl DuplexCall {
    /// Starts establishing a call through `chain`; must run inside a Tokio runtime.
    pub fn start(transport: Arc<Transport>, chain: InterceptorChain, details: CallDetails) -> Self {
        let ctx = CallContext::new();
        let (sender, receiver) = mpsc::channel(transport.config().send_buffer.max(1));
        let outbound: Outbound = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        })
        .boxed();

        let reader = Arc::new(AsyncMutex::new(ReadSide::Pending));
        let teardown = Arc::new(Mutex::new(None));

        let span = tracing::info_span!("call", method = %details.method, addr = %transport.addr());
        tokio::spawn(
            establish(
                transport,
                chain,
                details,
                outbound,
                ctx.clone(),
                reader.clone(),
                teardown.clone(),
            )
            .instrument(span),
        );

        Self {
            ctx,
            writer: Mutex::new(Some(sender)),
            writes_closed: AtomicBool::new(false),
            reader,
            reads_done: AtomicBool::new(false),
            teardown,
        }
    }

    pub fn state(&self) -> CallState {
        self.ctx.state()
    }

    /// Suspends until establishment finished; fails if it did not succeed.
    pub async fn wait_for_connection(&self) -> Result<()> {
        match self.ctx.wait_for(|s| *s != CallState::Connecting).await {
            CallState::Failed => Err(self.failure()),
            _ => Ok(()),
        }
    }

    /// Queues `message` for sending, suspending while the send buffer is full.
    pub async fn write(&self, message: impl Into<Message>) -> Result<()> {
        if self.writes_closed.load(Ordering::SeqCst) {
            return Err(EchoError::WriteAfterClose);
        }
        self.wait_for_connection().await?;

        let sender = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EchoError::WriteAfterClose)?;

        tokio::select! {
            biased;
            err = self.ctx.failed() => Err(err),
            sent = sender.send(message.into()) => sent.map_err(|_| {
                self.ctx.failure().unwrap_or_else(|| {
                    EchoError::TransportBroken("outbound stream was dropped".to_string())
                })
            }),
        }
    }

    /// Signals that no more messages will be written. Reads are unaffected.
    pub async fn close_writes(&self) -> Result<()> {
        if self.writes_closed.load(Ordering::SeqCst) {
            return Err(EchoError::AlreadyClosed);
        }
        self.wait_for_connection().await?;

        let sender = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EchoError::AlreadyClosed)?;
        drop(sender);

        self.writes_closed.store(true, Ordering::SeqCst);
        if self.reads_done.load(Ordering::SeqCst) {
            self.ctx.transition(CallState::Closed);
        } else {
            self.ctx.transition(CallState::WriteHalfClosed);
        }
        debug!("Closed writes");
        Ok(())
    }

    /// Next response, or `None` at end of stream.
    ///
    /// The read side is consumed once: after end of stream every further
    /// call returns `None` straight away.
    pub async fn next_message(&self) -> Result<Option<Message>> {
        if self.reads_done.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.wait_for_connection().await?;

        let mut reader = self.reader.lock().await;
        let next = match &mut *reader {
            ReadSide::Streaming(inbound) => inbound.next().await,
            ReadSide::Finished => return Ok(None),
            ReadSide::Pending => return Err(self.failure()),
        };

        match next {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => {
                *reader = ReadSide::Finished;
                Err(err)
            }
            None => {
                *reader = ReadSide::Finished;
                self.reads_done.store(true, Ordering::SeqCst);
                if self.writes_closed.load(Ordering::SeqCst) {
                    self.ctx.transition(CallState::Closed);
                }
                debug!("Read side reached end of stream");
                Ok(None)
            }
        }
    }

    /// The read side as a stream; ends after end of stream or the first error
    pub fn responses(&self) -> impl Stream<Item = Result<Message>> + Send + '_ {
        futures::stream::unfold(false, move |failed| async move {
            if failed {
                return None;
            }
            match self.next_message().await {
                Ok(Some(message)) => Some((Ok(message), false)),
                Ok(None) => None,
                Err(err) => Some((Err(err), true)),
            }
        })
    }

    /// Suspends until the call is closed or failed
    pub async fn done(&self) -> Result<()> {
        match self.ctx.wait_for(|s| s.is_terminal()).await {
            CallState::Failed => Err(self.failure()),
            _ => Ok(()),
        }
    }

    /// Tears the call down; pending and later operations fail with `Cancelled`
    pub fn cancel(&self) {
        if !self.state().is_terminal() {
            info!("Cancelling call");
        }
        self.ctx.cancel();
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn failure(&self) -> EchoError {
        self.ctx.failure().unwrap_or(EchoError::Cancelled)
    }
}

impl Drop for DuplexCall {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

async fn establish(
    transport: Arc<Transport>,
    chain: InterceptorChain,
    details: CallDetails,
    outbound: Outbound,
    ctx: CallContext,
    reader: Arc<AsyncMutex<ReadSide>>,
    teardown: Arc<Mutex<Option<DropGuard>>>,
) {
    let connect_timeout: Duration = transport.config().connect_timeout;
    let terminal_ctx = ctx.clone();
    let mut connecting = tokio::spawn(
        async move {
            chain
                .connect(details, outbound, move |details, outbound| async move {
                    transport.connect(details, outbound, &terminal_ctx).await
                })
                .await
        }
        .in_current_span(),
    );

    let established = tokio::select! {
        biased;
        err = ctx.failed() => {
            connecting.abort();
            Err(err)
        }
        joined = timeout(connect_timeout, &mut connecting) => match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(EchoError::InterceptorFailed(
                "interceptor panicked during call setup".to_string(),
            )),
            Ok(Err(_)) => Err(EchoError::Cancelled),
            Err(_) => {
                connecting.abort();
                Err(EchoError::ConnectionFailed(format!(
                    "call not established within {connect_timeout:?}"
                )))
            }
        },
    };

    match established {
        Ok(call) => {
            let (inbound, guard) = call.into_parts();
            *reader.lock().await = ReadSide::Streaming(inbound);
            *teardown.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
            if ctx.transition(CallState::Open) {
                info!("Call open");
            }
        }
        Err(err) => {
            let err = ctx.fail(err);
            warn!(error = %err, "Call establishment failed");
        }
    }
}
