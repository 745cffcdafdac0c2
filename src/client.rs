use crate::duplex::DuplexCall;
use crate::interceptor::{InterceptorChain, StreamInterceptor};
use crate::transport::{CallDetails, ClientConfig, Transport};
use crate::{ECHO_METHOD, EchoError, Message, Result};
use futures::TryStreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, info};

/// Client for the echo service
///
/// Cheap to clone. Every call gets its own connection and runs through the
/// interceptors configured here.
///
/// # Examples
///
/// ```no_run
/// use echorpc::{EchoClient, Message, PassThrough, run_session};
///
/// #[tokio::main]
/// async fn main() -> echorpc::Result<()> {
///     let client = EchoClient::new("127.0.0.1:50051".parse().unwrap())
///         .with_interceptor(PassThrough);
///
///     let messages = vec![Message::new("a"), Message::new("b")];
///     let responses = run_session(client.echo(), messages, None).await?;
///     assert_eq!(responses, vec![Message::new("a"), Message::new("b")]);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EchoClient {
    transport: Arc<Transport>,
    chain: InterceptorChain,
}

impl EchoClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_config(addr, ClientConfig::default())
    }

    pub fn with_config(addr: SocketAddr, config: ClientConfig) -> Self {
        Self {
            transport: Arc::new(Transport::new(addr, config)),
            chain: InterceptorChain::new(),
        }
    }

    /// Adds an interceptor inside the ones already configured
    pub fn with_interceptor(mut self, interceptor: impl StreamInterceptor) -> Self {
        self.chain = self.chain.with(interceptor);
        self
    }

    pub fn with_chain(mut self, chain: InterceptorChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Opens an `Echo` call
    pub fn echo(&self) -> DuplexCall {
        self.call(CallDetails::new(ECHO_METHOD))
    }

    /// Opens a call to an arbitrary method
    pub fn call(&self, details: CallDetails) -> DuplexCall {
        DuplexCall::start(self.transport.clone(), self.chain.clone(), details)
    }
}

/// Drives one call with a sender task and a receiver task.
///
/// The sender waits for the connection, writes every message (sleeping
/// `interval` before each one when given) and closes writes. The receiver
/// waits for the connection and drains responses until end of stream. The
/// two run independently; the result is the receiver's responses, or the
/// first error, preferring the receiver's.
pub async fn run_session<I>(
    call: DuplexCall,
    messages: I,
    interval: Option<Duration>,
) -> Result<Vec<Message>>
where
    I: IntoIterator<Item = Message> + Send + 'static,
    I::IntoIter: Send,
{
    let call = Arc::new(call);

    let sender = tokio::spawn(send_all(call.clone(), messages, interval));
    let receiver = tokio::spawn(receive_all(call.clone()));
    let (sent, received) = tokio::join!(sender, receiver);

    let responses = received.map_err(task_failed)??;
    let sent = sent.map_err(task_failed)??;
    call.done().await?;

    info!(sent, received = responses.len(), "Session complete");
    Ok(responses)
}

async fn send_all<I>(call: Arc<DuplexCall>, messages: I, interval: Option<Duration>) -> Result<usize>
where
    I: IntoIterator<Item = Message>,
{
    call.wait_for_connection().await?;

    let mut sent = 0;
    for message in messages {
        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
        call.write(message).await?;
        sent += 1;
        if sent % 1000 == 0 {
            debug!(sent, "Sending");
        }
    }

    call.close_writes().await?;
    Ok(sent)
}

async fn receive_all(call: Arc<DuplexCall>) -> Result<Vec<Message>> {
    call.wait_for_connection().await?;
    call.responses().try_collect().await
}

fn task_failed(err: JoinError) -> EchoError {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    EchoError::Cancelled
}
