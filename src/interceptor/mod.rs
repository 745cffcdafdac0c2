//! Interceptors around call establishment
//!
//! An interceptor sees the call details and the outbound message stream,
//! and decides how to continue: it may add metadata, wrap either direction
//! or log, then hands over to [`Next`]. `Next` is consumed when run, so a link
//! continues at most once. A link that never continues leaves the call
//! connecting until the connect timeout elapses or the call is cancelled.
//!
//! # Example
//!
//! ```no_run
//! use echorpc::{EchoClient, LoggingInterceptor, MetadataInterceptor, PassThrough};
//!
//! # async fn example() -> echorpc::Result<()> {
//! let client = EchoClient::new("127.0.0.1:50051".parse().unwrap())
//!     .with_interceptor(LoggingInterceptor::new())
//!     .with_interceptor(MetadataInterceptor::new("x-client", "demo"))
//!     .with_interceptor(PassThrough);
//!
//! let call = client.echo();
//! call.wait_for_connection().await?;
//! # Ok(())
//! # }
//! ```

pub mod builtin;

pub use builtin::{CallStats, LoggingInterceptor, MetadataInterceptor, PassThrough};

use crate::transport::{Call, CallDetails, Outbound};
use crate::{EchoError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Continuation = Box<dyn FnOnce(CallDetails, Outbound) -> BoxFuture<'static, Result<Call>> + Send>;

/// A link in the interceptor chain
#[async_trait]
pub trait StreamInterceptor: Send + Sync + 'static {
    /// Name used when reporting a failure of this link
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Establishes the call, normally by running `next` exactly once.
    ///
    /// Errors returned by `next` should be passed on unchanged. Any other
    /// error reaches the caller as [`EchoError::InterceptorFailed`].
    async fn intercept(&self, details: CallDetails, outbound: Outbound, next: Next) -> Result<Call>;
}

/// The rest of the chain, ending at the transport connect
pub struct Next {
    continuation: Continuation,
    downstream_failed: Arc<AtomicBool>,
}

impl Next {
    /// Runs the next link, or connects when this is the last one
    pub async fn run(self, details: CallDetails, outbound: Outbound) -> Result<Call> {
        let result = (self.continuation)(details, outbound).await;
        if result.is_err() {
            self.downstream_failed.store(true, Ordering::Release);
        }
        result
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// An ordered list of interceptors
///
/// The first interceptor added is the outermost one: it runs first when a
/// call is established and sees the final result last. The chain holds no
/// per-call state.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    links: Vec<Arc<dyn StreamInterceptor>>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("links", &self.links.iter().map(|l| l.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor; it runs inside all interceptors added before it
    pub fn push(&mut self, interceptor: Arc<dyn StreamInterceptor>) {
        self.links.push(interceptor);
    }

    pub fn with(mut self, interceptor: impl StreamInterceptor) -> Self {
        self.push(Arc::new(interceptor));
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Runs the chain outermost-first and finally `terminal`.
    pub async fn connect<F, Fut>(
        &self,
        details: CallDetails,
        outbound: Outbound,
        terminal: F,
    ) -> Result<Call>
    where
        F: FnOnce(CallDetails, Outbound) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Call>> + Send + 'static,
    {
        let mut next: Continuation =
            Box::new(move |details: CallDetails, outbound: Outbound| -> BoxFuture<'static, Result<Call>> {
                Box::pin(terminal(details, outbound))
            });

        for link in self.links.iter().rev() {
            next = wrap(link.clone(), next);
        }

        next(details, outbound).await
    }
}

fn wrap(link: Arc<dyn StreamInterceptor>, continuation: Continuation) -> Continuation {
    Box::new(move |details: CallDetails, outbound: Outbound| -> BoxFuture<'static, Result<Call>> {
        Box::pin(async move {
            let downstream_failed = Arc::new(AtomicBool::new(false));
            let next = Next {
                continuation,
                downstream_failed: downstream_failed.clone(),
            };

            match link.intercept(details, outbound, next).await {
                Ok(call) => Ok(call),
                Err(err) if downstream_failed.load(Ordering::Acquire) => Err(err),
                Err(err @ EchoError::InterceptorFailed(_)) => Err(err),
                Err(err) => Err(EchoError::InterceptorFailed(format!("{}: {}", link.name(), err))),
            }
        })
    })
}
