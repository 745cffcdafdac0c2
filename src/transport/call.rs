use crate::wire::Metadata;
use crate::{Message, Result};
use futures::stream::BoxStream;
use std::fmt;
use tokio_util::sync::DropGuard;

/// Messages the caller writes, in send order
pub type Outbound = BoxStream<'static, Message>;

/// Messages the peer sent, ending cleanly at end of stream or with one error
pub type Inbound = BoxStream<'static, Result<Message>>;

/// What is being called
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDetails {
    /// Fully qualified method, e.g. `/echo.EchoService/Echo`
    pub method: String,
    /// Sent to the server with call setup
    pub metadata: Metadata,
}

impl CallDetails {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An established call as seen by the interceptor chain
///
/// Owns the inbound side of the connection. Dropping a `Call` tears the
/// connection down, so a call that an interceptor discards never stays open.
pub struct Call {
    inbound: Inbound,
    teardown: DropGuard,
}

impl Call {
    pub(crate) fn new(inbound: Inbound, teardown: DropGuard) -> Self {
        Self { inbound, teardown }
    }

    /// Replaces the inbound stream, e.g. to observe or transform responses
    pub fn map_inbound<F>(self, f: F) -> Self
    where
        F: FnOnce(Inbound) -> Inbound,
    {
        Self {
            inbound: f(self.inbound),
            teardown: self.teardown,
        }
    }

    pub fn into_parts(self) -> (Inbound, DropGuard) {
        (self.inbound, self.teardown)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call").finish_non_exhaustive()
    }
}
