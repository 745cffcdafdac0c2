use super::{Next, StreamInterceptor};
use crate::Result;
use crate::transport::{Call, CallDetails, Outbound};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{info, warn};

/// Forwards call details and outbound messages unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl StreamInterceptor for PassThrough {
    fn name(&self) -> &str {
        "pass-through"
    }

    async fn intercept(&self, details: CallDetails, outbound: Outbound, next: Next) -> Result<Call> {
        next.run(details, outbound).await
    }
}

/// Adds one metadata entry to every call, replacing an existing value
#[derive(Debug, Clone)]
pub struct MetadataInterceptor {
    key: String,
    value: String,
}

impl MetadataInterceptor {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl StreamInterceptor for MetadataInterceptor {
    fn name(&self) -> &str {
        "metadata"
    }

    async fn intercept(
        &self,
        mut details: CallDetails,
        outbound: Outbound,
        next: Next,
    ) -> Result<Call> {
        details
            .metadata
            .insert(self.key.clone(), self.value.clone());
        next.run(details, outbound).await
    }
}

/// Counters shared by all calls passing a [`LoggingInterceptor`]
#[derive(Debug, Default)]
pub struct CallStats {
    started: AtomicU64,
    established: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
}

impl CallStats {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }

    /// Messages taken from the outbound stream by the transport; a message
    /// whose write later fails is still counted
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages delivered to the reader
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Logs call setup and failures, and counts messages in both directions
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    stats: Arc<CallStats>,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<CallStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl StreamInterceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn intercept(&self, details: CallDetails, outbound: Outbound, next: Next) -> Result<Call> {
        let method = details.method.clone();
        let started = Instant::now();
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        info!(%method, metadata = ?details.metadata, "Starting call");

        let stats = self.stats.clone();
        let outbound = outbound
            .inspect(move |_| {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            })
            .boxed();

        let call = match next.run(details, outbound).await {
            Ok(call) => call,
            Err(e) => {
                warn!(%method, error = %e, "Call establishment failed");
                return Err(e);
            }
        };

        self.stats.established.fetch_add(1, Ordering::Relaxed);
        info!(%method, elapsed = ?started.elapsed(), "Call established");

        let stats = self.stats.clone();
        Ok(call.map_inbound(move |inbound| {
            inbound
                .inspect(move |item| match item {
                    Ok(_) => {
                        stats.received.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(%method, error = %e, "Call failed"),
                })
                .boxed()
        }))
    }
}
