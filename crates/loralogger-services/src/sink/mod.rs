//! Persistence sinks.
//!
//! A sink takes one [`Record`] and makes it durable somewhere. Sinks hold
//! nothing across calls except their own resource handle. The
//! [`SinkChain`] runs them in a fixed order under an explicit
//! [`SinkPolicy`].

pub mod dynamodb;
pub mod rotating_log;
pub mod ttl_store;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use loralogger_core::config::SinkPolicy;

use crate::record::Record;

/// Errors a single sink can report.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("blocking sink task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A sink failure, tagged with the sink that produced it.
#[derive(Debug, thiserror::Error)]
#[error("{sink} sink failed: {source}")]
pub struct PersistError {
    pub sink: &'static str,
    #[source]
    pub source: SinkError,
}

/// Something that can durably record a datagram.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn write(&self, record: &Record) -> Result<(), SinkError>;
}

/// Ordered list of sinks sharing one policy.
///
/// With [`SinkPolicy::FailFast`] the first failure ends the chain and
/// later sinks never see the record. With [`SinkPolicy::BestEffort`] every
/// sink is attempted and the first failure is returned.
#[derive(Clone)]
pub struct SinkChain {
    sinks: Vec<Arc<dyn Sink>>,
    policy: SinkPolicy,
}

impl SinkChain {
    pub fn new(policy: SinkPolicy) -> Self {
        Self {
            sinks: Vec::new(),
            policy,
        }
    }

    /// Append a sink. Sinks run in the order they were added.
    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Arc<dyn Sink>) -> Self {
        self.push(sink);
        self
    }

    pub fn policy(&self) -> SinkPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Hand the record to each sink in order.
    pub async fn persist(&self, record: &Record) -> Result<(), PersistError> {
        let mut first_failure: Option<PersistError> = None;

        for sink in &self.sinks {
            match sink.write(record).await {
                Ok(()) => {
                    tracing::trace!(sink = sink.name(), gateway_id = %record.gateway_id, "record written");
                }
                Err(source) => {
                    let err = PersistError {
                        sink: sink.name(),
                        source,
                    };
                    match self.policy {
                        SinkPolicy::FailFast => return Err(err),
                        SinkPolicy::BestEffort => {
                            if first_failure.is_none() {
                                first_failure = Some(err);
                            } else {
                                tracing::warn!(
                                    gateway_id = %record.gateway_id,
                                    error = %err,
                                    "additional sink failure"
                                );
                            }
                        }
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
