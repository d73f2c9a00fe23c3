use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("result sink closed")]
    Closed,
    #[error("result sink transport error: {0}")]
    Transport(String),
}

/// Destination for serialized scan messages.
///
/// Each call delivers one whole message. Callers serialize access through
/// [`SharedSink`], so implementations never see interleaved writers.
pub trait ResultSink: Send + 'static {
    fn deliver(&mut self, message: Vec<u8>) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// A sink shared by every task of a scan (and possibly by several scans on one connection).
pub type SharedSink<S> = Arc<Mutex<S>>;

pub fn shared<S: ResultSink>(sink: S) -> SharedSink<S> {
    Arc::new(Mutex::new(sink))
}

/// Deliver one message under the sink lock. Failures are logged and reported
/// back as `false`; they never abort the caller.
pub async fn deliver_logged<S: ResultSink>(sink: &SharedSink<S>, message: Vec<u8>) -> bool {
    let mut guard = sink.lock().await;
    match guard.deliver(message).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "dropping scan message");
            false
        }
    }
}

impl ResultSink for mpsc::UnboundedSender<Vec<u8>> {
    async fn deliver(&mut self, message: Vec<u8>) -> Result<(), SinkError> {
        self.send(message).map_err(|_| SinkError::Closed)
    }
}

/// Collects messages in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub messages: Vec<Vec<u8>>,
}

impl ResultSink for MemorySink {
    async fn deliver(&mut self, message: Vec<u8>) -> Result<(), SinkError> {
        self.messages.push(message);
        Ok(())
    }
}
