//! Serializing listener decorator.
//!
//! Any number of producers may call [`EventListener::on_event`] concurrently;
//! the wrapped listener sees envelopes one at a time, in the order they were
//! accepted, from a single delivery task.

use std::sync::Arc;
use taskloop_core::{Error, EventListener, WorkflowEnvelope};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

enum Delivery {
    Envelope(Box<WorkflowEnvelope>),
    Flush(oneshot::Sender<()>),
}

pub struct SerializingListener {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl SerializingListener {
    /// Wrap `inner`. Spawns the delivery task on the current tokio runtime.
    pub fn new(inner: Arc<dyn EventListener>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Envelope(envelope) => {
                        if let Err(e) = inner.on_event(&envelope) {
                            warn!(
                                seq = envelope.seq(),
                                event_type = %envelope.event_type,
                                "event listener failed: {}",
                                e
                            );
                        }
                    }
                    Delivery::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Resolves once everything accepted before this call has been delivered.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Delivery::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

impl EventListener for SerializingListener {
    fn on_event(&self, envelope: &WorkflowEnvelope) -> taskloop_core::Result<()> {
        self.tx
            .send(Delivery::Envelope(Box::new(envelope.clone())))
            .map_err(|_| Error::Internal("event delivery task has stopped".into()))
    }
}

/// Fans one envelope out to several listeners, in registration order.
#[derive(Default)]
pub struct ListenerChain {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl ListenerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl EventListener for ListenerChain {
    /// Every listener is called even if an earlier one fails; the first error is returned.
    fn on_event(&self, envelope: &WorkflowEnvelope) -> taskloop_core::Result<()> {
        let mut first_err = None;
        for listener in &self.listeners {
            if let Err(e) = listener.on_event(envelope) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
