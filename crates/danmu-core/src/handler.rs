//! Event handlers and the in-session dispatcher.
//!
//! The dispatcher fans each event out to every registered handler, one
//! event at a time and in registration order. Handlers are isolated from
//! each other: an error or a panic in one is logged and counted, and the
//! rest still see the event.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::HandlerError;
use crate::event::LiveEvent;

/// Consumer of decoded events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &LiveEvent) -> Result<(), HandlerError>;
}

/// Builds the handlers wired to each task.
pub trait HandlerFactory: Send + Sync + 'static {
    fn handlers_for(
        &self,
        config: &StreamConfig,
    ) -> Result<Vec<Arc<dyn EventHandler>>, HandlerError>;
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct DispatchCounters {
    events: AtomicU64,
    failures: AtomicU64,
}

/// Ordered, fault-isolating fan-out to handlers.
///
/// Cheap to clone; clones share the handler list and counters. The handler
/// list is append-only.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. It sees every event dispatched after this returns.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        tracing::debug!(handler = handler.name(), "handler subscribed");
        self.handlers.write().push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Total events dispatched so far.
    pub fn events_dispatched(&self) -> u64 {
        self.counters.events.load(Ordering::Relaxed)
    }

    /// Total handler invocations that failed or panicked.
    pub fn handler_failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    /// Deliver `event` to every handler in registration order.
    pub async fn dispatch(&self, event: &LiveEvent) -> DispatchReport {
        // snapshot so subscribe() never waits on a slow handler
        let handlers: Vec<Arc<dyn EventHandler>> = self.handlers.read().clone();
        let mut report = DispatchReport::default();

        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(event))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(HandlerError::Panicked {
                        handler: handler.name().to_string(),
                        message: panic_message(panic.as_ref()),
                    })
                });

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        handler = handler.name(),
                        msg_id = event.msg_id,
                        method = %event.method,
                        error = %e,
                        "event handler failed"
                    );
                }
            }
        }

        self.counters.events.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Consume `rx` until it closes or `token` is cancelled.
    ///
    /// On cancellation every event already buffered in the channel is still
    /// dispatched before returning. Returns the number of events dispatched.
    pub async fn pump(&self, mut rx: mpsc::Receiver<LiveEvent>, token: &CancellationToken) -> u64 {
        let mut count = 0u64;
        loop {
            tokio::select! {
                biased;
                next = rx.recv() => match next {
                    Some(event) => {
                        self.dispatch(&event).await;
                        count += 1;
                    }
                    None => return count,
                },
                _ = token.cancelled() => break,
            }
        }

        rx.close();
        while let Some(event) = rx.recv().await {
            self.dispatch(&event).await;
            count += 1;
        }
        if count > 0 {
            tracing::debug!(count, "dispatch pump drained");
        }
        count
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
