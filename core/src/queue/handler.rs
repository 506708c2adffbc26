//! Event handler trait

use super::event::QueuedEvent;
use crate::error::HandlerError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Processes events drained from the queue
///
/// Handlers run outside every queue lock and are always called through the
/// queue's circuit breaker. An `Err` counts as a failed attempt.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs
    fn name(&self) -> &'static str {
        "handler"
    }

    /// Process one event
    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError> {
        (**self).handle(event).await
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Adapt an async closure into an [`EventHandler`]
///
/// The closure receives its own copy of the event.
///
/// ```ignore
/// queue.start(handler_fn(|event| async move {
///     deliver(&event.payload).await.map_err(|e| HandlerError::Failed(e.to_string()))
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(QueuedEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(QueuedEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn name(&self) -> &'static str {
        "fn"
    }

    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}
