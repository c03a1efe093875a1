//! Event handler trait + registry.
//!
//! Handlers are where classified events are "processed into the store".
//! They run inline in the crawl loop, so a slow handler slows the network
//! it is registered on and nothing else.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CrawlError;
use crate::types::{EventType, IndexedEvent};

/// Trait for event consumers registered on a crawler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for each classified event this handler accepts.
    async fn handle(&self, event: &IndexedEvent) -> Result<(), CrawlError>;

    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Event types this handler wants. Defaults to all of them.
    fn accepts(&self, _event_type: EventType) -> bool {
        true
    }
}

/// Ordered collection of handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch an event to every accepting handler, in registration order.
    /// The first handler error aborts the dispatch.
    pub async fn dispatch_event(&self, event: &IndexedEvent) -> Result<(), CrawlError> {
        for handler in &self.handlers {
            if !handler.accepts(event.event_type) {
                continue;
            }
            handler.handle(event).await.map_err(|e| match e {
                CrawlError::Handler { .. } => e,
                other => CrawlError::Handler {
                    handler: handler.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(())
    }
}
