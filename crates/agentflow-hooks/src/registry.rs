//! Hook registry: manages hook subscriptions and dispatches events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::events::SchedulerEvent;

/// Async hook handler function type.
pub type HookHandler =
    Arc<dyn Fn(SchedulerEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Manages hook subscriptions and dispatches events.
pub struct HookRegistry {
    /// Map from event type name to handlers.
    handlers: RwLock<HashMap<String, Vec<HookHandler>>>,
}

impl HookRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a specific event type ("*" for all events).
    pub async fn on(&self, event_type: &str, handler: HookHandler) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Register a handler for multiple event types.
    pub async fn on_many(&self, event_types: &[&str], handler: HookHandler) {
        for event_type in event_types {
            self.on(event_type, handler.clone()).await;
        }
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Handlers run as detached tasks; a slow handler never delays the caller.
    pub async fn emit(&self, event: SchedulerEvent) {
        let handlers = self.handlers.read().await;
        let matching = handlers
            .get(event.type_name())
            .into_iter()
            .chain(handlers.get("*"))
            .flatten();

        for handler in matching {
            let event_clone = event.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                handler(event_clone).await;
            });
        }
    }

    /// Number of handlers subscribed to an event type.
    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
