use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::event_sourcing::core::{DomainEvent, EventSourcingError, Result};

// ============================================================================
// Event Bus - In-Process Publish/Subscribe
// ============================================================================
//
// Handlers are keyed by event type tag and invoked synchronously, in
// registration order, on the publishing thread. The registry is explicit
// shared state: build one per process and hand it to every bus clone.
//
// ============================================================================

/// Subscriber for committed events.
///
/// Identity is the concrete handler type, so one handler type can only be
/// registered once per event type.
pub trait EventHandler<E>: Send + Sync {
    fn handle(&self, event: &E) -> anyhow::Result<()>;

    fn handler_id(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

type Handlers<E> = Vec<Arc<dyn EventHandler<E>>>;

/// Lock-protected map from event type tag to ordered handlers.
pub struct SubscriptionRegistry<E> {
    subscriptions: RwLock<HashMap<String, Handlers<E>>>,
}

impl<E> SubscriptionRegistry<E> {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.subscriptions
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    pub fn is_subscribed(&self, event_type: &str) -> bool {
        self.subscriptions.read().contains_key(event_type)
    }

    /// Drop every subscription. Called on shutdown.
    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }

    fn handlers_for(&self, event_type: &str) -> Option<Handlers<E>> {
        self.subscriptions.read().get(event_type).cloned()
    }
}

impl<E> Default for SubscriptionRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventBus<E> {
    registry: Arc<SubscriptionRegistry<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: DomainEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(Arc::new(SubscriptionRegistry::new()))
    }
}

impl<E: DomainEvent> EventBus<E> {
    pub fn new(registry: Arc<SubscriptionRegistry<E>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry<E>> {
        &self.registry
    }

    /// Register `handler` for `event_type`. Re-subscribing the same handler
    /// type is a no-op.
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler<E>>) {
        let mut subscriptions = self.registry.subscriptions.write();
        let handlers = subscriptions.entry(event_type.to_string()).or_default();

        if handlers.iter().any(|h| h.handler_id() == handler.handler_id()) {
            return;
        }

        tracing::debug!(
            event_type = event_type,
            handler = handler.handler_id(),
            "Subscribed handler"
        );
        handlers.push(handler);
    }

    /// Remove one registration of `handler` for `event_type`. The type entry
    /// disappears with its last handler.
    pub fn unsubscribe(&self, event_type: &str, handler: &dyn EventHandler<E>) {
        let mut subscriptions = self.registry.subscriptions.write();

        let Some(handlers) = subscriptions.get_mut(event_type) else {
            return;
        };

        if let Some(position) = handlers.iter().position(|h| h.handler_id() == handler.handler_id()) {
            handlers.remove(position);
            tracing::debug!(
                event_type = event_type,
                handler = handler.handler_id(),
                "Unsubscribed handler"
            );
        }

        if handlers.is_empty() {
            subscriptions.remove(event_type);
        }
    }

    /// Deliver `event` to every handler registered for its type.
    ///
    /// The registry lock is released before handlers run, so a handler may
    /// itself subscribe or publish. The first failing handler stops delivery.
    pub fn publish(&self, event: &E, throw_if_unsubscribed: bool) -> Result<()> {
        let event_type = event.event_type();

        let Some(handlers) = self.registry.handlers_for(event_type) else {
            if throw_if_unsubscribed {
                return Err(EventSourcingError::NoSubscriber {
                    event_type: event_type.to_string(),
                });
            }
            return Ok(());
        };

        for handler in handlers {
            tracing::debug!(event_type = event_type, handler = handler.handler_id(), "Dispatching event");

            handler
                .handle(event)
                .map_err(|source| EventSourcingError::Handler {
                    handler: handler.handler_id(),
                    event_type: event_type.to_string(),
                    source,
                })?;
        }

        Ok(())
    }
}
