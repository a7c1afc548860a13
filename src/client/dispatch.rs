//! Typed dispatch of decoded application messages.
//!
//! A registry mapping message-type strings to handler lists, with explicit
//! subscribe/unsubscribe. Subscribing returns a [`HandlerId`] acting as the
//! disposer token; multiple independent subscribers per type are supported.
//! Dispatch happens on the channel's single read task, so listeners observe
//! frames in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::codec::ChannelMessage;

pub type MessageHandler = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

/// Token returned by subscribe; pass it back to unsubscribe exactly that
/// handler.
#[derive(Debug)]
pub struct HandlerId {
    kind: String,
    id: u64,
}

impl HandlerId {
    /// Message type this handler was registered for.
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

#[derive(Clone)]
pub(crate) struct MessageRouter {
    handlers: Arc<Mutex<HashMap<String, Vec<(u64, MessageHandler)>>>>,
    next_id: Arc<AtomicU64>,
}

impl MessageRouter {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn subscribe(&self, kind: &str, handler: MessageHandler) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.lock().expect("router lock poisoned");
        handlers
            .entry(kind.to_string())
            .or_default()
            .push((id, handler));
        HandlerId {
            kind: kind.to_string(),
            id,
        }
    }

    /// Remove the handler behind `id`, reporting whether it was registered.
    pub(crate) fn unsubscribe(&self, id: &HandlerId) -> bool {
        let mut handlers = self.handlers.lock().expect("router lock poisoned");
        let Some(list) = handlers.get_mut(&id.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id.id);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(&id.kind);
        }
        removed
    }

    /// Invoke every handler registered for the message's type, in
    /// registration order. The handler list is cloned out of the lock first
    /// so a handler may subscribe or unsubscribe without deadlocking.
    pub(crate) fn dispatch(&self, message: &ChannelMessage) {
        let subscribers: Vec<MessageHandler> = {
            let handlers = self.handlers.lock().expect("router lock poisoned");
            match handlers.get(&message.kind) {
                Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
                None => {
                    trace!(kind = %message.kind, "no listeners for message type");
                    return;
                }
            }
        };
        for handler in subscribers {
            handler(message);
        }
    }

    /// Drop every registered handler. Used by disconnect.
    pub(crate) fn clear(&self) {
        self.handlers.lock().expect("router lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn message(kind: &str) -> ChannelMessage {
        ChannelMessage::new(kind, None)
    }

    #[test]
    fn multiple_subscribers_each_receive_the_message() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            router.subscribe(
                "combat",
                Arc::new(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        router.dispatch(&message("combat"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dispatch_only_reaches_matching_type() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        router.subscribe(
            "chat",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        router.dispatch(&message("combat"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        router.dispatch(&message("chat"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_handler() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicU32::new(0));

        let keep = calls.clone();
        router.subscribe(
            "chat",
            Arc::new(move |_| {
                keep.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let drop_me = calls.clone();
        let id = router.subscribe(
            "chat",
            Arc::new(move |_| {
                drop_me.fetch_add(10, Ordering::SeqCst);
            }),
        );

        assert!(router.unsubscribe(&id));
        assert!(!router.unsubscribe(&id));

        router.dispatch(&message("chat"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_releases_all_listeners() {
        let router = MessageRouter::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        router.subscribe(
            "chat",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        router.clear();
        router.dispatch(&message("chat"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
