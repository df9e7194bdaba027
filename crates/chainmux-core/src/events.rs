//! Synchronous, per-kind observer sets.
//!
//! `emit` calls every handler registered for the event's kind on the
//! caller's stack, in registration order. Handlers are snapshotted before
//! being called, so a handler may register or remove listeners (including
//! itself) without deadlocking.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Events that can be grouped by a copyable kind.
pub trait EventKind {
    type Kind: Copy + Eq + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// A registered event handler.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E: EventKind> {
    id: u64,
    kind: E::Kind,
    handler: Handler<E>,
}

struct Listeners<E: EventKind> {
    next_id: u64,
    entries: Vec<Listener<E>>,
}

/// Observer set dispatching events to handlers registered for their kind.
pub struct EventEmitter<E: EventKind> {
    listeners: Arc<Mutex<Listeners<E>>>,
}

impl<E: EventKind + 'static> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn on(&self, kind: E::Kind, handler: Handler<E>) -> ListenerHandle {
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push(Listener { id, kind, handler });
            id
        };

        let weak: Weak<Mutex<Listeners<E>>> = Arc::downgrade(&self.listeners);
        ListenerHandle {
            off: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.lock().entries.retain(|l| l.id != id);
                }
            })),
        }
    }

    /// Call every handler registered for `event.kind()`.
    ///
    /// Returns the number of handlers called.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler<E>> = self
            .listeners
            .lock()
            .entries
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.handler))
            .collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers registered for `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners
            .lock()
            .entries
            .iter()
            .filter(|l| l.kind == kind)
            .count()
    }
}

impl<E: EventKind + 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by `on`; call [`remove`](ListenerHandle::remove) to unregister.
///
/// Dropping the handle keeps the listener registered.
pub struct ListenerHandle {
    off: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    /// A handle for a listener that was never registered.
    pub fn detached() -> Self {
        Self { off: None }
    }

    /// Unregister the listener.
    pub fn remove(mut self) {
        if let Some(off) = self.off.take() {
            off();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("registered", &self.off.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Ping {
        A,
        B,
    }

    impl EventKind for Ping {
        type Kind = Ping;

        fn kind(&self) -> Ping {
            *self
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Handler<Ping>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn dispatches_by_kind() {
        let emitter = EventEmitter::<Ping>::new();
        let (a, ha) = counter();
        let (b, hb) = counter();
        let _ = emitter.on(Ping::A, ha);
        let _ = emitter.on(Ping::B, hb);

        assert_eq!(emitter.emit(&Ping::A), 1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_unregisters() {
        let emitter = EventEmitter::<Ping>::new();
        let (a, ha) = counter();
        emitter.on(Ping::A, ha).remove();

        assert_eq!(emitter.emit(&Ping::A), 0);
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(Ping::A), 0);
    }

    #[test]
    fn handler_may_register_during_emit() {
        let emitter = Arc::new(EventEmitter::<Ping>::new());
        let inner = Arc::clone(&emitter);
        let _ = emitter.on(
            Ping::A,
            Arc::new(move |_| {
                let _ = inner.on(Ping::B, Arc::new(|_| {}));
            }),
        );

        emitter.emit(&Ping::A);
        assert_eq!(emitter.listener_count(Ping::B), 1);
    }
}
