use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::warn;

pub type ListenerId = u64;

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Registry<T> {
    next_id: ListenerId,
    listeners: BTreeMap<ListenerId, Listener<T>>,
}

trait Detach {
    fn detach(&mut self, id: ListenerId) -> bool;
}

impl<T> Detach for Registry<T> {
    fn detach(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }
}

/// Ordered fan-out of events to registered callbacks.
///
/// Delivery iterates over a snapshot of the registry, so callbacks may subscribe or
/// unsubscribe while an event is in flight. A callback that panics is logged and
/// skipped; the remaining callbacks still run.
pub struct ListenerRegistry<T: 'static> {
    name: &'static str,
    inner: Rc<RefCell<Registry<T>>>,
}

/// Handle returned by `subscribe`. Dropping it keeps the listener registered.
#[derive(Clone)]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<RefCell<dyn Detach>>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let Ok(mut registry) = registry.try_borrow_mut() else {
            return false;
        };
        registry.detach(self.id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Rc::new(RefCell::new(Registry {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .listeners
            .insert(id, Rc::new(RefCell::new(listener)) as Listener<T>);
        drop(inner);

        let registry: Rc<RefCell<dyn Detach>> = self.inner.clone();
        Subscription {
            id,
            registry: Rc::downgrade(&registry),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().listeners.clear();
    }

    /// Delivers `value` to every listener in registration order.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(ListenerId, Listener<T>)> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        for (id, listener) in snapshot {
            let Ok(mut callback) = listener.try_borrow_mut() else {
                warn!(
                    event = "listener_reentrant",
                    registry = self.name,
                    listener_id = id
                );
                continue;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*callback)(value)));
            if outcome.is_err() {
                warn!(
                    event = "listener_panicked",
                    registry = self.name,
                    listener_id = id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delivers_in_registration_order() {
        let registry = ListenerRegistry::<u32>::new("test");
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            registry.subscribe(move |value: &u32| seen.borrow_mut().push(format!("{tag}{value}")));
        }

        registry.emit(&1);
        assert_eq!(*seen.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = ListenerRegistry::<u32>::new("test");
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let subscription = registry.subscribe(move |_| counter.set(counter.get() + 1));

        registry.emit(&1);
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        registry.emit(&2);

        assert_eq!(count.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::<u32>::new("test");
        let count = Rc::new(Cell::new(0));
        registry.subscribe(|_| panic!("listener failure"));
        let counter = count.clone();
        registry.subscribe(move |_| counter.set(counter.get() + 1));

        registry.emit(&1);
        registry.emit(&2);

        assert_eq!(count.get(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_delivery() {
        let registry = ListenerRegistry::<u32>::new("test");
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let calls = Rc::new(Cell::new(0));

        let own = slot.clone();
        let own_calls = calls.clone();
        let subscription = registry.subscribe(move |_| {
            own_calls.set(own_calls.get() + 1);
            if let Some(subscription) = own.borrow().as_ref() {
                subscription.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(subscription);

        let later = Rc::new(Cell::new(0));
        let later_count = later.clone();
        registry.subscribe(move |_| later_count.set(later_count.get() + 1));

        registry.emit(&1);
        registry.emit(&2);

        assert_eq!(calls.get(), 1);
        assert_eq!(later.get(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscription_outliving_registry_is_inert() {
        let registry = ListenerRegistry::<u32>::new("test");
        let subscription = registry.subscribe(|_| {});
        drop(registry);
        assert!(!subscription.unsubscribe());
    }
}
