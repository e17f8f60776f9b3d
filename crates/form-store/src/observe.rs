//! Listener registries shared by every version of a lineage.
//!
//! A registry is created once per lineage and handed from each version to
//! the next, so listeners registered on an old version keep receiving the
//! changes of its successors until they unsubscribe.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type Listener<T> = Rc<dyn Fn(&T)>;

struct Slots<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
    upstream: Option<Listener<T>>,
}

/// Listener registry of one lineage.
pub struct Observers<T> {
    slots: Rc<RefCell<Slots<T>>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Rc::clone(&self.slots),
        }
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Slots {
                next_id: 0,
                listeners: Vec::new(),
                upstream: None,
            })),
        }
    }
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`; it stays registered until the returned
    /// handle is unsubscribed.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let mut slots = self.slots.borrow_mut();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.listeners.push((id, Rc::new(listener)));

        let weak: Weak<RefCell<Slots<T>>> = Rc::downgrade(&self.slots);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    slots.borrow_mut().listeners.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Replaces the single upstream hook, notified after every listener.
    pub fn set_upstream(&self, upstream: impl Fn(&T) + 'static) {
        self.slots.borrow_mut().upstream = Some(Rc::new(upstream));
    }

    pub fn clear_upstream(&self) {
        self.slots.borrow_mut().upstream = None;
    }

    /// Delivers `event` to the listeners registered when the call starts,
    /// then to the upstream hook.
    pub fn notify(&self, event: &T) {
        let (listeners, upstream) = {
            let slots = self.slots.borrow();
            let listeners: Vec<Listener<T>> =
                slots.listeners.iter().map(|(_, l)| Rc::clone(l)).collect();
            (listeners, slots.upstream.clone())
        };
        for listener in listeners {
            listener(event);
        }
        if let Some(upstream) = upstream {
            upstream(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when both handles point at the same registry.
    pub fn same_lineage(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slots, &other.slots)
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.borrow();
        f.debug_struct("Observers")
            .field("listeners", &slots.listeners.len())
            .field("upstream", &slots.upstream.is_some())
            .finish()
    }
}

/// Handle returned by [`Observers::subscribe`].
///
/// Dropping the handle leaves the listener registered.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn unsubscribe_stops_delivery() {
        let observers = Observers::<u32>::new();
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let subscription = observers.subscribe(move |v| counter.set(counter.get() + v));

        observers.notify(&2);
        subscription.unsubscribe();
        observers.notify(&5);

        assert_eq!(seen.get(), 2);
        assert!(observers.is_empty());
    }

    #[test]
    fn listeners_added_during_notify_wait_for_next_event() {
        let observers = Observers::<u32>::new();
        let seen = Rc::new(Cell::new(0));
        let registry = observers.clone();
        let counter = Rc::clone(&seen);
        let _first = observers.subscribe(move |_| {
            let counter = Rc::clone(&counter);
            let _late = registry.subscribe(move |_| counter.set(counter.get() + 1));
        });

        observers.notify(&0);
        assert_eq!(seen.get(), 0);
        observers.notify(&0);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn upstream_runs_after_listeners() {
        let observers = Observers::<u32>::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&order);
        observers.set_upstream(move |_| log.borrow_mut().push("upstream"));
        let log = Rc::clone(&order);
        let _subscription = observers.subscribe(move |_| log.borrow_mut().push("listener"));

        observers.notify(&1);
        assert_eq!(*order.borrow(), vec!["listener", "upstream"]);
        assert!(observers.same_lineage(&observers.clone()));
    }
}
