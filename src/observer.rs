//! Typed observer registry with RAII subscriptions.
//!
//! Everything here lives on the UI task (`Rc`/`RefCell`), so notification never
//! crosses threads.
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Implemented by anything that re-renders when a value it watches changes.
pub trait Observer<T: ?Sized> {
    fn on_result_changed(&mut self, value: &T);
}

type SharedObserver<T> = Rc<RefCell<dyn Observer<T>>>;

struct Entry<T: ?Sized> {
    id: u64,
    observer: SharedObserver<T>,
}

struct Inner<T: ?Sized> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

pub struct ObserverRegistry<T: ?Sized> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: ?Sized + 'static> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner { next_id: 0, entries: Vec::new() })),
        }
    }

    /// Registers `observer`; it stays registered until the returned handle is dropped.
    #[must_use = "dropping the subscription unregisters the observer"]
    pub fn subscribe<O>(&self, observer: Rc<RefCell<O>>) -> Subscription
    where
        O: Observer<T> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(Entry { id, observer });

        let weak: Weak<RefCell<Inner<T>>> = Rc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().entries.retain(|e| e.id != id);
                }
            })),
        }
    }

    /// Calls every observer in subscription order.
    ///
    /// The list is snapshotted first so observers may subscribe or drop their
    /// handle from inside the callback; one removed mid-pass is skipped.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<(u64, SharedObserver<T>)> = self
            .inner
            .borrow()
            .entries
            .iter()
            .map(|e| (e.id, Rc::clone(&e.observer)))
            .collect();

        for (id, observer) in snapshot {
            let still_registered = self.inner.borrow().entries.iter().any(|e| e.id == id);
            if still_registered {
                observer.borrow_mut().on_result_changed(value);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }
}

impl<T: ?Sized + 'static> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters its observer when dropped.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
