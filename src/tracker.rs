use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Delivery mode for a [`ChangeTracker`] subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// Runs a single time: immediately when a value is present, otherwise
    /// when the first value is published.
    Once,
    /// Runs for the current value (if any) and for every later publish.
    EveryChange,
}

type OnceCallback<T> = Box<dyn FnOnce(&T)>;
type ChangeCallback<T> = Rc<dyn Fn(&T)>;

struct TrackerState<T> {
    value: Option<T>,
    once: Vec<OnceCallback<T>>,
    every_change: Vec<ChangeCallback<T>>,
}

/// Single-value observable cell shared between plugins.
///
/// Cloning a tracker yields another handle to the same cell, so a
/// subscription made through one handle sees values published through any
/// other. Callbacks run with no borrow held on the cell; publishing or
/// subscribing from inside a callback is allowed and nested publishes are
/// delivered depth-first.
pub struct ChangeTracker<T> {
    state: Rc<RefCell<TrackerState<T>>>,
}

impl<T> Clone for ChangeTracker<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + 'static> Default for ChangeTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for ChangeTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ChangeTracker")
            .field("value", &state.value)
            .field("once", &state.once.len())
            .field("every_change", &state.every_change.len())
            .finish()
    }
}

impl<T: Clone + 'static> ChangeTracker<T> {
    /// Creates a cell that has not received a value yet.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(TrackerState {
                value: None,
                once: Vec::new(),
                every_change: Vec::new(),
            })),
        }
    }

    /// Creates a cell that already holds `value`.
    pub fn with_value(value: T) -> Self {
        let tracker = Self::new();
        tracker.state.borrow_mut().value = Some(value);
        tracker
    }

    pub fn has_value(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    /// Returns a copy of the current value.
    pub fn value(&self) -> Option<T> {
        self.state.borrow().value.clone()
    }

    /// Publishes `value`, resolving pending `Once` subscribers and then
    /// notifying every `EveryChange` subscriber in registration order.
    ///
    /// Publishing the same value twice notifies twice. A callback that
    /// republishes this cell has its value delivered to the remaining
    /// subscribers before the value that triggered it, so the last value a
    /// subscriber saw may be older than [`ChangeTracker::value`].
    pub fn set_value(&self, value: T) {
        let (once, every_change) = {
            let mut state = self.state.borrow_mut();
            state.value = Some(value.clone());
            (
                std::mem::take(&mut state.once),
                state.every_change.clone(),
            )
        };
        for callback in once {
            callback(&value);
        }
        for callback in &every_change {
            callback(&value);
        }
    }

    /// Registers `callback` with the given delivery mode.
    ///
    /// When the cell already holds a value the callback runs before this
    /// method returns.
    pub fn subscribe<F>(&self, kind: Subscription, callback: F)
    where
        F: Fn(&T) + 'static,
    {
        let current = self.value();
        match kind {
            Subscription::Once => match current {
                Some(value) => callback(&value),
                None => self.state.borrow_mut().once.push(Box::new(callback)),
            },
            Subscription::EveryChange => {
                let callback: ChangeCallback<T> = Rc::new(callback);
                self.state
                    .borrow_mut()
                    .every_change
                    .push(Rc::clone(&callback));
                if let Some(value) = current {
                    callback(&value);
                }
            }
        }
    }

    /// Number of callbacks still waiting for delivery of the given kind.
    pub fn subscriber_count(&self, kind: Subscription) -> usize {
        let state = self.state.borrow();
        match kind {
            Subscription::Once => state.once.len(),
            Subscription::EveryChange => state.every_change.len(),
        }
    }

    /// Returns `true` when both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}
