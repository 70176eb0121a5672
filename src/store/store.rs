use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use slotmap::{new_key_type, SlotMap};
use tracing::{debug, trace};

use super::options::StoreOptions;
use crate::runtime::{Invalidator, Job, Lane, Scheduler};
use crate::utils::{noop, Cleanup};

type Subscriber<T> = Rc<dyn Fn(&T)>;

/// Activation function of a store.
///
/// Called with a [`Setter`] when the store gains its first registrant. The
/// returned cleanup, if any, runs when the last registrant leaves.
pub type StartNotifier<T> = Box<dyn Fn(Setter<T>) -> Option<Cleanup>>;

new_key_type! {
    struct RegistrantKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Subscriber,
    Condition,
}

struct Registrant<T> {
    seq: u64,
    on_value: Subscriber<T>,
    on_invalidate: Invalidator,
}

struct Condition<T> {
    seq: u64,
    target: T,
    on_value: Subscriber<T>,
    on_invalidate: Invalidator,
}

struct Registry<T> {
    subscribers: SlotMap<RegistrantKey, Registrant<T>>,
    conditions: SlotMap<RegistrantKey, Condition<T>>,
    next_seq: u64,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            subscribers: SlotMap::with_key(),
            conditions: SlotMap::with_key(),
            next_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn len(&self) -> usize {
        self.subscribers.len() + self.conditions.len()
    }
}

/// Shared cell behind every store handle.
pub(crate) struct StoreInner<T> {
    value: RefCell<Option<T>>,
    registry: RefCell<Registry<T>>,
    start: Option<StartNotifier<T>>,
    // Present iff the store has at least one registrant.
    stop: RefCell<Option<Cleanup>>,
    activating: Cell<bool>,
    options: StoreOptions<T>,
    scheduler: Scheduler,
}

impl<T: Clone + 'static> StoreInner<T> {
    pub(crate) fn new(
        value: Option<T>,
        start: Option<StartNotifier<T>>,
        options: StoreOptions<T>,
    ) -> Rc<Self> {
        let scheduler = options.scheduler.clone().unwrap_or_else(Scheduler::current);
        Rc::new(Self {
            value: RefCell::new(value),
            registry: RefCell::new(Registry::new()),
            start,
            stop: RefCell::new(None),
            activating: Cell::new(false),
            options,
            scheduler,
        })
    }

    pub(crate) fn label(&self) -> &str {
        self.options.label.as_deref().unwrap_or("<unnamed>")
    }

    fn is_active(&self) -> bool {
        self.stop.borrow().is_some()
    }

    pub(crate) fn set(&self, next: T) {
        let changed = match self.value.borrow().as_ref() {
            Some(current) => self.options.change_detection.changed(current, &next),
            None => true,
        };
        if !changed {
            trace!(store = self.label(), "value unchanged, set skipped");
            return;
        }

        *self.value.borrow_mut() = Some(next.clone());

        if !self.is_active() {
            trace!(store = self.label(), "store inactive, value stored without notifying");
            return;
        }

        let (subscribers, conditions) = {
            let registry = self.registry.borrow();

            let mut subscribers: Vec<_> = registry
                .subscribers
                .values()
                .map(|s| (s.seq, s.on_value.clone(), s.on_invalidate.clone()))
                .collect();
            subscribers.sort_unstable_by_key(|(seq, ..)| *seq);

            let mut conditions: Vec<_> = registry
                .conditions
                .values()
                .filter(|c| (self.options.matcher)(&next, &c.target))
                .map(|c| (c.seq, c.on_value.clone(), c.on_invalidate.clone()))
                .collect();
            conditions.sort_unstable_by_key(|(seq, ..)| *seq);

            (subscribers, conditions)
        };

        trace!(
            store = self.label(),
            subscribers = subscribers.len(),
            conditioned = conditions.len(),
            "value changed, notifying"
        );

        self.scheduler.dispatch(
            Lane::Subscribers,
            subscribers
                .into_iter()
                .map(|(_, on_value, on_invalidate)| bind(on_value, on_invalidate, next.clone())),
        );
        self.scheduler.dispatch(
            Lane::Conditioned,
            conditions
                .into_iter()
                .map(|(_, on_value, on_invalidate)| bind(on_value, on_invalidate, next.clone())),
        );
    }

    pub(crate) fn update(&self, f: impl FnOnce(&T) -> T) {
        // Cloned so `f` may read or write this store without a borrow conflict.
        let current = self.value.borrow().clone();
        if let Some(current) = current {
            self.set(f(&current));
        }
    }

    pub(crate) fn subscribe(
        self: &Rc<Self>,
        on_value: Subscriber<T>,
        on_invalidate: Invalidator,
    ) -> Unsubscriber {
        let key = {
            let mut registry = self.registry.borrow_mut();
            let seq = registry.next_seq();
            registry.subscribers.insert(Registrant {
                seq,
                on_value: on_value.clone(),
                on_invalidate,
            })
        };
        let unsubscriber = self.unsubscriber(Kind::Subscriber, key);

        self.activate_if_first();

        let current = self.value.borrow().clone();
        match current {
            Some(value) => on_value(&value),
            None => trace!(store = self.label(), "subscribed to a store with no value"),
        }

        unsubscriber
    }

    pub(crate) fn conditioned(
        self: &Rc<Self>,
        target: T,
        on_value: Subscriber<T>,
        on_invalidate: Invalidator,
    ) -> Unsubscriber {
        let key = {
            let mut registry = self.registry.borrow_mut();
            let seq = registry.next_seq();
            registry.conditions.insert(Condition {
                seq,
                target: target.clone(),
                on_value: on_value.clone(),
                on_invalidate,
            })
        };
        let unsubscriber = self.unsubscriber(Kind::Condition, key);

        self.activate_if_first();

        let current = self.value.borrow().clone();
        if let Some(value) = current {
            if (self.options.matcher)(&value, &target) {
                on_value(&value);
            }
        }

        unsubscriber
    }

    fn activate_if_first(self: &Rc<Self>) {
        // A registrant joining while `start` runs is covered by this activation.
        if self.activating.get() || self.registry.borrow().len() != 1 {
            return;
        }

        debug!(store = self.label(), "activating store");
        self.activating.set(true);
        let stop = match &self.start {
            Some(start) => start(Setter {
                inner: Rc::downgrade(self),
            }),
            None => None,
        };
        self.activating.set(false);
        let stop = stop.unwrap_or_else(|| Box::new(noop));

        if self.registry.borrow().len() == 0 {
            // The only registrant left while the start notifier ran.
            debug!(store = self.label(), "deactivating store");
            stop();
        } else {
            *self.stop.borrow_mut() = Some(stop);
        }
    }

    // Strong: a registration keeps its store alive until it is released.
    fn unsubscriber(self: &Rc<Self>, kind: Kind, key: RegistrantKey) -> Unsubscriber {
        let inner = Rc::clone(self);
        Unsubscriber::new(move || inner.unregister(kind, key))
    }

    fn unregister(&self, kind: Kind, key: RegistrantKey) {
        // Removed records drop at the end, outside any borrow of the registry.
        let (removed, remaining) = {
            let mut registry = self.registry.borrow_mut();
            let removed = match kind {
                Kind::Subscriber => (registry.subscribers.remove(key), None),
                Kind::Condition => (None, registry.conditions.remove(key)),
            };
            (removed, registry.len())
        };

        let found = removed.0.is_some() || removed.1.is_some();
        if found && remaining == 0 {
            let stop = self.stop.borrow_mut().take();
            if let Some(stop) = stop {
                debug!(store = self.label(), "deactivating store");
                stop();
            }
        }
    }
}

fn bind<T: 'static>(on_value: Subscriber<T>, on_invalidate: Invalidator, value: T) -> (Invalidator, Job) {
    (on_invalidate, Box::new(move || on_value(&value)))
}

impl<T: fmt::Debug> fmt::Debug for StoreInner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("Store")
            .field("label", &self.options.label)
            .field("value", &self.value.borrow())
            .field("active", &self.stop.borrow().is_some())
            .field("subscribers", &registry.subscribers.len())
            .field("conditions", &registry.conditions.len())
            .finish()
    }
}

/// Handle returned by every subscription.
///
/// Calling [`unsubscribe`](Unsubscriber::unsubscribe) or dropping the
/// handle removes the registration. Calling it again is a no-op. Until
/// then the handle keeps the store alive, so subscribing to a temporary
/// store works.
#[must_use = "dropping an Unsubscriber removes the subscription"]
pub struct Unsubscriber {
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Unsubscriber {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: RefCell::new(Some(Box::new(release))),
        }
    }

    /// Remove the registration. Idempotent.
    pub fn unsubscribe(&self) {
        let release = self.release.borrow_mut().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Whether the registration is still attached through this handle.
    pub fn is_subscribed(&self) -> bool {
        self.release.borrow().is_some()
    }

    /// Keep the registration for the remaining lifetime of the store.
    pub fn detach(self) {
        self.release.borrow_mut().take();
    }
}

impl Drop for Unsubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscriber")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// Read capability shared by [`Readable`] and [`Writable`].
pub trait Subscribable {
    type Value: Clone + 'static;

    /// Name used in log events and errors.
    fn label(&self) -> &str;

    /// Register `on_value` and `on_invalidate`.
    ///
    /// `on_value` runs once immediately with the current value, then after
    /// every change. `on_invalidate` runs before each change is delivered.
    fn subscribe_with(
        &self,
        on_value: impl Fn(&Self::Value) + 'static,
        on_invalidate: impl Fn() + 'static,
    ) -> Unsubscriber;

    /// Register `on_value` for the current value and every change.
    fn subscribe(&self, on_value: impl Fn(&Self::Value) + 'static) -> Unsubscriber {
        self.subscribe_with(on_value, noop)
    }

    /// Register callbacks that fire only when the value matches `target`.
    ///
    /// If the current value already matches, `on_value` runs immediately.
    fn conditioned_with(
        &self,
        target: Self::Value,
        on_value: impl Fn(&Self::Value) + 'static,
        on_invalidate: impl Fn() + 'static,
    ) -> Unsubscriber;

    fn conditioned(
        &self,
        target: Self::Value,
        on_value: impl Fn(&Self::Value) + 'static,
    ) -> Unsubscriber {
        self.conditioned_with(target, on_value, noop)
    }
}

macro_rules! impl_subscribable {
    ($handle:ident) => {
        impl<T: Clone + 'static> Subscribable for $handle<T> {
            type Value = T;

            fn label(&self) -> &str {
                self.inner.label()
            }

            fn subscribe_with(
                &self,
                on_value: impl Fn(&T) + 'static,
                on_invalidate: impl Fn() + 'static,
            ) -> Unsubscriber {
                self.inner
                    .subscribe(Rc::new(on_value), Rc::new(on_invalidate))
            }

            fn conditioned_with(
                &self,
                target: T,
                on_value: impl Fn(&T) + 'static,
                on_invalidate: impl Fn() + 'static,
            ) -> Unsubscriber {
                self.inner
                    .conditioned(target, Rc::new(on_value), Rc::new(on_invalidate))
            }
        }

        impl<T> Clone for $handle<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: Rc::clone(&self.inner),
                }
            }
        }

        impl<T: fmt::Debug> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&*self.inner, f)
            }
        }
    };
}

/// A store that can be read by subscription and written with `set`/`update`.
///
/// Cloning a `Writable` creates a new handle to the same store.
pub struct Writable<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Writable<T> {
    /// Create a store holding `value`.
    pub fn new(value: T) -> Self {
        Self::with_options(value, None, StoreOptions::default())
    }

    /// Create a store that runs `start` while it has registrants.
    pub fn with_start(value: T, start: impl Fn(Setter<T>) -> Option<Cleanup> + 'static) -> Self {
        Self::with_options(value, Some(Box::new(start)), StoreOptions::default())
    }
}

impl<T: Clone + 'static> Writable<T> {
    pub fn with_options(value: T, start: Option<StartNotifier<T>>, options: StoreOptions<T>) -> Self {
        Self {
            inner: StoreInner::new(Some(value), start, options),
        }
    }

    /// Create a store that holds no value until its first `set`.
    ///
    /// Subscribers are not called before a value arrives, and
    /// [`try_get`](crate::try_get) reports [`StoreError::Empty`](crate::StoreError::Empty).
    pub fn empty(start: Option<StartNotifier<T>>, options: StoreOptions<T>) -> Self {
        Self {
            inner: StoreInner::new(None, start, options),
        }
    }

    /// Replace the value and notify if it changed.
    pub fn set(&self, value: T) {
        self.inner.set(value);
    }

    /// Set the value to `f(current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.inner.update(f);
    }

    /// A write-only handle, as handed to start notifiers.
    pub fn setter(&self) -> Setter<T> {
        Setter {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// A read-only handle to the same store.
    pub fn readable(&self) -> Readable<T> {
        Readable {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl_subscribable!(Writable);

/// A store that can only be read by subscription.
///
/// Its value changes only through its start notifier (or, for derived
/// stores, its sources).
pub struct Readable<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Readable<T> {
    /// A store whose value never changes.
    pub fn new(value: T) -> Self {
        Self::with_options(value, None, StoreOptions::default())
    }

    pub fn with_start(value: T, start: impl Fn(Setter<T>) -> Option<Cleanup> + 'static) -> Self {
        Self::with_options(value, Some(Box::new(start)), StoreOptions::default())
    }
}

impl<T: Clone + 'static> Readable<T> {
    pub fn with_options(value: T, start: Option<StartNotifier<T>>, options: StoreOptions<T>) -> Self {
        Self::from_parts(Some(value), start, options)
    }

    /// Create a store that holds no value until `start` sets one.
    pub fn empty(start: StartNotifier<T>, options: StoreOptions<T>) -> Self {
        Self::from_parts(None, Some(start), options)
    }

    pub(crate) fn from_parts(
        value: Option<T>,
        start: Option<StartNotifier<T>>,
        options: StoreOptions<T>,
    ) -> Self {
        Self {
            inner: StoreInner::new(value, start, options),
        }
    }
}

impl<T> From<Writable<T>> for Readable<T> {
    fn from(store: Writable<T>) -> Self {
        Self { inner: store.inner }
    }
}

impl_subscribable!(Readable);

/// Write capability handed to start notifiers and async aggregators.
///
/// Holds the store weakly: once every store handle is gone, `set` does
/// nothing.
pub struct Setter<T> {
    inner: Weak<StoreInner<T>>,
}

impl<T: Clone + 'static> Setter<T> {
    pub fn set(&self, value: T) {
        match self.inner.upgrade() {
            Some(inner) => inner.set(value),
            None => trace!("setter outlived its store, value dropped"),
        }
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.update(f);
        }
    }

    /// Whether the store is still alive.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("live", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Create a [`Writable`] holding `value`.
pub fn writable<T: Clone + PartialEq + 'static>(value: T) -> Writable<T> {
    Writable::new(value)
}

/// Create a [`Readable`] holding `value`, fed by `start` while subscribed.
///
/// # Examples
///
/// ```
/// use quiver::{readable, Subscribable};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let events = Rc::new(RefCell::new(Vec::new()));
/// let log = events.clone();
/// let ticker = readable(0, move |set| {
///     log.borrow_mut().push("start");
///     set.set(1);
///     let log = log.clone();
///     Some(Box::new(move || log.borrow_mut().push("stop")))
/// });
///
/// let unsubscribe = ticker.subscribe(|_| {});
/// unsubscribe.unsubscribe();
/// assert_eq!(*events.borrow(), vec!["start", "stop"]);
/// ```
pub fn readable<T: Clone + PartialEq + 'static>(
    value: T,
    start: impl Fn(Setter<T>) -> Option<Cleanup> + 'static,
) -> Readable<T> {
    Readable::with_start(value, start)
}
