//! Stores computed from other stores.
//!
//! A derived store subscribes to its sources only while it has registrants
//! itself. Each source gets a slot holding its last delivered value and a
//! bit in a pending mask. The bit is set when the source invalidates and
//! cleared when it delivers, and the aggregator runs only once every bit is
//! clear. A change that fans out through several sources in one flush is
//! therefore aggregated once, after all of them have settled.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::options::StoreOptions;
use super::store::{Readable, Setter, StartNotifier, Subscribable, Unsubscriber, Writable};
use crate::utils::{run_all, Cleanup};

/// Aggregation function of a derived store.
pub enum Aggregator<V, T> {
    /// The return value becomes the derived value.
    Simple(Box<dyn Fn(&V) -> T>),
    /// Sets the derived value through the [`Setter`], now or later.
    ///
    /// The returned cleanup runs before the next aggregation and when the
    /// derived store deactivates.
    Async(Box<dyn Fn(&V, &Setter<T>) -> Option<Cleanup>>),
}

impl<V, T> Aggregator<V, T> {
    pub fn simple(f: impl Fn(&V) -> T + 'static) -> Self {
        Self::Simple(Box::new(f))
    }

    pub fn with_setter(f: impl Fn(&V, &Setter<T>) -> Option<Cleanup> + 'static) -> Self {
        Self::Async(Box::new(f))
    }
}

impl<V, T> fmt::Debug for Aggregator<V, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(_) => f.write_str("Aggregator::Simple"),
            Self::Async(_) => f.write_str("Aggregator::Async"),
        }
    }
}

/// Fixed-width set of flags, one per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PendingMask {
    words: Vec<u64>,
}

impl PendingMask {
    pub(crate) fn new(width: usize) -> Self {
        Self {
            words: vec![0; width.div_ceil(64)],
        }
    }

    pub(crate) fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    pub(crate) fn clear(&mut self, index: usize) {
        self.words[index / 64] &= !(1 << (index % 64));
    }

    pub(crate) fn any(&self) -> bool {
        self.words.iter().any(|word| *word != 0)
    }
}

trait SyncTarget<Slots> {
    fn deliver(&self, index: usize, fill: &mut dyn FnMut(&mut Slots));
    fn invalidate(&self, index: usize);
}

/// Connection from one source subscription back into a derived store.
pub struct SourceLink<Slots> {
    target: Rc<dyn SyncTarget<Slots>>,
}

impl<Slots> Clone for SourceLink<Slots> {
    fn clone(&self) -> Self {
        Self {
            target: Rc::clone(&self.target),
        }
    }
}

impl<Slots> SourceLink<Slots> {
    /// Record a fresh value for source `index`.
    pub fn deliver(&self, index: usize, fill: impl FnOnce(&mut Slots)) {
        let mut fill = Some(fill);
        self.target.deliver(index, &mut |slots| {
            if let Some(fill) = fill.take() {
                fill(slots);
            }
        });
    }

    /// Mark source `index` as about to change.
    pub fn invalidate(&self, index: usize) {
        self.target.invalidate(index);
    }
}

/// Subscribe to `store`, routing its callbacks to slot `index`.
pub fn attach_slot<R, Slots>(
    store: &R,
    link: &SourceLink<Slots>,
    index: usize,
    fill: impl Fn(&mut Slots, &R::Value) + 'static,
) -> Unsubscriber
where
    R: Subscribable,
    Slots: 'static,
{
    let on_value = link.clone();
    let on_invalidate = link.clone();
    store.subscribe_with(
        move |value| on_value.deliver(index, |slots| fill(slots, value)),
        move || on_invalidate.invalidate(index),
    )
}

/// An ordered, fixed collection of stores a derived store reads from.
///
/// Implemented for a single store (values delivered bare), for `Vec`s of
/// stores (values as a `Vec`) and for tuples of up to four stores of
/// different value types (values as a tuple).
///
/// Other shapes implement it with [`attach_slot`], routing each store to
/// its slot:
///
/// ```
/// use quiver::store::{attach_slot, SourceLink, Sources};
/// use quiver::{derived, get, writable, Unsubscriber, Writable};
///
/// struct Repeat {
///     count: Writable<usize>,
///     word: Writable<String>,
/// }
///
/// impl Sources for Repeat {
///     type Values = String;
///     type Slots = (Option<usize>, Option<String>);
///
///     fn count(&self) -> usize {
///         2
///     }
///
///     fn empty_slots(&self) -> Self::Slots {
///         (None, None)
///     }
///
///     fn collect(slots: &Self::Slots) -> Option<String> {
///         Some(slots.1.as_ref()?.repeat(slots.0?))
///     }
///
///     fn attach(&self, link: &SourceLink<Self::Slots>) -> Vec<Unsubscriber> {
///         vec![
///             attach_slot(&self.count, link, 0, |slots: &mut Self::Slots, n: &usize| {
///                 slots.0 = Some(*n)
///             }),
///             attach_slot(&self.word, link, 1, |slots: &mut Self::Slots, w: &String| {
///                 slots.1 = Some(w.clone())
///             }),
///         ]
///     }
/// }
///
/// let count = writable(2);
/// let repeated = derived(
///     Repeat { count: count.clone(), word: writable("ab".to_string()) },
///     |s: &String| s.clone(),
/// );
/// assert_eq!(get(&repeated), "abab");
///
/// count.set(3);
/// assert_eq!(get(&repeated), "ababab");
/// ```
pub trait Sources: 'static {
    type Values: 'static;
    type Slots: 'static;

    fn count(&self) -> usize;

    fn empty_slots(&self) -> Self::Slots;

    /// The aggregator input, or `None` while any slot is still empty.
    fn collect(slots: &Self::Slots) -> Option<Self::Values>;

    /// Subscribe to every source in order.
    fn attach(&self, link: &SourceLink<Self::Slots>) -> Vec<Unsubscriber>;
}

macro_rules! impl_single_source {
    ($handle:ident) => {
        impl<S: Clone + 'static> Sources for $handle<S> {
            type Values = S;
            type Slots = Option<S>;

            fn count(&self) -> usize {
                1
            }

            fn empty_slots(&self) -> Option<S> {
                None
            }

            fn collect(slots: &Option<S>) -> Option<S> {
                slots.clone()
            }

            fn attach(&self, link: &SourceLink<Option<S>>) -> Vec<Unsubscriber> {
                vec![attach_slot(self, link, 0, |slot: &mut Option<S>, value: &S| {
                    *slot = Some(value.clone())
                })]
            }
        }
    };
}

impl_single_source!(Readable);
impl_single_source!(Writable);

impl<R: Subscribable + 'static> Sources for Vec<R> {
    type Values = Vec<R::Value>;
    type Slots = Vec<Option<R::Value>>;

    fn count(&self) -> usize {
        self.len()
    }

    fn empty_slots(&self) -> Self::Slots {
        vec![None; self.len()]
    }

    fn collect(slots: &Self::Slots) -> Option<Self::Values> {
        slots.iter().cloned().collect()
    }

    fn attach(&self, link: &SourceLink<Self::Slots>) -> Vec<Unsubscriber> {
        self.iter()
            .enumerate()
            .map(|(index, store)| {
                attach_slot(store, link, index, move |slots: &mut Self::Slots, value| {
                    slots[index] = Some(value.clone())
                })
            })
            .collect()
    }
}

macro_rules! impl_tuple_sources {
    ($count:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Subscribable + 'static),+> Sources for ($($name,)+) {
            type Values = ($($name::Value,)+);
            type Slots = ($(Option<$name::Value>,)+);

            fn count(&self) -> usize {
                $count
            }

            fn empty_slots(&self) -> Self::Slots {
                ($(None::<$name::Value>,)+)
            }

            fn collect(slots: &Self::Slots) -> Option<Self::Values> {
                Some(($(slots.$idx.clone()?,)+))
            }

            fn attach(&self, link: &SourceLink<Self::Slots>) -> Vec<Unsubscriber> {
                vec![$(
                    attach_slot(&self.$idx, link, $idx, |slots: &mut Self::Slots, value: &$name::Value| {
                        slots.$idx = Some(value.clone())
                    }),
                )+]
            }
        }
    };
}

impl_tuple_sources!(1; A 0);
impl_tuple_sources!(2; A 0, B 1);
impl_tuple_sources!(3; A 0, B 1, C 2);
impl_tuple_sources!(4; A 0, B 1, C 2, D 3);

/// Synchronization state of one activation of a derived store.
struct DerivedState<S: Sources, T> {
    label: Option<Cow<'static, str>>,
    slots: RefCell<S::Slots>,
    pending: RefCell<PendingMask>,
    initialized: Cell<bool>,
    cleanup: RefCell<Option<Cleanup>>,
    // Bumped per aggregation so a reentrant one can be told apart.
    runs: Cell<u64>,
    aggregator: Rc<Aggregator<S::Values, T>>,
    setter: Setter<T>,
}

impl<S: Sources, T: Clone + 'static> DerivedState<S, T> {
    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("<unnamed>")
    }

    fn resync(&self) {
        if self.pending.borrow().any() {
            trace!(store = self.label(), "sources pending, aggregation deferred");
            return;
        }

        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        let values = S::collect(&self.slots.borrow());
        let Some(values) = values else {
            trace!(store = self.label(), "a source holds no value, aggregation deferred");
            return;
        };

        let run = self.runs.get() + 1;
        self.runs.set(run);

        match &*self.aggregator {
            Aggregator::Simple(f) => self.setter.set(f(&values)),
            Aggregator::Async(f) => {
                let cleanup = f(&values, &self.setter);
                if self.runs.get() == run {
                    *self.cleanup.borrow_mut() = cleanup;
                } else if let Some(stale) = cleanup {
                    // A newer aggregation ran while this one was setting.
                    stale();
                }
            }
        }
    }

    fn teardown(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl<S: Sources, T: Clone + 'static> SyncTarget<S::Slots> for DerivedState<S, T> {
    fn deliver(&self, index: usize, fill: &mut dyn FnMut(&mut S::Slots)) {
        fill(&mut self.slots.borrow_mut());
        self.pending.borrow_mut().clear(index);
        if self.initialized.get() {
            self.resync();
        }
    }

    fn invalidate(&self, index: usize) {
        self.pending.borrow_mut().set(index);
    }
}

/// Create a derived store with an explicit aggregator and options.
///
/// `initial` is the value held before the first aggregation; only useful
/// with [`Aggregator::Async`], since a simple aggregator always runs during
/// activation.
pub fn derived_with<S, T>(
    sources: S,
    aggregator: Aggregator<S::Values, T>,
    initial: Option<T>,
    options: StoreOptions<T>,
) -> Readable<T>
where
    S: Sources,
    T: Clone + 'static,
{
    let sources = Rc::new(sources);
    let aggregator = Rc::new(aggregator);
    let label = options.label.clone();

    let start: StartNotifier<T> = Box::new(move |setter: Setter<T>| -> Option<Cleanup> {
        let state = Rc::new(DerivedState::<S, T> {
            label: label.clone(),
            slots: RefCell::new(sources.empty_slots()),
            pending: RefCell::new(PendingMask::new(sources.count())),
            initialized: Cell::new(false),
            cleanup: RefCell::new(None),
            runs: Cell::new(0),
            aggregator: Rc::clone(&aggregator),
            setter,
        });

        let link = SourceLink {
            target: Rc::clone(&state) as Rc<dyn SyncTarget<S::Slots>>,
        };
        let unsubscribers = sources.attach(&link);

        state.initialized.set(true);
        state.resync();

        Some(Box::new(move || {
            run_all(
                unsubscribers
                    .into_iter()
                    .map(|unsubscriber| Box::new(move || unsubscriber.unsubscribe()) as Cleanup),
            );
            state.teardown();
        }))
    });

    Readable::from_parts(initial, Some(start), options)
}

/// Create a store whose value is `f` applied to the sources' values.
///
/// # Examples
///
/// ```
/// use quiver::{derived, get, writable};
///
/// let a = writable(1);
/// let b = writable(2);
/// let sum = derived(vec![a.clone(), b], |values: &Vec<i32>| values.iter().sum::<i32>());
/// assert_eq!(get(&sum), 3);
///
/// a.set(10);
/// assert_eq!(get(&sum), 12);
/// ```
pub fn derived<S, T>(sources: S, f: impl Fn(&S::Values) -> T + 'static) -> Readable<T>
where
    S: Sources,
    T: Clone + PartialEq + 'static,
{
    derived_with(sources, Aggregator::simple(f), None, StoreOptions::default())
}

/// Create a store whose value is set by `f` through a [`Setter`].
///
/// `f` may set zero or more times, immediately or later, and may return a
/// cleanup that runs before its next invocation and on deactivation.
pub fn derived_async<S, T>(
    sources: S,
    initial: Option<T>,
    f: impl Fn(&S::Values, &Setter<T>) -> Option<Cleanup> + 'static,
) -> Readable<T>
where
    S: Sources,
    T: Clone + PartialEq + 'static,
{
    derived_with(sources, Aggregator::with_setter(f), initial, StoreOptions::default())
}
