use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use crate::runtime::Scheduler;
use crate::utils::safe_not_equal;

/// Binary predicate over two store values.
pub type Predicate<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Decides whether `set(next)` replaces `current` and notifies.
///
/// The default, [`Safe`](ChangeDetection::Safe), compares by value for
/// every type, so setting an equal `Vec` or struct does not notify. Use
/// [`Always`](ChangeDetection::Always) for values that may be mutated in
/// place and must re-notify on every `set`.
#[derive(Clone)]
pub enum ChangeDetection<T> {
    /// [`safe_not_equal`]: unchanged when equal, NaN-aware.
    Safe(Predicate<T>),
    /// Every `set` counts as a change, even with an equal value.
    Always,
    /// Changed when the predicate returns `true` for `(current, next)`.
    Custom(Predicate<T>),
}

impl<T: PartialEq + 'static> ChangeDetection<T> {
    pub fn safe() -> Self {
        Self::Safe(Rc::new(|current: &T, next: &T| safe_not_equal(current, next)))
    }
}

impl<T> ChangeDetection<T> {
    pub fn custom(changed: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::Custom(Rc::new(changed))
    }

    pub(crate) fn changed(&self, current: &T, next: &T) -> bool {
        match self {
            Self::Safe(changed) | Self::Custom(changed) => changed(current, next),
            Self::Always => true,
        }
    }
}

impl<T> fmt::Debug for ChangeDetection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe(_) => f.write_str("Safe"),
            Self::Always => f.write_str("Always"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Per-store configuration.
///
/// # Examples
///
/// ```
/// use quiver::store::{ChangeDetection, StoreOptions};
/// use quiver::Writable;
///
/// let options = StoreOptions::default()
///     .label("cursor")
///     .change_detection(ChangeDetection::Always);
/// let cursor = Writable::with_options((0, 0), None, options);
/// cursor.set((0, 0)); // notifies despite the equal value
/// ```
pub struct StoreOptions<T> {
    pub(crate) label: Option<Cow<'static, str>>,
    pub(crate) change_detection: ChangeDetection<T>,
    pub(crate) matcher: Predicate<T>,
    pub(crate) scheduler: Option<Scheduler>,
}

impl<T: PartialEq + 'static> Default for StoreOptions<T> {
    fn default() -> Self {
        Self {
            label: None,
            change_detection: ChangeDetection::safe(),
            matcher: Rc::new(|value: &T, target: &T| value == target),
            scheduler: None,
        }
    }
}

impl<T: 'static> StoreOptions<T> {
    /// Options for a value type without `PartialEq`.
    ///
    /// `matches(value, target)` decides which conditioned subscribers fire.
    pub fn custom(
        change_detection: ChangeDetection<T>,
        matches: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self {
            label: None,
            change_detection,
            matcher: Rc::new(matches),
            scheduler: None,
        }
    }

    /// Name the store in log events and `Debug` output.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn change_detection(mut self, change_detection: ChangeDetection<T>) -> Self {
        self.change_detection = change_detection;
        self
    }

    /// Replace the equality used to match conditioned subscribers.
    pub fn matcher(mut self, matches: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.matcher = Rc::new(matches);
        self
    }

    /// Deliver through `scheduler` instead of [`Scheduler::current`].
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T> fmt::Debug for StoreOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("label", &self.label)
            .field("change_detection", &self.change_detection)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_detection_is_nan_aware() {
        let options = StoreOptions::<f64>::default();
        assert!(!options.change_detection.changed(&f64::NAN, &f64::NAN));
        assert!(options.change_detection.changed(&1.0, &2.0));
        assert!(!options.change_detection.changed(&2.0, &2.0));
    }

    #[test]
    fn always_reports_change() {
        let detection = ChangeDetection::<Vec<u8>>::Always;
        assert!(detection.changed(&vec![1], &vec![1]));
    }

    #[test]
    fn custom_matcher_replaces_eq() {
        struct Opaque(u8);

        let options = StoreOptions::custom(ChangeDetection::Always, |a: &Opaque, b: &Opaque| {
            a.0 / 10 == b.0 / 10
        })
        .label("bucketed");

        assert!((options.matcher)(&Opaque(12), &Opaque(17)));
        assert!(!(options.matcher)(&Opaque(12), &Opaque(21)));
        assert_eq!(options.label.as_deref(), Some("bucketed"));
    }
}
