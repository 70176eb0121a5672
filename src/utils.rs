//! Change detection and small callback helpers shared by every store.

/// A deferred teardown action.
///
/// Returned by start notifiers (deactivation) and by asynchronous
/// aggregators (cleanup before the next recomputation).
pub type Cleanup = Box<dyn FnOnce()>;

/// Does nothing. Used as the default deactivation and cleanup.
pub fn noop() {}

/// Invoke every cleanup in order.
pub fn run_all<I>(cleanups: I)
where
    I: IntoIterator<Item = Cleanup>,
{
    for cleanup in cleanups {
        cleanup();
    }
}

/// Reports whether moving from `current` to `next` counts as a change.
///
/// A self-unequal current value (NaN) is only considered unchanged when the
/// next value is self-unequal as well. Otherwise the values are compared
/// with `PartialEq`.
///
/// ```
/// use quiver::utils::safe_not_equal;
///
/// assert!(!safe_not_equal(&1, &1));
/// assert!(safe_not_equal(&1, &2));
/// assert!(!safe_not_equal(&f64::NAN, &f64::NAN));
/// assert!(safe_not_equal(&f64::NAN, &0.0));
/// ```
#[allow(clippy::eq_op)]
pub fn safe_not_equal<T: PartialEq + ?Sized>(current: &T, next: &T) -> bool {
    if current != current {
        next == next
    } else {
        current != next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[rstest]
    #[case::same_int(1.0, 1.0, false)]
    #[case::different(1.0, 2.0, true)]
    #[case::nan_to_nan(f64::NAN, f64::NAN, false)]
    #[case::nan_to_number(f64::NAN, 3.0, true)]
    #[case::number_to_nan(3.0, f64::NAN, true)]
    #[case::signed_zero(0.0, -0.0, false)]
    fn safe_not_equal_floats(#[case] current: f64, #[case] next: f64, #[case] changed: bool) {
        assert_eq!(safe_not_equal(&current, &next), changed);
    }

    #[test]
    fn safe_not_equal_strings() {
        assert!(!safe_not_equal("x", "x"));
        assert!(safe_not_equal("x", "y"));
    }

    #[test]
    fn run_all_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let cleanups: Vec<Cleanup> = (0..3)
            .map(|i| {
                let log = log.clone();
                Box::new(move || log.borrow_mut().push(i)) as Cleanup
            })
            .collect();

        run_all(cleanups);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }
}
