use std::cell::RefCell;
use std::rc::Rc;

use super::store::Subscribable;
use crate::error::{Result, StoreError};

/// Read the current value of a store.
///
/// Subscribes, captures the synchronously delivered value and unsubscribes
/// again. An inactive store is therefore activated and deactivated once.
///
/// # Panics
///
/// Panics if the store delivers no value, which only happens for a store
/// created without an initial value that has not been set yet. Use
/// [`try_get`] to handle that case.
pub fn get<S: Subscribable>(store: &S) -> S::Value {
    match try_get(store) {
        Ok(value) => value,
        Err(err) => panic!("{err}"),
    }
}

/// Read the current value of a store, or [`StoreError::Empty`].
pub fn try_get<S: Subscribable>(store: &S) -> Result<S::Value> {
    let captured = Rc::new(RefCell::new(None));
    let sink = captured.clone();
    store
        .subscribe(move |value: &S::Value| *sink.borrow_mut() = Some(value.clone()))
        .unsubscribe();

    let value = captured.borrow_mut().take();
    value.ok_or_else(|| StoreError::empty(store.label()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{derived_async, Setter, Writable};
    use std::cell::Cell;

    #[test]
    fn get_reads_current_value() {
        let store = Writable::new(41);
        store.update(|n| n + 1);
        assert_eq!(get(&store), 42);
    }

    #[test]
    fn get_activates_and_releases() {
        let starts = Rc::new(Cell::new(0));
        let stops = Rc::new(Cell::new(0));
        let store = {
            let starts = starts.clone();
            let stops = stops.clone();
            Writable::with_start(0, move |set: Setter<i32>| {
                starts.set(starts.get() + 1);
                set.set(9);
                let stops = stops.clone();
                Some(Box::new(move || stops.set(stops.get() + 1)))
            })
        };

        assert_eq!(get(&store), 9);
        assert_eq!((starts.get(), stops.get()), (1, 1));
    }

    #[test]
    fn try_get_reports_empty_store() {
        let source = Writable::new(0);
        let never = derived_async(source, None::<String>, |_: &i32, _: &Setter<String>| None);

        assert!(matches!(try_get(&never), Err(StoreError::Empty { .. })));
    }

    #[test]
    #[should_panic(expected = "holds no value")]
    fn get_panics_on_empty_store() {
        let source = Writable::new(0);
        let never = derived_async(source, None::<u8>, |_: &i32, _: &Setter<u8>| None);
        get(&never);
    }
}
