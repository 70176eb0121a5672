use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The store delivered no value when subscribed to.
    ///
    /// Only a store created without an initial value (`Writable::empty`,
    /// `Readable::empty` or `derived_async` with `None`) can be in this
    /// state, until a value is first set.
    #[error("store `{label}` holds no value")]
    Empty { label: String },
}

impl StoreError {
    pub(crate) fn empty(label: &str) -> Self {
        Self::Empty {
            label: label.to_string(),
        }
    }
}
