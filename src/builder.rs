//! Builder pattern utilities
//!
//! Marker types for builders that check required parameters at compile time: a builder
//! method that needs a field is only implemented once that field is [`Set`].

use std::marker::PhantomData;

/// A required builder field that has not been provided yet.
pub struct Unset<T> {
    _value: PhantomData<fn() -> T>,
}

impl<T> Default for Unset<T> {
    fn default() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<T> Unset<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A required builder field holding its value.
#[derive(Clone)]
pub struct Set<T> {
    value: T,
}

impl<T> Set<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}
