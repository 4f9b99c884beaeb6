//! Pre-sized positional result buffer for batch calls.

use crate::error::{StoreError, StoreResult};

/// One result slot per batch index, filled by the raw store.
///
/// The caller sizes the arena to the batch before the call; the store fills
/// slot `i` with the outcome for input `i`. Slots the store never filled
/// stay `None`.
#[derive(Debug)]
pub struct ResultArena<T> {
    slots: Vec<Option<StoreResult<T>>>,
}

impl<T> ResultArena<T> {
    pub fn new(size: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(size).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record the outcome for `index`. Out-of-range indices are ignored.
    pub fn fill(&mut self, index: usize, result: StoreResult<T>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(result);
        }
    }

    pub fn ok(&mut self, index: usize, value: T) {
        self.fill(index, Ok(value));
    }

    pub fn err(&mut self, index: usize, error: StoreError) {
        self.fill(index, Err(error));
    }

    pub fn is_filled(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Number of slots holding a result.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn into_slots(self) -> Vec<Option<StoreResult<T>>> {
        self.slots
    }
}
