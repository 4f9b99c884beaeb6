//! Positional error aggregates for batch operations.
//!
//! A batch of N items produces at most one error per item. [`MultiError`]
//! keeps those errors aligned with the input by index so callers can tell
//! exactly which items failed. [`LazyMultiError`] is the builder used while a
//! batch is in flight: it allocates nothing until the first error arrives and
//! collapses to `None` if no item failed.

use std::error::Error;
use std::fmt;

/// Index-aligned collection of per-item errors. `None` slots succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiError<E> {
    errors: Vec<Option<E>>,
}

impl<E> MultiError<E> {
    /// An aggregate of `size` successful slots.
    pub fn new(size: usize) -> Self {
        Self {
            errors: std::iter::repeat_with(|| None).take(size).collect(),
        }
    }

    pub fn from_vec(errors: Vec<Option<E>>) -> Self {
        Self { errors }
    }

    /// Batch size this aggregate is aligned with.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The error recorded for item `index`, if any.
    pub fn get(&self, index: usize) -> Option<&E> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    /// All slots, in batch order.
    pub fn slots(&self) -> &[Option<E>] {
        &self.errors
    }

    /// `(index, error)` for every failed item.
    pub fn iter_errors(&self) -> impl Iterator<Item = (usize, &E)> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    /// Number of failed items.
    pub fn error_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    pub fn into_vec(self) -> Vec<Option<E>> {
        self.errors
    }

    /// Unwrap a size-one aggregate into its only error.
    ///
    /// Returns `Err(self)` when the aggregate is not size one or its slot is
    /// empty.
    pub fn into_single(mut self) -> Result<E, Self> {
        if self.errors.len() == 1 && self.errors[0].is_some() {
            if let Some(e) = self.errors.pop().flatten() {
                return Ok(e);
            }
        }
        Err(self)
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failed = self.iter_errors();
        match failed.next() {
            None => write!(f, "(0 errors)"),
            Some((index, first)) => {
                write!(f, "item {index}: {first}")?;
                let rest = self.error_count() - 1;
                match rest {
                    0 => Ok(()),
                    1 => write!(f, " (and 1 other error)"),
                    n => write!(f, " (and {n} other errors)"),
                }
            }
        }
    }
}

impl<E: Error + 'static> Error for MultiError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.iter_errors().next().map(|(_, e)| e as &(dyn Error + 'static))
    }
}

/// Sparse builder for a [`MultiError`] sized to a batch.
///
/// Created at the start of a batch, populated as per-item results come back,
/// finalized exactly once with [`LazyMultiError::get`].
#[derive(Debug)]
pub struct LazyMultiError<E> {
    size: usize,
    errors: Option<Vec<Option<E>>>,
}

impl<E> LazyMultiError<E> {
    pub fn new(size: usize) -> Self {
        Self { size, errors: None }
    }

    /// Record `err` at `index` if it is `Some`. Returns whether an error was
    /// recorded.
    pub fn assign(&mut self, index: usize, err: Option<E>) -> bool {
        match err {
            Some(e) => {
                self.set(index, e);
                true
            }
            None => false,
        }
    }

    /// Record `err` at `index`, replacing any earlier error for that item.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the batch.
    pub fn set(&mut self, index: usize, err: E) {
        assert!(
            index < self.size,
            "index {index} out of range for batch of {}",
            self.size
        );
        let size = self.size;
        let errors = self
            .errors
            .get_or_insert_with(|| std::iter::repeat_with(|| None).take(size).collect());
        errors[index] = Some(err);
    }

    /// Returns `true` if no error has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.errors.is_none()
    }

    /// Finalize: `None` if nothing was recorded, otherwise the aggregate.
    pub fn get(self) -> Option<MultiError<E>> {
        self.errors.map(MultiError::from_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    #[error("boom {0}")]
    struct Boom(u32);

    #[test]
    fn untouched_lazy_error_collapses_to_none() {
        let mut lme = LazyMultiError::<Boom>::new(3);
        assert!(!lme.assign(1, None));
        assert!(lme.is_empty());
        assert!(lme.get().is_none());
    }

    #[test]
    fn assigned_errors_keep_index_alignment() {
        let mut lme = LazyMultiError::new(4);
        assert!(lme.assign(2, Some(Boom(2))));
        let me = lme.get().unwrap();
        assert_eq!(me.len(), 4);
        assert_eq!(me.error_count(), 1);
        assert_eq!(me.get(2), Some(&Boom(2)));
        assert!(me.get(0).is_none());
        assert_eq!(me.iter_errors().map(|(i, _)| i).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn later_assignment_replaces_earlier() {
        let mut lme = LazyMultiError::new(1);
        lme.set(0, Boom(1));
        lme.set(0, Boom(2));
        assert_eq!(lme.get().unwrap().get(0), Some(&Boom(2)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_outside_batch_panics() {
        let mut lme = LazyMultiError::new(1);
        lme.set(3, Boom(0));
    }

    #[test]
    fn into_single_unwraps_size_one() {
        let me = MultiError::from_vec(vec![Some(Boom(7))]);
        assert_eq!(me.into_single(), Ok(Boom(7)));

        let two = MultiError::from_vec(vec![Some(Boom(1)), None]);
        assert!(two.into_single().is_err());
    }

    #[test]
    fn display_summarizes_first_error() {
        let me = MultiError::from_vec(vec![None, Some(Boom(1)), Some(Boom(2)), Some(Boom(3))]);
        assert_eq!(me.to_string(), "item 1: boom 1 (and 2 other errors)");
        let one = MultiError::from_vec(vec![Some(Boom(9))]);
        assert_eq!(one.to_string(), "item 0: boom 9");
    }

    #[test]
    fn source_is_first_error() {
        let me = MultiError::from_vec(vec![None, Some(Boom(5))]);
        assert_eq!(me.source().unwrap().to_string(), "boom 5");
    }
}
