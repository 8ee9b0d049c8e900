//! Pool release errors.

use super::{Pooled, PooledId};
use std::fmt;
use thiserror::Error;

/// Returned by [`ObjectPool::put`](super::ObjectPool::put) when the
/// instance is not currently checked out of that pool.
///
/// The rejected instance travels back inside the error so the caller can
/// hand it to the pool it actually came from.
#[derive(Error)]
#[error("instance {id} is not checked out of this pool")]
pub struct InvalidRelease<T> {
    pub id: PooledId,
    item: Pooled<T>,
}

impl<T> InvalidRelease<T> {
    pub(crate) fn new(item: Pooled<T>) -> Self {
        Self { id: item.id(), item }
    }

    /// Recover the rejected instance.
    pub fn into_inner(self) -> Pooled<T> {
        self.item
    }
}

impl<T> fmt::Debug for InvalidRelease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidRelease")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
