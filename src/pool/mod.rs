//! Generic object pool with strict checkout tracking.
//!
//! Every instance handed out by [`ObjectPool::get`] is wrapped in a
//! [`Pooled`] carrying an identity that is unique across all pools in the
//! process. The pool keeps two disjoint sets, *available* values and
//! *checked-out* identities, and refuses to take back anything it did not
//! hand out. Double release and foreign release are therefore caught at the
//! point of misuse instead of silently corrupting the pool.
//!
//! # Example
//!
//! ```rust
//! use stagehand::pool::ObjectPool;
//!
//! let mut pool: ObjectPool<Vec<u8>> = ObjectPool::new();
//! let mut buf = pool.get();
//! buf.extend_from_slice(b"hello");
//! pool.put(buf).unwrap();
//! assert_eq!(pool.cache_count(), 1);
//! ```

mod error;

pub use error::InvalidRelease;

use crate::config::PoolSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Capability to return an instance's fields to their defaults so it can
/// be reused without leaking state from its previous user.
pub trait Reset {
    fn reset(&mut self);
}

/// Identity of one pooled instance: the pool that created it plus a
/// sequence number within that pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PooledId {
    pub pool: u64,
    pub seq: u64,
}

impl fmt::Display for PooledId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.pool, self.seq)
    }
}

/// An instance checked out of an [`ObjectPool`].
///
/// Dereferences to the pooled value. Give it back with
/// [`ObjectPool::put`]; dropping it instead simply loses the instance and
/// the pool keeps reporting it as outstanding.
pub struct Pooled<T> {
    id: PooledId,
    value: T,
}

impl<T> Pooled<T> {
    pub fn id(&self) -> PooledId {
        self.id
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Pool of reusable instances.
pub struct ObjectPool<T> {
    pool_id: u64,
    next_seq: u64,
    available: Vec<(u64, T)>,
    checked_out: HashSet<u64>,
    factory: Factory<T>,
    reset: Option<fn(&mut T)>,
}

impl<T: Default + 'static> ObjectPool<T> {
    /// Create a pool that builds new instances with `T::default()`.
    pub fn new() -> Self {
        Self::with_factory(T::default)
    }

    /// Create a pool sized from configuration.
    pub fn with_settings(settings: &PoolSettings) -> Self {
        let mut pool = Self::new();
        pool.available.reserve(settings.initial_capacity);
        pool
    }
}

impl<T: Default + Reset + 'static> ObjectPool<T> {
    /// Create a pool that resets every instance as it is returned.
    pub fn resetting() -> Self {
        let mut pool = Self::new();
        pool.reset = Some(<T as Reset>::reset as fn(&mut T));
        pool
    }
}

impl<T: Default + 'static> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectPool<T> {
    /// Create a pool that builds new instances with `factory`.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            next_seq: 0,
            available: Vec::new(),
            checked_out: HashSet::new(),
            factory: Box::new(factory),
            reset: None,
        }
    }

    /// Number of instances currently available for reuse.
    pub fn cache_count(&self) -> usize {
        self.available.len()
    }

    /// Number of instances currently checked out.
    pub fn outstanding(&self) -> usize {
        self.checked_out.len()
    }

    /// Check out an instance: the most recently returned one if any,
    /// otherwise a freshly built one.
    pub fn get(&mut self) -> Pooled<T> {
        let (seq, value) = match self.available.pop() {
            Some(entry) => entry,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (seq, (self.factory)())
            }
        };
        self.checked_out.insert(seq);
        Pooled {
            id: PooledId {
                pool: self.pool_id,
                seq,
            },
            value,
        }
    }

    /// Return an instance to the pool.
    ///
    /// Fails with [`InvalidRelease`] when the instance was not obtained from
    /// this pool or was already returned; the pool is left untouched.
    pub fn put(&mut self, item: Pooled<T>) -> Result<(), InvalidRelease<T>> {
        let id = item.id;
        if id.pool != self.pool_id || !self.checked_out.remove(&id.seq) {
            tracing::error!(%id, pool = self.pool_id, "rejected release of an instance not checked out");
            return Err(InvalidRelease::new(item));
        }

        let mut value = item.value;
        if let Some(reset) = self.reset {
            reset(&mut value);
        }
        self.available.push((id.seq, value));
        Ok(())
    }

    /// Drop every available instance and forget every checked-out one.
    ///
    /// Instances still checked out can no longer be returned afterwards.
    pub fn dispose(&mut self) {
        if let Some(seq) = self.checked_out.iter().min() {
            let id = PooledId {
                pool: self.pool_id,
                seq: *seq,
            };
            tracing::warn!(
                %id,
                outstanding = self.checked_out.len(),
                "disposing pool while instances are still checked out"
            );
        }
        self.available.clear();
        self.checked_out.clear();
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("pool_id", &self.pool_id)
            .field("available", &self.available.len())
            .field("checked_out", &self.checked_out.len())
            .finish()
    }
}
