//! Event parameters and the per-type parameter cache.

use crate::pool::{InvalidRelease, ObjectPool, Pooled, Reset};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use super::error::ListenerError;

/// Type-erasure helpers every event parameter gets for free.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;

    fn param_type(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn param_type(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Payload passed to listeners.
///
/// Implemented for every `Reset + Send + Sync + 'static` type, so a custom
/// parameter only needs a [`Reset`] impl.
pub trait EventParam: Reset + AsAny + Send + Sync + 'static {}

impl<T: Reset + Send + Sync + 'static> EventParam for T {}

impl dyn EventParam {
    pub fn downcast_ref<T: EventParam>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: EventParam>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Debug for dyn EventParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventParam({})", self.param_type())
    }
}

/// Borrow the parameter of a dispatch as `T`, failing if it is absent or
/// of another type.
pub fn expect_param<T: EventParam>(param: Option<&dyn EventParam>) -> Result<&T, ListenerError> {
    let param = param.ok_or(ListenerError::MissingParam {
        expected: type_name::<T>(),
    })?;
    param
        .downcast_ref::<T>()
        .ok_or_else(|| ListenerError::UnexpectedParam {
            expected: type_name::<T>(),
            found: param.param_type(),
        })
}

/// Single-value parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value<T> {
    pub value: T,
}

impl<T> Value<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Default> Reset for Value<T> {
    fn reset(&mut self) {
        self.value = T::default();
    }
}

pub type IntParam = Value<i64>;
pub type FloatParam = Value<f64>;
pub type BoolParam = Value<bool>;
pub type StringParam = Value<String>;

/// One resetting pool per parameter type.
///
/// Parameters are reset when they are released, so a freshly acquired one
/// always starts from its defaults.
#[derive(Default)]
pub struct ParamCache {
    pools: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl ParamCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire<T: EventParam + Default>(&mut self) -> Pooled<T> {
        self.pool::<T>().get()
    }

    pub fn release<T: EventParam + Default>(
        &mut self,
        param: Pooled<T>,
    ) -> Result<(), InvalidRelease<T>> {
        self.pool::<T>().put(param)
    }

    /// Number of cached instances of `T` ready for reuse.
    pub fn cached<T: EventParam + Default>(&self) -> usize {
        self.pools
            .get(&TypeId::of::<T>())
            .and_then(|pool| pool.downcast_ref::<ObjectPool<T>>())
            .map_or(0, ObjectPool::cache_count)
    }

    /// Dispose every per-type pool.
    pub fn clear(&mut self) {
        self.pools.clear();
    }

    fn pool<T: EventParam + Default>(&mut self) -> &mut ObjectPool<T> {
        let slot = self
            .pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ObjectPool::<T>::resetting()));
        match slot.downcast_mut::<ObjectPool<T>>() {
            Some(pool) => pool,
            None => unreachable!("param pools are keyed by their own type id"),
        }
    }
}

impl fmt::Debug for ParamCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamCache")
            .field("types", &self.pools.len())
            .finish()
    }
}
