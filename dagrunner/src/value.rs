// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::any::Any;
use std::sync::Arc;

use crate::error::EngineError;

/// A type-erased value produced by a provider or supplied as a parameter.
///
/// Providers of different nodes are free to return unrelated types; the engine only
/// needs to move the value between a node and its dependents, never to inspect it.
pub type Value = Arc<dyn Any + Send + Sync>;

pub fn wrap<T: Any + Send + Sync>(value: T) -> Value {
    Arc::new(value)
}

/// Downcasts a `Value` to a concrete type, or fails with a `Provider` error naming the
/// mismatch. Used by callers unwrapping a `run()` result, and by providers reading
/// their resolved dependency values.
pub fn downcast<T: Any + Send + Sync + Clone>(value: &Value) -> Result<T, EngineError> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| EngineError::Provider(format!("value was not a {}", std::any::type_name::<T>())))
}
