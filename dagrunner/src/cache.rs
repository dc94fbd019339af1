// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::node::SharedResult;
use crate::value::Value;

/// The per-run cache: dedupes node visits by node identity so that a node's provider
/// runs at most once within a single `run` invocation, no matter how many dependents
/// reach it. Also holds the caller's parameter values and any Node-instance mock
/// overrides for this run.
pub struct Cache {
    node_results: Mutex<FnvHashMap<usize, SharedResult>>,
    params: FnvHashMap<String, Value>,
    overrides: FnvHashMap<usize, Value>,
}

impl Cache {
    pub fn new(params: FnvHashMap<String, Value>, overrides: FnvHashMap<usize, Value>) -> Cache {
        Cache {
            node_results: Mutex::new(FnvHashMap::default()),
            params,
            overrides,
        }
    }

    /// Returns the cached invocation for `node_id` if a visit has already been
    /// installed this run, otherwise calls `make` to create one, installs it, and
    /// returns it. The installation happens before the caller starts awaiting edges,
    /// so two siblings racing to visit the same node share one invocation.
    pub fn get_or_insert_with(&self, node_id: usize, make: impl FnOnce() -> SharedResult) -> SharedResult {
        let mut results = self.node_results.lock();
        if let Some(existing) = results.get(&node_id) {
            return existing.clone();
        }
        let shared = make();
        results.insert(node_id, shared.clone());
        shared
    }

    pub fn install(&self, node_id: usize, shared: SharedResult) {
        self.node_results.lock().insert(node_id, shared);
    }

    pub fn override_for(&self, node_id: usize) -> Option<Value> {
        self.overrides.get(&node_id).cloned()
    }

    pub fn param(&self, key: &str) -> Result<Value, EngineError> {
        self.params
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::MissingArgument(key.to_string()))
    }
}
