// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;

use fnv::FnvHashMap;

use crate::error::EngineError;
use crate::node::Node;
use crate::value::Value;

/// A key under which a value is supplied to `run`: either a named Parameter, or a Node
/// instance used as a mock override for that exact node.
#[derive(Clone)]
pub enum ParamKey {
    Name(String),
    Override(Node),
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> ParamKey {
        ParamKey::Name(name.to_string())
    }
}

impl From<String> for ParamKey {
    fn from(name: String) -> ParamKey {
        ParamKey::Name(name)
    }
}

impl From<Node> for ParamKey {
    fn from(node: Node) -> ParamKey {
        ParamKey::Override(node)
    }
}

/// The values supplied to one `run` invocation. Accepts the three shapes described at
/// the engine's external boundary: a keyed mapping, an ordered list of key/value
/// pairs, or (equivalently, for a statically-typed caller) a plain Rust collection of
/// either. Using a Node as a key marks that entry as a mock override rather than a
/// Parameter binding.
#[derive(Clone, Default)]
pub struct Params(Vec<(ParamKey, Value)>);

impl Params {
    pub fn new() -> Params {
        Params(Vec::new())
    }

    pub fn with(mut self, key: impl Into<ParamKey>, value: Value) -> Params {
        self.0.push((key.into(), value));
        self
    }

    pub fn from_pairs(pairs: Vec<(ParamKey, Value)>) -> Params {
        Params(pairs)
    }

    pub fn from_map(map: HashMap<String, Value>) -> Params {
        Params(map.into_iter().map(|(k, v)| (ParamKey::Name(k), v)).collect())
    }

    ///
    /// Accepts a value arriving from a dynamic boundary (e.g. a cross-language caller)
    /// rather than from statically-typed Rust code, attempting each of the three
    /// accepted shapes in turn. Fails with the stable `InvalidParams` message if none
    /// match, matching the engine's documented external contract.
    ///
    pub fn try_from_dynamic(input: &Value) -> Result<Params, EngineError> {
        if let Some(map) = input.downcast_ref::<HashMap<String, Value>>() {
            return Ok(Params::from_map(map.clone()));
        }
        if let Some(pairs) = input.downcast_ref::<Vec<(String, Value)>>() {
            return Ok(Params(
                pairs.iter().cloned().map(|(k, v)| (ParamKey::Name(k), v)).collect(),
            ));
        }
        if let Some(pairs) = input.downcast_ref::<Vec<(ParamKey, Value)>>() {
            return Ok(Params(pairs.clone()));
        }
        Err(EngineError::InvalidParams)
    }

    pub(crate) fn split(self) -> (FnvHashMap<String, Value>, FnvHashMap<usize, Value>) {
        let mut params = FnvHashMap::default();
        let mut overrides = FnvHashMap::default();
        for (key, value) in self.0 {
            match key {
                ParamKey::Name(name) => {
                    params.insert(name, value);
                }
                ParamKey::Override(node) => {
                    overrides.insert(node.id(), value);
                }
            }
        }
        (params, overrides)
    }
}
