// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fmt;

/// Errors raised by the engine, covering both graph-build-time misuse and run-time
/// provider/lifecycle failures.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// A Parameter placeholder had no entry in the `params` passed to `run`.
    MissingArgument(String),
    /// The `params` value handed to `run` was not a map, an array of pairs, or a record.
    InvalidParams,
    /// `depends_on` was given something that is neither a Node, a string, nor a symbol.
    InvalidEdge,
    /// A node's gate was SHUTDOWN at the time its value was requested.
    Shutdown,
    /// A provider closure returned an error.
    Provider(String),
    /// A dispose closure returned an error during shutdown or reset.
    Dispose(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MissingArgument(key) => write!(f, "Missing argument: {key}"),
            EngineError::InvalidParams => {
                write!(
                    f,
                    "Must be either a Map, an array of key/value pairs or an object"
                )
            }
            EngineError::InvalidEdge => {
                write!(f, "A function can depend on a dependency or a string/symbol")
            }
            EngineError::Shutdown => write!(f, "The dependency is now shutdown"),
            EngineError::Provider(msg) => write!(f, "{msg}"),
            EngineError::Dispose(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<String> for EngineError {
    fn from(msg: String) -> EngineError {
        EngineError::Provider(msg)
    }
}

impl From<&str> for EngineError {
    fn from(msg: &str) -> EngineError {
        EngineError::Provider(msg.to_string())
    }
}
