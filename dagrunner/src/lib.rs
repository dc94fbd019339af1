// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! A directed-acyclic-graph execution engine: nodes are user-supplied async
//! computations with declared dependencies; `run` resolves a node's full dependency
//! closure with at-most-once-per-run semantics and parallel fan-out along independent
//! branches, and a `Context` tracks enough of that run to tear it down again in
//! reverse-topological order.

mod adjacency;
mod cache;
mod config;
mod context;
mod error;
mod lifecycle;
mod node;
mod params;
mod resolver;
mod timings;
mod value;

pub use adjacency::adjacency_list as get_adjacency_list;
pub use config::EngineConfig;
pub use context::{Context, Event, EventRecord, Handler};
pub use error::EngineError;
pub use gate::Status;
pub use lifecycle::{reset_context, shutdown_context, TransitionSummary};
pub use node::{DisposeFn, Edge, Node, ProviderFn};
pub use params::{ParamKey, Params};
pub use resolver::{run, run_dynamic, run_many, Resolver, EXECUTION_ID_KEY, META_KEY};
pub use timings::{TimingRecord, Timings};
pub use value::{downcast, wrap, Value};

#[cfg(test)]
mod tests;
