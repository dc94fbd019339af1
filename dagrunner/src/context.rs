// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::adjacency;
use crate::config::EngineConfig;
use crate::node::Node;

/// The lifecycle events a Context can notify listeners about.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Event {
    SuccessRun,
    FailRun,
    SuccessShutdown,
    FailShutdown,
    SuccessReset,
    FailReset,
}

/// The payload delivered to an event handler.
#[derive(Clone)]
pub struct EventRecord {
    pub dependency: Node,
    pub context: String,
    pub time_start: Instant,
    pub time_end: Instant,
    pub execution_id: String,
    pub error: Option<String>,
}

pub type Handler = Arc<dyn Fn(&EventRecord) + Send + Sync>;

struct Inner {
    name: String,
    members: Mutex<HashSet<Node>>,
    listeners: Mutex<HashMap<Event, Handler>>,
    config: EngineConfig,
}

/// Tracks every Node enrolled under it during a `run`, and offers reverse-topological
/// shutdown/reset over exactly that set. A Node may be enrolled under several Contexts
/// at once; it is only released (and, for a Resource, disposed) once every Context
/// holding it has released it.
#[derive(Clone)]
pub struct Context(Arc<Inner>);

impl Context {
    pub fn new(name: impl Into<String>) -> Context {
        Context::with_config(name, EngineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: EngineConfig) -> Context {
        Context(Arc::new(Inner {
            name: name.into(),
            members: Mutex::new(HashSet::new()),
            listeners: Mutex::new(HashMap::new()),
            config,
        }))
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn config(&self) -> EngineConfig {
        self.0.config
    }

    pub fn add(&self, node: Node) {
        node.enroll(self.id());
        self.0.members.lock().insert(node);
    }

    pub fn remove(&self, node: &Node) {
        node.leave(self.id());
        self.0.members.lock().remove(node);
    }

    pub fn has(&self, node: &Node) -> bool {
        self.0.members.lock().contains(node)
    }

    pub fn size(&self) -> usize {
        self.0.members.lock().len()
    }

    pub fn members(&self) -> Vec<Node> {
        self.0.members.lock().iter().cloned().collect()
    }

    pub fn get_adjacency_list(&self) -> Vec<Node> {
        adjacency::adjacency_list(self.members())
    }

    /// Registers a handler for `event`. A later registration for the same event
    /// replaces an earlier one, matching the engine's single-handler-per-event
    /// listener surface.
    pub fn on(&self, event: Event, handler: Handler) {
        self.0.listeners.lock().insert(event, handler);
    }

    /// Invokes the handler registered for `event`, if any. A panicking handler must
    /// not unwind into the caller -- `emit` is reached both from a spawned node task
    /// (resolver.rs) and from the direct `shutdown`/`reset` call stack (lifecycle.rs),
    /// and in neither place should a broken listener abort the run or the teardown.
    pub(crate) fn emit(&self, event: Event, record: &EventRecord) {
        let handler = self.0.listeners.lock().get(&event).cloned();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(record))).is_err() {
                log::warn!(
                    "event handler for {event:?} on context {} panicked; discarding",
                    self.0.name
                );
            }
        }
    }

    /// Tears down every Node enrolled under this Context, in reverse-topological
    /// order, disposing Resources whose last holding Context this turns out to be.
    pub async fn shutdown(&self) -> crate::lifecycle::TransitionSummary {
        crate::lifecycle::shutdown_context(self).await
    }

    /// Like `shutdown`, but transitions nodes back to READY instead of SHUTDOWN,
    /// clearing Resource memoization so the next `run` starts fresh.
    pub async fn reset(&self) -> crate::lifecycle::TransitionSummary {
        crate::lifecycle::reset_context(self).await
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Context {}
