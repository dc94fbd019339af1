// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use gate::{Status, StatusGate};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Notify;

use crate::error::EngineError;
use crate::value::Value;

pub type ProviderFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, EngineError>> + Send + Sync>;
pub type DisposeFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync>;

/// A provider's (or dispose hook's) in-flight result, shared so that every caller
/// waiting on the same invocation observes the same settled value. This is also what
/// makes Resource memoization trivial: the stored `Shared` future is itself the memo.
pub type SharedResult = Shared<BoxFuture<'static, Result<Value, EngineError>>>;

/// An edge in a node's dependency list: either another Node, or a named Parameter
/// placeholder resolved from the caller's `params`.
#[derive(Clone)]
pub enum Edge {
    Node(Node),
    Param(String),
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Node(n) => write!(f, "Edge::Node({})", n.label()),
            Edge::Param(key) => write!(f, "Edge::Param({key})"),
        }
    }
}

impl Edge {
    /// Builds an `Edge` from a value arriving at a dynamic boundary, where it cannot
    /// be known at compile time whether the caller handed over a Node or a parameter
    /// name. Fails with `EngineError::InvalidEdge` for anything else.
    pub fn try_from_dynamic(value: &Value) -> Result<Edge, EngineError> {
        if let Some(node) = value.downcast_ref::<Node>() {
            return Ok(Edge::Node(node.clone()));
        }
        if let Some(name) = value.downcast_ref::<String>() {
            return Ok(Edge::Param(name.clone()));
        }
        Err(EngineError::InvalidEdge)
    }
}

enum Kind {
    Transient,
    Resource {
        memo: SyncMutex<Option<SharedResult>>,
        dispose: SyncMutex<Option<DisposeFn>>,
    },
}

struct Inner {
    name: Option<String>,
    kind: Kind,
    edges: SyncMutex<Vec<Edge>>,
    inverse_edges: SyncMutex<Vec<Weak<Inner>>>,
    provider: SyncMutex<Option<ProviderFn>>,
    gate: StatusGate,
    in_flight_count: AtomicUsize,
    in_flight_notify: Notify,
    context_membership: SyncMutex<HashSet<usize>>,
}

/// A node in the dependency graph: a Transient computation (re-run every execution) or
/// a Resource (memoized across executions until shut down or reset).
#[derive(Clone)]
pub struct Node(Arc<Inner>);

impl Node {
    fn new(name: Option<String>, kind: Kind) -> Node {
        Node(Arc::new(Inner {
            name,
            kind,
            edges: SyncMutex::new(Vec::new()),
            inverse_edges: SyncMutex::new(Vec::new()),
            provider: SyncMutex::new(None),
            gate: StatusGate::new(Status::Ready),
            in_flight_count: AtomicUsize::new(0),
            in_flight_notify: Notify::new(),
            context_membership: SyncMutex::new(HashSet::new()),
        }))
    }

    pub fn transient(name: impl Into<String>) -> Node {
        Node::new(Some(name.into()), Kind::Transient)
    }

    pub fn resource(name: impl Into<String>) -> Node {
        Node::new(
            Some(name.into()),
            Kind::Resource {
                memo: SyncMutex::new(None),
                dispose: SyncMutex::new(None),
            },
        )
    }

    pub fn anonymous_transient() -> Node {
        Node::new(None, Kind::Transient)
    }

    pub fn anonymous_resource() -> Node {
        Node::new(
            None,
            Kind::Resource {
                memo: SyncMutex::new(None),
                dispose: SyncMutex::new(None),
            },
        )
    }

    pub fn is_resource(&self) -> bool {
        matches!(self.0.kind, Kind::Resource { .. })
    }

    /// Replaces this node's edges, keeping `inverse_edges` symmetric on both the old
    /// and new dependency sets.
    pub fn depends_on(&self, edges: Vec<Edge>) -> &Node {
        let mut current = self.0.edges.lock();
        for old in current.iter() {
            if let Edge::Node(dep) = old {
                dep.remove_inverse_edge(&self.0);
            }
        }
        for edge in &edges {
            if let Edge::Node(dep) = edge {
                dep.add_inverse_edge(&self.0);
            }
        }
        *current = edges;
        drop(current);
        self
    }

    /// Like `depends_on`, but accepts edges arriving at a dynamic boundary, where each
    /// one must be classified at run time as either a Node or a parameter name. Fails
    /// with `EngineError::InvalidEdge` without mutating this node's edges if any
    /// element is neither.
    pub fn depends_on_dynamic(&self, edges: Vec<Value>) -> Result<&Node, EngineError> {
        let edges = edges
            .iter()
            .map(Edge::try_from_dynamic)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.depends_on(edges))
    }

    pub fn provides<F>(&self, provider: F) -> &Node
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, EngineError>> + Send + Sync + 'static,
    {
        *self.0.provider.lock() = Some(Arc::new(provider));
        self
    }

    /// Registers a teardown hook. Only meaningful for Resource nodes; calling it on a
    /// Transient node is a silent no-op, since Transient nodes have no memo to dispose.
    pub fn disposes<F>(&self, dispose: F) -> &Node
    where
        F: Fn(Value) -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync + 'static,
    {
        if let Kind::Resource { dispose: slot, .. } = &self.0.kind {
            *slot.lock() = Some(Arc::new(dispose));
        }
        self
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.0.edges.lock().clone()
    }

    pub fn label(&self) -> String {
        self.0.name.clone().unwrap_or_else(|| format!("node@{:x}", self.id()))
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn add_inverse_edge(&self, dependent: &Arc<Inner>) {
        self.0.inverse_edges.lock().push(Arc::downgrade(dependent));
    }

    fn remove_inverse_edge(&self, dependent: &Arc<Inner>) {
        let target = Arc::as_ptr(dependent);
        self.0.inverse_edges.lock().retain(|weak| match weak.upgrade() {
            Some(strong) => !Arc::ptr_eq(&strong, dependent) && Arc::as_ptr(&strong) != target,
            None => false,
        });
    }

    /// Live successors of this node: the set of nodes whose `edges` include this node.
    pub fn inverse_edges(&self) -> Vec<Node> {
        self.0
            .inverse_edges
            .lock()
            .iter()
            .filter_map(|weak| weak.upgrade().map(Node))
            .collect()
    }

    pub fn context_membership(&self) -> Vec<usize> {
        self.0.context_membership.lock().iter().copied().collect()
    }

    pub fn enroll(&self, context_id: usize) {
        self.0.context_membership.lock().insert(context_id);
    }

    pub fn leave(&self, context_id: usize) {
        self.0.context_membership.lock().remove(&context_id);
    }

    pub fn has_context_membership(&self) -> bool {
        !self.0.context_membership.lock().is_empty()
    }

    /// Returns the currently memoized invocation for a Resource node, if one exists.
    /// Transient nodes never have a memo, so this always returns `None` for them.
    pub fn existing_memo(&self) -> Option<SharedResult> {
        match &self.0.kind {
            Kind::Resource { memo, .. } => memo.lock().clone(),
            Kind::Transient => None,
        }
    }

    pub fn set_memo(&self, shared: SharedResult) {
        if let Kind::Resource { memo, .. } = &self.0.kind {
            *memo.lock() = Some(shared);
        }
    }

    pub fn clear_memo(&self) {
        if let Kind::Resource { memo, .. } = &self.0.kind {
            *memo.lock() = None;
        }
    }

    fn dispose_fn(&self) -> Option<DisposeFn> {
        match &self.0.kind {
            Kind::Resource { dispose, .. } => dispose.lock().clone(),
            Kind::Transient => None,
        }
    }

    pub fn gate(&self) -> &StatusGate {
        &self.0.gate
    }

    fn enter_in_flight(&self) {
        self.0.in_flight_count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_in_flight(&self) {
        if self.0.in_flight_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.in_flight_notify.notify_waiters();
        }
    }

    /// Waits for every invocation of `invoke` currently running on this node to finish.
    pub async fn drain_in_flight(&self) {
        loop {
            if self.0.in_flight_count.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.0.in_flight_notify.notified();
            if self.0.in_flight_count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Invokes this node's provider with already-resolved edge values, respecting the
    /// gate (a SHUTDOWN node refuses new invocations) and tracking the invocation in
    /// `in_flight` so that lifecycle transitions can wait for it to settle.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, EngineError> {
        if self.gate().get().await == Status::Shutdown {
            return Err(EngineError::Shutdown);
        }
        let provider = self
            .0
            .provider
            .lock()
            .clone()
            .ok_or_else(|| EngineError::Provider(format!("{} has no provider configured", self.label())))?;
        self.enter_in_flight();
        let result = provider(args).await;
        self.exit_in_flight();
        result
    }

    /// Transitions this node's gate to `target`, after draining in-flight invocations
    /// and (for a Resource whose memo is set) invoking `dispose`. Returns `true` if a
    /// transition actually occurred, `false` if there was nothing to do (already at
    /// the target status, or a Resource with no established memo).
    pub async fn transition(&self, target: Status) -> Result<bool, EngineError> {
        if target == Status::Shutdown && self.has_context_membership() {
            return Ok(false);
        }
        if self.gate().get().await == target && target == Status::Shutdown {
            return Ok(false);
        }
        if self.is_resource() && self.existing_memo().is_none() {
            let _ = self.gate().change(target, async { () }).await;
            return Ok(false);
        }

        let dispose = self.dispose_fn();
        let memo = self.existing_memo();
        let label = self.label();
        let node_for_drain = self.clone();
        let result: Result<(), EngineError> = self
            .gate()
            .change(target, async move {
                node_for_drain.drain_in_flight().await;
                if let (Some(dispose), Some(memo)) = (dispose, memo) {
                    match memo.await {
                        Ok(value) => dispose(value).await.map_err(|e| {
                            EngineError::Dispose(format!("failed to dispose {label}: {e}"))
                        })?,
                        Err(_) => {
                            // The memoized invocation failed; there is nothing to dispose.
                        }
                    }
                }
                Ok(())
            })
            .await;

        if self.is_resource() {
            self.clear_memo();
        }
        result.map(|()| true)
    }
}

impl Node {
    /// Runs this node as the sole root of a new execution. A thin façade over the
    /// resolver, provided directly on `Node` so that simple call sites don't need to
    /// reach for the free function.
    pub async fn run(
        &self,
        params: crate::params::Params,
        context: Option<crate::context::Context>,
    ) -> Result<Value, EngineError> {
        crate::resolver::run(self.clone(), params, context).await
    }

    /// Transitions this node directly to SHUTDOWN, outside of any Context-driven
    /// teardown. Refuses while any Context still holds this node.
    pub async fn shutdown(&self) -> Result<bool, EngineError> {
        self.transition(Status::Shutdown).await
    }

    /// Transitions this node back to READY, clearing a Resource's memo if present.
    pub async fn reset(&self) -> Result<bool, EngineError> {
        self.transition(Status::Ready).await
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.label())
    }
}
