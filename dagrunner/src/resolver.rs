// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};

use crate::cache::Cache;
use crate::context::{Context, Event, EventRecord};
use crate::error::EngineError;
use crate::node::{Edge, Node, SharedResult};
use crate::params::Params;
use crate::timings::{TimingRecord, Timings};
use crate::value::{self, Value};

/// Cache key under which the current run's `Timings` are reachable.
pub const META_KEY: &str = "__dagrunner_meta__";
/// Cache key under which the current run's execution id is reachable.
pub const EXECUTION_ID_KEY: &str = "__dagrunner_execution_id__";

static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn generate_execution_id() -> String {
    format!("exec-{}", EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed))
}

struct Inner {
    cache: Cache,
    timings: Arc<Timings>,
    execution_id: String,
    context: Option<Context>,
    executor: task_executor::Executor,
}

/// Drives one `run`: walks a DAG from its roots, at-most-once per node per run,
/// fanning edges out in parallel, and records timings/events along the way.
#[derive(Clone)]
pub struct Resolver(Arc<Inner>);

impl Resolver {
    pub fn new(params: Params, context: Option<Context>) -> Resolver {
        let (mut params_map, overrides) = params.split();

        let execution_id = params_map
            .get(EXECUTION_ID_KEY)
            .and_then(|v| v.downcast_ref::<String>().cloned())
            .unwrap_or_else(generate_execution_id);

        let timings = Arc::new(Timings::new());
        params_map.insert(EXECUTION_ID_KEY.to_string(), value::wrap(execution_id.clone()));
        params_map.insert(META_KEY.to_string(), value::wrap(timings.clone()));

        Resolver(Arc::new(Inner {
            cache: Cache::new(params_map, overrides),
            timings,
            execution_id,
            context,
            executor: task_executor::Executor::new(),
        }))
    }

    fn cache(&self) -> &Cache {
        &self.0.cache
    }

    fn executor(&self) -> task_executor::Executor {
        self.0.executor.clone()
    }

    fn context(&self) -> Option<&Context> {
        self.0.context.as_ref()
    }

    fn timings(&self) -> Arc<Timings> {
        self.0.timings.clone()
    }

    fn execution_id(&self) -> String {
        self.0.execution_id.clone()
    }

    fn param(&self, key: &str) -> Result<Value, EngineError> {
        self.cache().param(key)
    }

    pub fn timings_snapshot(&self) -> Vec<TimingRecord> {
        self.0.timings.snapshot()
    }

    /// Resolves `node`, recursively resolving and fanning out its edges in parallel.
    /// Boxed because the recursion through `spawn_invocation` would otherwise produce
    /// an infinitely-sized future type.
    pub fn visit(&self, node: Node) -> BoxFuture<'static, Result<Value, EngineError>> {
        let resolver = self.clone();
        async move { resolver.visit_once(node).await }.boxed()
    }

    async fn visit_once(&self, node: Node) -> Result<Value, EngineError> {
        if let Some(ctx) = self.context() {
            ctx.add(node.clone());
        }

        let node_id = node.id();

        if let Some(value) = self.cache().override_for(node_id) {
            // A mock override bypasses both the provider and context enrollment.
            if let Some(ctx) = self.context() {
                ctx.remove(&node);
            }
            return Ok(value);
        }

        if let Some(memo) = node.existing_memo() {
            self.cache().install(node_id, memo.clone());
            // A memo hit skips re-invoking this node's provider, but its dependencies
            // must still be enrolled under this context: another context reusing an
            // already-memoized Resource must still be able to hold (and later
            // release) everything that Resource was built from, or a dependency could
            // be disposed out from under a context that never stopped needing it.
            self.enroll_transitively(node.edges()).await;
            return memo.await;
        }

        let mut created = false;
        let shared = {
            let resolver = self.clone();
            let node_for_cache = node.clone();
            self.cache().get_or_insert_with(node_id, || {
                created = true;
                resolver.spawn_invocation(node_for_cache)
            })
        };
        if created && node.is_resource() {
            node.set_memo(shared.clone());
        }

        let result = shared.await;
        if node.is_resource() && result.is_err() {
            node.clear_memo();
        }
        result
    }

    /// Walks `edges` purely to propagate Context enrollment, recursing into each
    /// dependency's own edges without invoking any provider. Used on a Resource memo
    /// hit, where the value is already known but the dependency closure still needs
    /// to be tracked under the requesting context.
    fn enroll_transitively(&self, edges: Vec<Edge>) -> BoxFuture<'static, ()> {
        let resolver = self.clone();
        async move {
            let futs: Vec<_> = edges
                .into_iter()
                .filter_map(|edge| match edge {
                    Edge::Node(dep) => Some(resolver.enroll_node(dep)),
                    Edge::Param(_) => None,
                })
                .collect();
            futures::future::join_all(futs).await;
        }
        .boxed()
    }

    fn enroll_node(&self, node: Node) -> BoxFuture<'static, ()> {
        let resolver = self.clone();
        async move {
            if let Some(ctx) = resolver.context() {
                ctx.add(node.clone());
            }
            resolver.enroll_transitively(node.edges()).await;
        }
        .boxed()
    }

    fn spawn_invocation(&self, node: Node) -> SharedResult {
        let resolver = self.clone();
        let context = self.context().cloned();
        let timings = self.timings();
        let execution_id = self.execution_id();
        let executor = self.executor();
        let node_label = node.label();

        let body = async move {
            let edge_futures: Vec<BoxFuture<'static, Result<Value, EngineError>>> = node
                .edges()
                .into_iter()
                .map(|edge| match edge {
                    Edge::Node(dep) => resolver.visit(dep),
                    Edge::Param(key) => {
                        let value = resolver.param(&key);
                        async move { value }.boxed()
                    }
                })
                .collect();
            let args = futures::future::try_join_all(edge_futures).await?;

            log::trace!("starting {}", node.label());
            let time_start = Instant::now();
            let result = node.invoke(args).await;
            let time_end = Instant::now();
            match &result {
                Ok(_) => log::trace!("settled {} in {:?}", node.label(), time_end - time_start),
                Err(e) => log::debug!("settled {} with error: {e}", node.label()),
            }

            timings.record(TimingRecord {
                node: node.label(),
                context: context.as_ref().map(|c| c.name().to_string()),
                time_start,
                time_end,
                error: result.as_ref().err().map(|e| e.to_string()),
            });

            if let Some(ctx) = &context {
                let event = if result.is_ok() { Event::SuccessRun } else { Event::FailRun };
                ctx.emit(
                    event,
                    &EventRecord {
                        dependency: node.clone(),
                        context: ctx.name().to_string(),
                        time_start,
                        time_end,
                        execution_id: execution_id.clone(),
                        error: result.as_ref().err().map(|e| e.to_string()),
                    },
                );
            }

            result
        };

        // Spawning each node's invocation as its own task (rather than just composing
        // futures in place) is what gives independent branches of the DAG genuine
        // parallelism instead of merely cooperative interleaving on one task.
        executor
            .spawn(body, move |join_error| {
                Err(EngineError::Provider(format!(
                    "{node_label} panicked: {join_error}"
                )))
            })
            .boxed()
            .shared()
    }
}

/// Executes `root`, returning its resolved value (or the first error encountered along
/// the way to it).
pub async fn run(root: Node, params: Params, context: Option<Context>) -> Result<Value, EngineError> {
    let resolver = Resolver::new(params, context);
    resolver.visit(root).await
}

/// Like `run`, but accepts `params` as a type-erased `Value` arriving from a dynamic
/// boundary (e.g. a cross-language caller) rather than from statically-typed Rust
/// code. Fails with `EngineError::InvalidParams` if `params` is none of the three
/// accepted shapes.
pub async fn run_dynamic(root: Node, params: &Value, context: Option<Context>) -> Result<Value, EngineError> {
    let params = Params::try_from_dynamic(params)?;
    run(root, params, context).await
}

/// Executes every root in `roots` under one shared cache (so a node shared between
/// two roots still runs at most once), returning results in the same order as `roots`.
pub async fn run_many(
    roots: Vec<Node>,
    params: Params,
    context: Option<Context>,
) -> Vec<Result<Value, EngineError>> {
    let resolver = Resolver::new(params, context);
    let futures: Vec<_> = roots.into_iter().map(|root| resolver.visit(root)).collect();
    futures::future::join_all(futures).await
}
