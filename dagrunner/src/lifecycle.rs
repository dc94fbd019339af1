// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use gate::Status;
use parking_lot::Mutex;

use crate::context::{Context, Event, EventRecord};
use crate::node::Node;
use crate::resolver::generate_execution_id;

/// Outcome of tearing down (or resetting) a Context: how many nodes actually
/// transitioned versus how many were left alone (already at the target status, or
/// still held by another Context). `failures` is only populated when the Context's
/// `EngineConfig` opts into lifecycle failure collection; otherwise a failure is only
/// logged at `warn` and reachable through the `FailShutdown`/`FailReset` event.
#[derive(Debug, Clone, Default)]
pub struct TransitionSummary {
    pub transitioned: usize,
    pub skipped: usize,
    pub failures: Vec<(String, String)>,
}

pub async fn shutdown_context(context: &Context) -> TransitionSummary {
    run_transition(context, Status::Shutdown).await
}

pub async fn reset_context(context: &Context) -> TransitionSummary {
    run_transition(context, Status::Ready).await
}

async fn run_transition(context: &Context, target: Status) -> TransitionSummary {
    let transitioned = Arc::new(AtomicUsize::new(0));
    let skipped = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let collect_failures = context.config().collects_lifecycle_failures();
    let execution_id = generate_execution_id();

    log::debug!(
        "context {} starting {target} over {} members",
        context.name(),
        context.size()
    );

    loop {
        let next = context.members().into_iter().next();
        let Some(node) = next else {
            break;
        };
        shut_down_node(
            context.clone(),
            node,
            target,
            execution_id.clone(),
            transitioned.clone(),
            skipped.clone(),
            failures.clone(),
            collect_failures,
        )
        .await;
    }

    let summary = TransitionSummary {
        transitioned: transitioned.load(Ordering::SeqCst),
        skipped: skipped.load(Ordering::SeqCst),
        failures: Arc::try_unwrap(failures).map(|m| m.into_inner()).unwrap_or_default(),
    };
    log::debug!(
        "context {} finished {target}: {} transitioned, {} skipped, {} failed",
        context.name(),
        summary.transitioned,
        summary.skipped,
        summary.failures.len()
    );
    summary
}

/// Tears down `node` within `context`: recurses into its live successors first (so
/// that, per edge A -> B, A transitions before B), then transitions `node` itself.
/// Boxed for the same reason as `Resolver::visit` -- the recursion is not otherwise
/// representable as a fixed-size future.
fn shut_down_node(
    context: Context,
    node: Node,
    target: Status,
    execution_id: String,
    transitioned: Arc<AtomicUsize>,
    skipped: Arc<AtomicUsize>,
    failures: Arc<Mutex<Vec<(String, String)>>>,
    collect_failures: bool,
) -> BoxFuture<'static, ()> {
    async move {
        if !context.has(&node) {
            // Already handled via another branch of the walk.
            return;
        }
        context.remove(&node);

        let successors: Vec<_> = node
            .inverse_edges()
            .into_iter()
            .map(|succ| {
                shut_down_node(
                    context.clone(),
                    succ,
                    target,
                    execution_id.clone(),
                    transitioned.clone(),
                    skipped.clone(),
                    failures.clone(),
                    collect_failures,
                )
            })
            .collect();
        futures::future::join_all(successors).await;

        let time_start = Instant::now();
        let result = node.transition(target).await;
        let time_end = Instant::now();

        let (success_event, fail_event) = match target {
            Status::Shutdown => (Event::SuccessShutdown, Event::FailShutdown),
            Status::Ready => (Event::SuccessReset, Event::FailReset),
        };

        match result {
            Ok(true) => {
                transitioned.fetch_add(1, Ordering::SeqCst);
                log::trace!("{target} {} in context {}", node.label(), context.name());
                context.emit(
                    success_event,
                    &EventRecord {
                        dependency: node.clone(),
                        context: context.name().to_string(),
                        time_start,
                        time_end,
                        execution_id: execution_id.clone(),
                        error: None,
                    },
                );
            }
            Ok(false) => {
                skipped.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("{target} of {} in context {} failed: {e}", node.label(), context.name());
                if collect_failures {
                    failures.lock().push((node.label(), e.to_string()));
                }
                context.emit(
                    fail_event,
                    &EventRecord {
                        dependency: node.clone(),
                        context: context.name().to_string(),
                        time_start,
                        time_end,
                        execution_id: execution_id.clone(),
                        error: Some(e.to_string()),
                    },
                );
            }
        }
    }
    .boxed()
}
