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

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

/// The two statuses a `StatusGate` can hold. Additional statuses are not needed by this crate's
/// consumers, which only ever transition between "available" and "torn down".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Ready,
    Shutdown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ready => write!(f, "ready"),
            Status::Shutdown => write!(f, "shutdown"),
        }
    }
}

///
/// A single-slot cooperative state machine that serializes lifecycle transitions on a value
/// while permitting concurrent reads.
///
/// A `StatusGate` holds a current `Status`, plus (implicitly) at most one pending transition. A
/// call to `get` only ever observes a fully-applied status: if a transition is in flight, `get`
/// waits for it to finish rather than racing it. A call to `change` waits for any transition
/// already in flight, then runs the caller's async `work`, and finally installs the new status --
/// whether `work` succeeded or not. This mirrors a single-writer, multi-reader lock in which the
/// "critical section" is the async work itself, which is why this is built atop a `tokio::sync::
/// Mutex` (which, unlike `parking_lot::Mutex`, may be held across an `.await`) rather than
/// `parking_lot`, which this crate otherwise prefers.
///
#[derive(Clone)]
pub struct StatusGate {
    status: Arc<Mutex<Status>>,
}

impl StatusGate {
    pub fn new(initial: Status) -> StatusGate {
        StatusGate {
            status: Arc::new(Mutex::new(initial)),
        }
    }

    ///
    /// Returns the current status. If a transition is in flight, this resolves only after that
    /// transition has completed: it can never observe a half-applied transition.
    ///
    pub async fn get(&self) -> Status {
        *self.status.lock().await
    }

    ///
    /// Enqueues a transition to `new_status`. Waits for any transition already in flight, then
    /// awaits `work`, then installs `new_status` regardless of whether `work` succeeded -- a
    /// failed teardown must still advance the gate rather than leaving it stuck. Returns `work`'s
    /// output to the caller for chaining.
    ///
    pub async fn change<F, R>(&self, new_status: Status, work: F) -> R
    where
        F: Future<Output = R>,
    {
        let mut status = self.status.lock().await;
        let result = work.await;
        *status = new_status;
        result
    }
}
