// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

/// Knobs that hold across every `run`/`shutdown`/`reset` call on a `Context`, rather
/// than varying per invocation like `params` does.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    collect_lifecycle_failures: bool,
}

impl EngineConfig {
    pub fn new() -> EngineConfig {
        EngineConfig::default()
    }

    /// When set, `Context::shutdown`/`reset` append every dispose/transition failure
    /// to `TransitionSummary::failures` in addition to logging it at `warn`. Off by
    /// default: failures are logged and otherwise discarded, matching the engine's
    /// "errors surface through the return value, handlers never disrupt the engine"
    /// policy.
    pub fn with_lifecycle_failure_collection(mut self, collect: bool) -> EngineConfig {
        self.collect_lifecycle_failures = collect;
        self
    }

    pub(crate) fn collects_lifecycle_failures(&self) -> bool {
        self.collect_lifecycle_failures
    }
}
