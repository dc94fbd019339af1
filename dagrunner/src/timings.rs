// Copyright 2026 The dagrunner Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::time::Instant;

use parking_lot::Mutex;

/// One node visit's timing, recorded regardless of whether the visit succeeded.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    pub node: String,
    pub context: Option<String>,
    pub time_start: Instant,
    pub time_end: Instant,
    pub error: Option<String>,
}

/// An append-only log of every node visit made during one `run`, reachable by callers
/// through the engine's well-known META cache key.
#[derive(Default)]
pub struct Timings(Mutex<Vec<TimingRecord>>);

impl Timings {
    pub fn new() -> Timings {
        Timings(Mutex::new(Vec::new()))
    }

    pub fn record(&self, record: TimingRecord) {
        self.0.lock().push(record);
    }

    pub fn snapshot(&self) -> Vec<TimingRecord> {
        self.0.lock().clone()
    }
}
