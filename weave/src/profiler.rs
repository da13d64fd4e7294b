//! Probabilistic per-message tracing.
//!
//! A small fraction of messages is tagged when it enters the system. Tagged
//! messages record a `Prof*` statistic at each point they pass (enqueue,
//! dequeue, remote hand-off, ...) with the flow key as value, so a flow can
//! be followed across instances and runtimes.

use rand::Rng;
use weave_api::{MsgHeader, StatKind};

use crate::stats::StatsEngine;

/// Item id under which every profiling point is recorded.
pub const PROFILER_ITEM_ID: u32 = 0;

#[derive(Debug, Clone, Copy)]
pub struct Profiler {
    probability: f64,
}

impl Profiler {
    /// `probability` is clamped to `[0, 1]`.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn is_enabled(&self) -> bool {
        self.probability > 0.0
    }

    /// Decides whether `header` is profiled. Returns the decision.
    pub fn tag(&self, header: &mut MsgHeader) -> bool {
        header.do_profile = self.is_enabled() && rand::thread_rng().gen_bool(self.probability);
        header.do_profile
    }

    /// Records `point` for a tagged message; untagged messages are ignored.
    pub fn record(&self, stats: &StatsEngine, point: StatKind, header: &MsgHeader) {
        if header.do_profile && point.is_profiler() {
            stats.record_value(point, PROFILER_ITEM_ID, header.key.flow as f64);
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(0.0)
    }
}
