use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

use weave_api::{RuntimeId, StatKind};

use crate::error::SystemError;

pub const DEFAULT_DATA_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_CTRL_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_STAT_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_STAT_ITEMS: usize = 36;

// --- Statistics Configuration ---

/// Sizing of the statistics engine. Every buffer is allocated up front from
/// these numbers; nothing grows afterwards.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Samples retained per item before the ring wraps.
    pub capacity: usize,

    /// Maximum number of distinct items per statistic kind.
    pub max_items: usize,

    /// Kinds that are never recorded.
    pub disabled: Vec<StatKind>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STAT_CAPACITY,
            max_items: DEFAULT_MAX_STAT_ITEMS,
            disabled: Vec::new(),
        }
    }
}

impl StatsConfig {
    pub fn is_enabled(&self, kind: StatKind) -> bool {
        !self.disabled.contains(&kind)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn disable(mut self, kind: StatKind) -> Self {
        if !self.disabled.contains(&kind) {
            self.disabled.push(kind);
        }
        self
    }
}

// --- Runtime Configuration ---

/// Configuration for one runtime process.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identity of this runtime among its peers.
    pub runtime_id: RuntimeId,

    /// Address advertised for this runtime.
    pub address: Ipv4Addr,

    /// Number of worker threads hosting instances.
    pub worker_count: usize,

    /// Capacity of each instance's data queue.
    pub data_queue_capacity: usize,

    /// Capacity of each instance's control queue.
    pub ctrl_queue_capacity: usize,

    /// How long an idle worker waits for its doorbell before re-checking.
    pub idle_wait: Duration,

    /// Minimum milliseconds between two queue-length samples of one instance.
    pub queue_len_period_ms: u64,

    /// Probability in `[0, 1]` that an inbound message is tagged for profiling.
    pub profiler_tag_probability: f64,

    pub stats: StatsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_id: RuntimeId(1),
            address: Ipv4Addr::LOCALHOST,
            worker_count: num_cpus::get(),
            data_queue_capacity: DEFAULT_DATA_QUEUE_CAPACITY,
            ctrl_queue_capacity: DEFAULT_CTRL_QUEUE_CAPACITY,
            idle_wait: Duration::from_millis(50),
            queue_len_period_ms: 100,
            profiler_tag_probability: 0.0,
            stats: StatsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new(runtime_id: RuntimeId) -> Self {
        Self {
            runtime_id,
            ..Default::default()
        }
    }

    pub fn with_address(mut self, address: Ipv4Addr) -> Self {
        self.address = address;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_data_queue_capacity(mut self, capacity: usize) -> Self {
        self.data_queue_capacity = capacity;
        self
    }

    pub fn with_ctrl_queue_capacity(mut self, capacity: usize) -> Self {
        self.ctrl_queue_capacity = capacity;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    pub fn with_queue_len_period_ms(mut self, period_ms: u64) -> Self {
        self.queue_len_period_ms = period_ms;
        self
    }

    pub fn with_profiler_tag_probability(mut self, probability: f64) -> Self {
        self.profiler_tag_probability = probability;
        self
    }

    pub fn with_stats(mut self, stats: StatsConfig) -> Self {
        self.stats = stats;
        self
    }

    /// Rejects values the runtime cannot start with.
    pub fn validate(&self) -> Result<(), SystemError> {
        if self.worker_count == 0 {
            return Err(SystemError::Config("worker_count must be at least 1".into()));
        }
        if self.data_queue_capacity == 0 || self.ctrl_queue_capacity == 0 {
            return Err(SystemError::Config("queue capacities must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.profiler_tag_probability) {
            return Err(SystemError::Config(format!(
                "profiler_tag_probability {} is outside [0, 1]",
                self.profiler_tag_probability
            )));
        }
        if self.stats.capacity < 2 {
            return Err(SystemError::Config("stats capacity must be at least 2".into()));
        }
        if self.stats.max_items == 0 {
            return Err(SystemError::Config("stats max_items must be at least 1".into()));
        }
        Ok(())
    }
}
