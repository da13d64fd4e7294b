//! # Statistics Engine
//!
//! Time-indexed ring buffers of samples, one per `(StatKind, item id)` pair.
//!
//! ## Key Concepts
//! - **Slots**: for every enabled kind, `max_items` rings of `capacity`
//!   samples are allocated when the engine is built. An item id claims a
//!   free slot the first time it is written, and keeps it for the life of the
//!   engine. Claiming allocates nothing.
//! - **Rings**: a slot's ring has a fixed capacity; writes wrap around and set
//!   a rolled-over flag, logged once per wrap.
//! - **Time**: every sample is stamped with the time elapsed since the engine
//!   started. The `*_at` variants take that time explicitly.
//!
//! ## Concurrency
//! The item-id → slot map sits behind an `RwLock` that is written only when
//! a new item binds. Each slot has its own `Mutex`, and no operation holds
//! the map lock while locking a slot, so writes to different items never
//! contend.

mod item;

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{error, warn};
use weave_api::{StatKind, StatSample};

use crate::config::StatsConfig;
use crate::error::StatsError;

use self::item::StatItem;

/// Summary of one item's ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemInfo {
    /// Samples written since the ring last wrapped (a full lap counts as the capacity).
    pub lap_len: usize,
    /// Samples currently retained.
    pub retained: usize,
    pub capacity: usize,
    pub rolled_over: bool,
}

struct KindTable {
    index: RwLock<HashMap<u32, usize>>,
    slots: Vec<Mutex<StatItem>>,
    exhausted_logged: AtomicBool,
}

impl KindTable {
    fn new(max_items: usize, capacity: usize) -> Self {
        Self {
            index: RwLock::new(HashMap::with_capacity(max_items)),
            slots: (0..max_items).map(|_| Mutex::new(StatItem::new(0, capacity))).collect(),
            exhausted_logged: AtomicBool::new(false),
        }
    }

    fn lookup(&self, item: u32) -> Option<usize> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&item)
            .copied()
    }
}

fn lock_slot(slot: &Mutex<StatItem>) -> MutexGuard<'_, StatItem> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-scoped statistics store, shared by reference.
pub struct StatsEngine {
    start: Instant,
    capacity: usize,
    max_items: usize,
    tables: HashMap<StatKind, KindTable>,
}

impl StatsEngine {
    pub fn new(config: &StatsConfig) -> Self {
        let capacity = config.capacity.max(1);
        let tables = StatKind::ALL
            .iter()
            .copied()
            .filter(|kind| config.is_enabled(*kind))
            .map(|kind| (kind, KindTable::new(config.max_items, capacity)))
            .collect();
        Self {
            start: Instant::now(),
            capacity,
            max_items: config.max_items,
            tables,
        }
    }

    /// Time elapsed since the engine started; the clock of every sample.
    pub fn now(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_enabled(&self, kind: StatKind) -> bool {
        self.tables.contains_key(&kind)
    }

    /// Binds `item` to a slot of `kind` ahead of its first write.
    pub fn init_item(&self, kind: StatKind, item: u32) -> Result<(), StatsError> {
        self.bind(kind, item).map(|_| ())
    }

    fn bind(&self, kind: StatKind, item: u32) -> Result<usize, StatsError> {
        let table = self.tables.get(&kind).ok_or(StatsError::Disabled(kind))?;
        if let Some(slot) = table.lookup(item) {
            return Ok(slot);
        }

        let mut index = table.index.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = index.get(&item) {
            return Ok(*slot);
        }
        let slot = index.len();
        if slot >= table.slots.len() {
            return Err(StatsError::SlotsExhausted {
                kind,
                max: self.max_items,
            });
        }
        lock_slot(&table.slots[slot]).item_id = item;
        index.insert(item, slot);
        Ok(slot)
    }

    /// Runs `f` on the item's ring, binding it first. Disabled kinds are
    /// skipped; slot exhaustion is logged once per kind.
    fn with_item<F>(&self, kind: StatKind, item: u32, f: F)
    where
        F: FnOnce(&mut StatItem),
    {
        let Some(table) = self.tables.get(&kind) else {
            return;
        };
        let slot = match self.bind(kind, item) {
            Ok(slot) => slot,
            Err(err) => {
                if !table.exhausted_logged.swap(true, Ordering::Relaxed) {
                    error!(stat = kind.name(), item, error = %err, "cannot record statistic");
                }
                return;
            }
        };
        f(&mut lock_slot(&table.slots[slot]));
    }

    fn read_item<F, R>(&self, kind: StatKind, item: u32, f: F) -> Result<R, StatsError>
    where
        F: FnOnce(&mut StatItem) -> R,
    {
        let table = self.tables.get(&kind).ok_or(StatsError::Disabled(kind))?;
        let slot = table.lookup(item).ok_or(StatsError::NoData { kind, item })?;
        let mut ring = lock_slot(&table.slots[slot]);
        if ring.is_empty() {
            return Err(StatsError::NoData { kind, item });
        }
        Ok(f(&mut ring))
    }

    fn push(kind: StatKind, ring: &mut StatItem, time: Duration, value: f64) {
        if ring.push(time, value) {
            warn!(stat = kind.name(), item = ring.item_id, "statistics rolling over");
        }
    }

    // --- Writes ---

    /// Appends `value` stamped with the current time.
    pub fn record_value(&self, kind: StatKind, item: u32, value: f64) {
        self.record_value_at(kind, item, self.now(), value);
    }

    pub fn record_value_at(&self, kind: StatKind, item: u32, time: Duration, value: f64) {
        self.with_item(kind, item, |ring| Self::push(kind, ring, time, value));
    }

    /// Appends the last value plus `delta` (the first write starts from 0).
    pub fn increment(&self, kind: StatKind, item: u32, delta: f64) {
        self.increment_at(kind, item, self.now(), delta);
    }

    pub fn increment_at(&self, kind: StatKind, item: u32, time: Duration, delta: f64) {
        self.with_item(kind, item, |ring| {
            let last = ring.last().map_or(0.0, |s| s.value);
            Self::push(kind, ring, time, last + delta);
        });
    }

    /// Appends `value` only if it differs from the last recorded value.
    pub fn record_if_changed(&self, kind: StatKind, item: u32, value: f64) {
        self.record_if_changed_at(kind, item, self.now(), value);
    }

    pub fn record_if_changed_at(&self, kind: StatKind, item: u32, time: Duration, value: f64) {
        self.with_item(kind, item, |ring| {
            if ring.last().map_or(true, |s| s.value != value) {
                Self::push(kind, ring, time, value);
            }
        });
    }

    /// Appends `value` only if more than `period_ms` elapsed since the item's
    /// previous write.
    pub fn periodic_record_value(&self, kind: StatKind, item: u32, value: f64, period_ms: u64) {
        self.periodic_record_value_at(kind, item, self.now(), value, period_ms);
    }

    pub fn periodic_record_value_at(
        &self,
        kind: StatKind,
        item: u32,
        time: Duration,
        value: f64,
        period_ms: u64,
    ) {
        let period = Duration::from_millis(period_ms);
        self.with_item(kind, item, |ring| {
            if ring.period_elapsed(time, period) {
                Self::push(kind, ring, time, value);
            }
        });
    }

    /// Marks the start of a measured interval. Nothing is appended until
    /// [`end_duration`](Self::end_duration).
    pub fn start_duration(&self, kind: StatKind, item: u32) {
        self.start_duration_at(kind, item, self.now());
    }

    pub fn start_duration_at(&self, kind: StatKind, item: u32, time: Duration) {
        self.with_item(kind, item, |ring| ring.start_duration(time));
    }

    /// Appends the seconds elapsed since the item's pending start marker.
    /// Without a pending marker nothing is appended.
    pub fn end_duration(&self, kind: StatKind, item: u32) {
        self.end_duration_at(kind, item, self.now());
    }

    pub fn end_duration_at(&self, kind: StatKind, item: u32, time: Duration) {
        self.with_item(kind, item, |ring| {
            if let Some(elapsed) = ring.take_duration(time) {
                Self::push(kind, ring, time, elapsed.as_secs_f64());
            }
        });
    }

    /// [`end_duration`](Self::end_duration), suppressed unless more than
    /// `period_ms` elapsed since the previous write.
    pub fn periodic_end_duration(&self, kind: StatKind, item: u32, period_ms: u64) {
        self.periodic_end_duration_at(kind, item, self.now(), period_ms);
    }

    pub fn periodic_end_duration_at(
        &self,
        kind: StatKind,
        item: u32,
        time: Duration,
        period_ms: u64,
    ) {
        let period = Duration::from_millis(period_ms);
        self.with_item(kind, item, |ring| {
            if !ring.period_elapsed(time, period) {
                return;
            }
            if let Some(elapsed) = ring.take_duration(time) {
                Self::push(kind, ring, time, elapsed.as_secs_f64());
            }
        });
    }

    // --- Reads ---

    /// Most recently recorded value, if any.
    pub fn last_value(&self, kind: StatKind, item: u32) -> Option<f64> {
        self.read_item(kind, item, |ring| ring.last().map(|s| s.value))
            .ok()
            .flatten()
    }

    pub fn item_info(&self, kind: StatKind, item: u32) -> Result<ItemInfo, StatsError> {
        self.read_item(kind, item, |ring| ItemInfo {
            lap_len: ring.lap_len(),
            retained: ring.live_len(),
            capacity: ring.capacity(),
            rolled_over: ring.rolled_over(),
        })
    }

    /// Item ids bound for `kind`, ascending.
    pub fn item_ids(&self, kind: StatKind) -> Vec<u32> {
        let Some(table) = self.tables.get(&kind) else {
            return Vec::new();
        };
        let mut ids: Vec<u32> = table
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Up to `count` evenly spaced points covering the trailing `duration`.
    ///
    /// Fewer points come back when the ring holds less history than
    /// requested. `NoData` if the item was never written.
    pub fn sample_item(
        &self,
        kind: StatKind,
        item: u32,
        duration: Duration,
        count: usize,
    ) -> Result<StatSample, StatsError> {
        self.sample_item_at(kind, item, self.now(), duration, count)
    }

    pub fn sample_item_at(
        &self,
        kind: StatKind,
        item: u32,
        now: Duration,
        duration: Duration,
        count: usize,
    ) -> Result<StatSample, StatsError> {
        if count == 0 {
            return Err(StatsError::InvalidCount);
        }
        let points = self.read_item(kind, item, |ring| ring.sample_evenly(now, duration, count))?;
        Ok(StatSample {
            kind,
            item_id: item,
            cur_time: now,
            points,
        })
    }

    /// Samples every item of `kind` that has data.
    pub fn sample(
        &self,
        kind: StatKind,
        duration: Duration,
        count: usize,
    ) -> Result<Vec<StatSample>, StatsError> {
        self.sample_at(kind, self.now(), duration, count)
    }

    pub fn sample_at(
        &self,
        kind: StatKind,
        now: Duration,
        duration: Duration,
        count: usize,
    ) -> Result<Vec<StatSample>, StatsError> {
        if !self.is_enabled(kind) {
            return Err(StatsError::Disabled(kind));
        }
        let mut samples = Vec::new();
        for item in self.item_ids(kind) {
            match self.sample_item_at(kind, item, now, duration, count) {
                Ok(sample) => samples.push(sample),
                Err(StatsError::NoData { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(samples)
    }

    /// Writes every retained sample as `NAME:ITEM:SECS.NANOS:VALUE` lines,
    /// for one kind or for all enabled kinds. Returns the number of lines.
    pub fn write_log<W: Write>(&self, kind: Option<StatKind>, out: &mut W) -> Result<usize, StatsError> {
        let kinds: Vec<StatKind> = match kind {
            Some(kind) if self.is_enabled(kind) => vec![kind],
            Some(kind) => return Err(StatsError::Disabled(kind)),
            None => StatKind::ALL
                .iter()
                .copied()
                .filter(|k| self.is_enabled(*k))
                .collect(),
        };

        let mut lines = 0;
        for kind in kinds {
            for item in self.item_ids(kind) {
                let rows = match self.read_item(kind, item, |ring| {
                    ring.iter().copied().collect::<Vec<_>>()
                }) {
                    Ok(rows) => rows,
                    Err(StatsError::NoData { .. }) => continue,
                    Err(err) => return Err(err),
                };
                for row in rows {
                    write!(
                        out,
                        "{}:{:02}:{:05}.{:09}:",
                        kind.name(),
                        item,
                        row.time.as_secs(),
                        row.time.subsec_nanos()
                    )?;
                    if kind.is_duration() {
                        writeln!(out, "{:.9}", row.value)?;
                    } else {
                        writeln!(out, "{:.0}", row.value)?;
                    }
                    lines += 1;
                }
            }
        }
        Ok(lines)
    }

    /// Holds the lock of `item` until the guard drops.
    #[cfg(test)]
    pub(crate) fn hold_item(&self, kind: StatKind, item: u32) -> Option<MutexGuard<'_, StatItem>> {
        let slot = self.bind(kind, item).ok()?;
        Some(lock_slot(&self.tables.get(&kind)?.slots[slot]))
    }
}

impl std::fmt::Debug for StatsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsEngine")
            .field("capacity", &self.capacity)
            .field("max_items", &self.max_items)
            .field("enabled_kinds", &self.tables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn engine(capacity: usize, max_items: usize) -> StatsEngine {
        StatsEngine::new(
            &StatsConfig::default()
                .with_capacity(capacity)
                .with_max_items(max_items),
        )
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_rings_are_allocated_up_front() {
        let config = StatsConfig::default()
            .with_capacity(32)
            .with_max_items(3)
            .disable(StatKind::BytesSent);
        let stats = StatsEngine::new(&config);

        for kind in StatKind::ALL.iter() {
            let Some(table) = stats.tables.get(kind) else {
                assert_eq!(*kind, StatKind::BytesSent);
                continue;
            };
            assert_eq!(table.slots.len(), 3);
            for slot in &table.slots {
                let ring = lock_slot(slot);
                assert_eq!(ring.capacity(), 32);
                assert!(ring.is_empty());
            }
        }

        // The first write claims a slot and reuses its ring.
        let slots = &stats.tables[&StatKind::QueueLen].slots;
        let buffers: Vec<_> = slots.iter().map(|slot| lock_slot(slot).buffer_ptr()).collect();
        stats.record_value(StatKind::QueueLen, 77, 1.0);
        stats.record_value(StatKind::QueueLen, 78, 2.0);
        let after: Vec<_> = slots.iter().map(|slot| lock_slot(slot).buffer_ptr()).collect();
        assert_eq!(buffers, after);
        assert_eq!(lock_slot(&slots[0]).item_id, 77);
        assert_eq!(lock_slot(&slots[1]).item_id, 78);
    }

    #[test]
    fn test_rollover_keeps_lap_length() {
        let stats = engine(8, 4);
        for k in 0..21 {
            stats.record_value_at(StatKind::QueueLen, 1, secs(k as f64), k as f64);
        }
        let info = stats.item_info(StatKind::QueueLen, 1).unwrap();
        assert_eq!(info.lap_len, 21 % 8);
        assert_eq!(info.retained, 8);
        assert!(info.rolled_over);

        for k in 21..24 {
            stats.record_value_at(StatKind::QueueLen, 1, secs(k as f64), k as f64);
        }
        let info = stats.item_info(StatKind::QueueLen, 1).unwrap();
        assert_eq!(info.lap_len, 8);
    }

    #[test]
    fn test_increment_builds_on_last_value() {
        let stats = engine(16, 4);
        stats.increment(StatKind::ItemsProcessed, 3, 1.0);
        stats.increment(StatKind::ItemsProcessed, 3, 1.0);
        stats.increment(StatKind::ItemsProcessed, 3, 2.5);
        assert_eq!(stats.last_value(StatKind::ItemsProcessed, 3), Some(4.5));
    }

    #[test]
    fn test_record_if_changed_skips_repeats() {
        let stats = engine(16, 4);
        for value in [2.0, 2.0, 3.0, 3.0, 2.0] {
            stats.record_if_changed(StatKind::QueueLen, 0, value);
        }
        assert_eq!(stats.item_info(StatKind::QueueLen, 0).unwrap().retained, 3);
    }

    #[test]
    fn test_periodic_write_is_throttled() {
        let stats = engine(16, 4);
        let kind = StatKind::QueueLen;
        stats.periodic_record_value_at(kind, 0, secs(0.0), 1.0, 100);
        stats.periodic_record_value_at(kind, 0, secs(0.05), 2.0, 100);
        stats.periodic_record_value_at(kind, 0, secs(0.2), 3.0, 100);

        assert_eq!(stats.item_info(kind, 0).unwrap().retained, 2);
        assert_eq!(stats.last_value(kind, 0), Some(3.0));
    }

    #[test]
    fn test_duration_pair_records_elapsed_seconds() {
        let stats = engine(16, 4);
        let kind = StatKind::MsuInternalTime;
        stats.end_duration_at(kind, 2, secs(0.5));
        assert_eq!(stats.last_value(kind, 2), None);

        stats.start_duration_at(kind, 2, secs(1.0));
        stats.end_duration_at(kind, 2, secs(1.25));
        assert_eq!(stats.last_value(kind, 2), Some(0.25));
    }

    #[test]
    fn test_sample_never_written_is_no_data() {
        let stats = engine(16, 4);
        let err = stats
            .sample_item_at(StatKind::QueueLen, 9, secs(10.0), secs(5.0), 5)
            .unwrap_err();
        assert!(matches!(err, StatsError::NoData { item: 9, .. }));
    }

    #[test]
    fn test_sample_of_short_history_is_proportionally_shorter() {
        let stats = engine(256, 4);
        // 5 seconds of history, written every 100ms from t=5s to t=10s.
        for tick in 50..=100 {
            stats.record_value_at(StatKind::QueueLen, 0, secs(tick as f64 / 10.0), tick as f64);
        }

        let full = stats
            .sample_item_at(StatKind::QueueLen, 0, secs(10.0), secs(5.0), 11)
            .unwrap();
        assert_eq!(full.len(), 11);

        let half = stats
            .sample_item_at(StatKind::QueueLen, 0, secs(10.0), secs(10.0), 11)
            .unwrap();
        assert_eq!(half.len(), 6);
        assert_eq!(half.points[0].time, secs(5.0));
    }

    #[test]
    fn test_sample_covers_every_item() {
        let stats = engine(16, 4);
        stats.record_value_at(StatKind::QueueLen, 1, secs(1.0), 1.0);
        stats.record_value_at(StatKind::QueueLen, 2, secs(1.0), 2.0);
        stats.init_item(StatKind::QueueLen, 3).unwrap();

        let samples = stats.sample_at(StatKind::QueueLen, secs(2.0), secs(1.0), 2).unwrap();
        let items: Vec<u32> = samples.iter().map(|s| s.item_id).collect();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn test_slot_exhaustion_is_an_error_not_a_panic() {
        let stats = engine(4, 2);
        stats.init_item(StatKind::QueueLen, 10).unwrap();
        stats.init_item(StatKind::QueueLen, 11).unwrap();
        assert!(matches!(
            stats.init_item(StatKind::QueueLen, 12),
            Err(StatsError::SlotsExhausted { max: 2, .. })
        ));
        stats.record_value(StatKind::QueueLen, 12, 1.0);
        assert_eq!(stats.last_value(StatKind::QueueLen, 12), None);
    }

    #[test]
    fn test_disabled_kind_records_nothing() {
        let stats = StatsEngine::new(&StatsConfig::default().disable(StatKind::BytesSent));
        stats.record_value(StatKind::BytesSent, 0, 10.0);
        assert!(!stats.is_enabled(StatKind::BytesSent));
        assert!(matches!(
            stats.sample_item(StatKind::BytesSent, 0, Duration::from_secs(1), 1),
            Err(StatsError::Disabled(StatKind::BytesSent))
        ));
    }

    #[test]
    fn test_write_log_format() {
        let stats = engine(16, 4);
        stats.record_value_at(StatKind::QueueLen, 3, Duration::new(12, 5), 4.0);
        stats.record_value_at(StatKind::MsuFullTime, 3, Duration::new(1, 0), 0.5);

        let mut out = Vec::new();
        let lines = stats.write_log(None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(lines, 2);
        assert!(text.contains("MSU_QUEUE_LENGTH:03:00012.000000005:4\n"));
        assert!(text.contains("MSU_FULL_TIME:03:00001.000000000:0.500000000\n"));
    }

    #[test]
    fn test_writes_to_different_items_do_not_contend() {
        let stats = Arc::new(engine(64, 4));
        stats.init_item(StatKind::QueueLen, 1).unwrap();
        stats.init_item(StatKind::QueueLen, 2).unwrap();

        let guard = stats.hold_item(StatKind::QueueLen, 1).unwrap();

        let (done_tx, done_rx) = flume::bounded(1);
        let writer = {
            let stats = stats.clone();
            thread::spawn(move || {
                for v in 0..10 {
                    stats.record_value(StatKind::QueueLen, 2, v as f64);
                }
                let _ = done_tx.send(());
            })
        };

        // Item 1 stays locked the whole time; item 2 must still make progress.
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        drop(guard);
        writer.join().unwrap();
        assert_eq!(stats.last_value(StatKind::QueueLen, 2), Some(9.0));
    }
}
