//! One statistic item: a fixed ring of timestamped values.

use std::time::Duration;

use weave_api::TimedStat;

/// Ring buffer of samples for one `(kind, item)` pair.
///
/// Positions are either *physical* (index into `samples`) or *logical*
/// (0 = oldest retained sample). The write cursor and the last-sampled
/// position are physical.
#[derive(Debug)]
pub(crate) struct StatItem {
    pub(crate) item_id: u32,
    samples: Vec<TimedStat>,
    write_index: usize,
    rolled_over: bool,
    last_sample_index: usize,
    pending_start: Option<Duration>,
}

impl StatItem {
    pub(crate) fn new(item_id: u32, capacity: usize) -> Self {
        Self {
            item_id,
            samples: vec![TimedStat::default(); capacity],
            write_index: 0,
            rolled_over: false,
            last_sample_index: 0,
            pending_start: None,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub(crate) fn buffer_ptr(&self) -> *const TimedStat {
        self.samples.as_ptr()
    }

    /// Appends a sample. Returns true when this write wrapped the ring.
    pub(crate) fn push(&mut self, time: Duration, value: f64) -> bool {
        self.samples[self.write_index] = TimedStat { time, value };
        self.write_index += 1;
        if self.write_index == self.capacity() {
            self.write_index = 0;
            self.rolled_over = true;
            return true;
        }
        false
    }

    /// Number of samples retained.
    pub(crate) fn live_len(&self) -> usize {
        if self.rolled_over {
            self.capacity()
        } else {
            self.write_index
        }
    }

    /// Samples written since the ring last wrapped; a full lap counts as the
    /// whole capacity.
    pub(crate) fn lap_len(&self) -> usize {
        if self.rolled_over && self.write_index == 0 {
            self.capacity()
        } else {
            self.write_index
        }
    }

    pub(crate) fn rolled_over(&self) -> bool {
        self.rolled_over
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live_len() == 0
    }

    fn oldest(&self) -> usize {
        if self.rolled_over {
            self.write_index
        } else {
            0
        }
    }

    fn physical(&self, logical: usize) -> usize {
        (self.oldest() + logical) % self.capacity()
    }

    fn logical(&self, physical: usize) -> usize {
        (physical + self.capacity() - self.oldest()) % self.capacity()
    }

    fn at(&self, logical: usize) -> &TimedStat {
        &self.samples[self.physical(logical)]
    }

    pub(crate) fn last(&self) -> Option<&TimedStat> {
        match self.live_len() {
            0 => None,
            n => Some(self.at(n - 1)),
        }
    }

    pub(crate) fn start_duration(&mut self, now: Duration) {
        self.pending_start = Some(now);
    }

    /// Time elapsed since the pending start marker, consuming it.
    pub(crate) fn take_duration(&mut self, now: Duration) -> Option<Duration> {
        self.pending_start
            .take()
            .map(|start| now.saturating_sub(start))
    }

    /// Whether more than `period` has passed since the last write.
    pub(crate) fn period_elapsed(&self, now: Duration, period: Duration) -> bool {
        match self.last() {
            Some(last) => now.saturating_sub(last.time) > period,
            None => true,
        }
    }

    /// Retained samples, oldest first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &TimedStat> + '_ {
        (0..self.live_len()).map(move |logical| self.at(logical))
    }

    /// Logical index of the newest sample not later than `time`, or `None`
    /// when `time` precedes every retained sample.
    ///
    /// The search starts from the position of the previous call and walks
    /// towards `time`, so repeated sampling of recent history touches only a
    /// few entries.
    fn find_time_index(&self, time: Duration) -> Option<usize> {
        let live = self.live_len();
        if live == 0 {
            return None;
        }

        let mut index = self.logical(self.last_sample_index).min(live - 1);
        if self.at(index).time <= time {
            while index + 1 < live && self.at(index + 1).time <= time {
                index += 1;
            }
            Some(index)
        } else {
            while index > 0 && self.at(index).time > time {
                index -= 1;
            }
            (self.at(index).time <= time).then_some(index)
        }
    }

    /// Evenly spaced points over `[now - duration, now]`. Points earlier than
    /// the oldest retained sample are omitted. Never returns more points than
    /// the ring holds.
    pub(crate) fn sample_evenly(
        &mut self,
        now: Duration,
        duration: Duration,
        count: usize,
    ) -> Vec<TimedStat> {
        let count = count.min(self.capacity()).min(u32::MAX as usize);
        let start = now.saturating_sub(duration);
        let span = now - start;
        let step = if count > 1 {
            span / (count as u32 - 1)
        } else {
            Duration::ZERO
        };

        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let time = if count == 1 { now } else { start + step * i as u32 };
            if let Some(index) = self.find_time_index(time) {
                self.last_sample_index = self.physical(index);
                points.push(TimedStat {
                    time,
                    value: self.at(index).value,
                });
            }
        }
        points
    }
}
