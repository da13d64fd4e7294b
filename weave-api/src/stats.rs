//! Statistic kinds and the sample stream record.
//!
//! The runtime keeps a ring of timestamped values per `(kind, item)` pair. The
//! telemetry pipeline pulls evenly spaced samples of those rings as a batch of
//! [`StatSample`] records, encoded with [`encode_samples`].

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::time::Duration;

use crate::envelope::length_field;
use crate::errors::EnvelopeError;

/// Every statistic the runtime can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum StatKind {
    /// Depth of an instance's data queue.
    QueueLen = 0,
    /// Running count of messages an instance finished.
    ItemsProcessed = 1,
    /// Time from dequeue to the end of dispatch, including the send.
    MsuFullTime = 2,
    /// Time spent inside the type's `receive` capability.
    MsuInternalTime = 3,
    /// Time between two consecutive dispatches of an instance.
    MsuInterimTime = 4,
    MemoryAllocated = 5,
    ContextSwitches = 6,
    BytesSent = 7,
    BytesReceived = 8,
    /// Running count of messages that ended in a dispatch error.
    ErrorCount = 9,
    ProfEnqueue = 10,
    ProfDequeue = 11,
    ProfRemoteSend = 12,
    ProfRemoteRecv = 13,
    ProfEntry = 14,
    ProfExit = 15,
}

impl StatKind {
    pub const ALL: [StatKind; 16] = [
        StatKind::QueueLen,
        StatKind::ItemsProcessed,
        StatKind::MsuFullTime,
        StatKind::MsuInternalTime,
        StatKind::MsuInterimTime,
        StatKind::MemoryAllocated,
        StatKind::ContextSwitches,
        StatKind::BytesSent,
        StatKind::BytesReceived,
        StatKind::ErrorCount,
        StatKind::ProfEnqueue,
        StatKind::ProfDequeue,
        StatKind::ProfRemoteSend,
        StatKind::ProfRemoteRecv,
        StatKind::ProfEntry,
        StatKind::ProfExit,
    ];

    /// Name used in stat logs and by the telemetry pipeline.
    pub fn name(self) -> &'static str {
        match self {
            StatKind::QueueLen => "MSU_QUEUE_LENGTH",
            StatKind::ItemsProcessed => "ITEMS_PROCESSED",
            StatKind::MsuFullTime => "MSU_FULL_TIME",
            StatKind::MsuInternalTime => "MSU_INTERNAL_TIME",
            StatKind::MsuInterimTime => "MSU_INTERIM_TIME",
            StatKind::MemoryAllocated => "MEMORY_ALLOCATED",
            StatKind::ContextSwitches => "N_CONTEXT_SWITCHES",
            StatKind::BytesSent => "BYTES_SENT",
            StatKind::BytesReceived => "BYTES_RECEIVED",
            StatKind::ErrorCount => "ERROR_COUNT",
            StatKind::ProfEnqueue => "PROF_ENQUEUE",
            StatKind::ProfDequeue => "PROF_DEQUEUE",
            StatKind::ProfRemoteSend => "PROF_REMOTE_SEND",
            StatKind::ProfRemoteRecv => "PROF_REMOTE_RECV",
            StatKind::ProfEntry => "PROF_ENTRY",
            StatKind::ProfExit => "PROF_EXIT",
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Kinds written only for messages tagged by the profiler.
    pub fn is_profiler(self) -> bool {
        matches!(
            self,
            StatKind::ProfEnqueue
                | StatKind::ProfDequeue
                | StatKind::ProfRemoteSend
                | StatKind::ProfRemoteRecv
                | StatKind::ProfEntry
                | StatKind::ProfExit
        )
    }

    /// Kinds whose value is a duration in seconds.
    pub fn is_duration(self) -> bool {
        matches!(
            self,
            StatKind::MsuFullTime | StatKind::MsuInternalTime | StatKind::MsuInterimTime
        )
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded value and the time since the stats engine started.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimedStat {
    pub time: Duration,
    pub value: f64,
}

impl TimedStat {
    pub fn new(time: Duration, value: f64) -> Self {
        Self { time, value }
    }
}

/// Evenly spaced sample of one statistic item.
#[derive(Debug, Clone, PartialEq)]
pub struct StatSample {
    pub kind: StatKind,
    pub item_id: u32,
    /// Engine time at which the sample was taken.
    pub cur_time: Duration,
    pub points: Vec<TimedStat>,
}

impl StatSample {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn put_duration(buf: &mut BytesMut, time: Duration) {
    buf.put_u64(time.as_secs());
    buf.put_u32(time.subsec_nanos());
}

fn read_duration(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<Duration, EnvelopeError> {
    let secs = cursor
        .read_u64::<BigEndian>()
        .map_err(|_| EnvelopeError::Truncated { field })?;
    let nanos = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| EnvelopeError::Truncated { field })?;
    Ok(Duration::new(secs, nanos))
}

fn read_u32(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32, EnvelopeError> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| EnvelopeError::Truncated { field })
}

/// Encodes a batch of samples.
///
/// ```text
/// n_samples: u32
/// n_samples * (kind: u32 | item: u32 | cur_time | n_points: u32 | n_points * (time | value: f64))
/// time = secs: u64 | nanos: u32
/// ```
///
/// Fails with [`EnvelopeError::TooLarge`] when a count does not fit in 32 bits.
pub fn encode_samples(samples: &[StatSample]) -> Result<Bytes, EnvelopeError> {
    let mut buf = BytesMut::new();
    buf.put_u32(length_field("sample count", samples.len())?);
    for sample in samples {
        buf.put_u32(sample.kind.as_u32());
        buf.put_u32(sample.item_id);
        put_duration(&mut buf, sample.cur_time);
        buf.put_u32(length_field("point count", sample.points.len())?);
        for point in &sample.points {
            put_duration(&mut buf, point.time);
            buf.put_f64(point.value);
        }
    }
    Ok(buf.freeze())
}

/// Decodes a batch produced by [`encode_samples`]. Trailing bytes are an error.
pub fn decode_samples(data: &[u8]) -> Result<Vec<StatSample>, EnvelopeError> {
    let mut cursor = Cursor::new(data);
    let n_samples = read_u32(&mut cursor, "sample count")?;
    let mut samples = Vec::new();

    for _ in 0..n_samples {
        let raw_kind = read_u32(&mut cursor, "stat kind")?;
        let kind = StatKind::from_u32(raw_kind).ok_or(EnvelopeError::UnknownStatKind(raw_kind))?;
        let item_id = read_u32(&mut cursor, "item id")?;
        let cur_time = read_duration(&mut cursor, "sample time")?;
        let n_points = read_u32(&mut cursor, "point count")?;

        let mut points = Vec::new();
        for _ in 0..n_points {
            let time = read_duration(&mut cursor, "point time")?;
            let value = cursor
                .read_f64::<BigEndian>()
                .map_err(|_| EnvelopeError::Truncated { field: "point value" })?;
            points.push(TimedStat { time, value });
        }
        samples.push(StatSample {
            kind,
            item_id,
            cur_time,
            points,
        });
    }

    let trailing = data.len() - cursor.position() as usize;
    if trailing != 0 {
        return Err(EnvelopeError::TrailingBytes(trailing));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_match_table_order() {
        for (index, kind) in StatKind::ALL.iter().enumerate() {
            assert_eq!(kind.as_u32() as usize, index);
            assert_eq!(StatKind::from_u32(index as u32), Some(*kind));
        }
        assert_eq!(StatKind::from_u32(99), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(StatKind::QueueLen.to_string(), "MSU_QUEUE_LENGTH");
        assert_eq!(StatKind::ContextSwitches.name(), "N_CONTEXT_SWITCHES");
        assert!(StatKind::ProfExit.is_profiler());
        assert!(!StatKind::ErrorCount.is_profiler());
    }

    #[test]
    fn test_sample_batch_decodes() {
        let batch = vec![
            StatSample {
                kind: StatKind::QueueLen,
                item_id: 4,
                cur_time: Duration::from_millis(2_500),
                points: vec![
                    TimedStat::new(Duration::from_millis(1_500), 3.0),
                    TimedStat::new(Duration::from_millis(2_500), 1.0),
                ],
            },
            StatSample {
                kind: StatKind::ItemsProcessed,
                item_id: 7,
                cur_time: Duration::from_secs(3),
                points: Vec::new(),
            },
        ];

        let decoded = decode_samples(&encode_samples(&batch).unwrap()).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut raw = encode_samples(&[]).unwrap().to_vec();
        raw.push(0);
        assert!(matches!(
            decode_samples(&raw),
            Err(EnvelopeError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32(1);
        raw.put_u32(500);
        assert!(matches!(
            decode_samples(&raw),
            Err(EnvelopeError::UnknownStatKind(500))
        ));
    }
}
