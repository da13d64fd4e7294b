//! Instance queues and the worker doorbell.
//!
//! Every instance owns two bounded queues, one for data and one for control.
//! The owning worker holds the receiving side ([`MsuQueue`]); everybody else
//! holds cheap clonable [`QueueHandle`]s. Enqueueing never blocks: a full
//! queue is reported to the caller, which is the backpressure boundary of
//! the runtime.
//!
//! Each successful enqueue rings the owning worker's [`Doorbell`] so an idle
//! worker wakes up without polling.
//!
//! A queue built with [`MsuQueue::weighed`] also keeps a running total of
//! the bytes its pending items hold.

use flume::{Receiver, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueueError;

/// Wakes a worker. Rings coalesce: many rings before the worker wakes count
/// as one.
#[derive(Clone, Debug)]
pub struct Doorbell {
    tx: Sender<()>,
}

impl Doorbell {
    pub fn ring(&self) {
        // Full means a wake-up is already pending.
        let _ = self.tx.try_send(());
    }
}

/// The worker's side of a [`Doorbell`].
#[derive(Debug)]
pub struct DoorbellWaiter {
    rx: Receiver<()>,
}

impl DoorbellWaiter {
    /// Blocks until rung or until `timeout` elapses. Returns whether it was rung.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

pub fn doorbell() -> (Doorbell, DoorbellWaiter) {
    let (tx, rx) = flume::bounded(1);
    (Doorbell { tx }, DoorbellWaiter { rx })
}

/// Receiving side of an instance queue, owned by the instance.
pub struct MsuQueue<T> {
    receiver: Receiver<T>,
    handle: QueueHandle<T>,
}

/// Sending side of an instance queue.
pub struct QueueHandle<T> {
    sender: Sender<T>,
    capacity: usize,
    closed: Arc<AtomicBool>,
    bytes: Arc<AtomicUsize>,
    weigh: fn(&T) -> usize,
    doorbell: Doorbell,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            capacity: self.capacity,
            closed: self.closed.clone(),
            bytes: self.bytes.clone(),
            weigh: self.weigh,
            doorbell: self.doorbell.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> QueueHandle<T> {
    /// Enqueues `item` without blocking. On failure the item is dropped here.
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        // Counted before the send so the receiver never subtracts first.
        let weight = (self.weigh)(&item);
        self.bytes.fetch_add(weight, Ordering::AcqRel);
        match self.sender.try_send(item) {
            Ok(()) => {
                self.doorbell.ring();
                Ok(())
            }
            Err(err) => {
                self.bytes.fetch_sub(weight, Ordering::AcqRel);
                match err {
                    TrySendError::Full(_) => Err(QueueError::Full {
                        capacity: self.capacity,
                    }),
                    TrySendError::Disconnected(_) => Err(QueueError::Closed),
                }
            }
        }
    }

    /// Bytes held by pending items. Always zero for an unweighed queue.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether both handles feed the same queue.
    pub fn same_queue(&self, other: &QueueHandle<T>) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl<T> MsuQueue<T> {
    pub fn new(capacity: usize, doorbell: Doorbell) -> Self {
        Self::weighed(capacity, doorbell, |_| 0)
    }

    /// A queue that accounts `weigh(item)` bytes for every pending item.
    pub fn weighed(capacity: usize, doorbell: Doorbell, weigh: fn(&T) -> usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            receiver,
            handle: QueueHandle {
                sender,
                capacity,
                closed: Arc::new(AtomicBool::new(false)),
                bytes: Arc::new(AtomicUsize::new(0)),
                weigh,
                doorbell,
            },
        }
    }

    pub fn handle(&self) -> QueueHandle<T> {
        self.handle.clone()
    }

    pub fn try_pop(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(item) => {
                self.handle.bytes.fetch_sub((self.handle.weigh)(&item), Ordering::AcqRel);
                Some(item)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn bytes(&self) -> usize {
        self.handle.bytes()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Refuses further enqueues and releases everything still pending.
    /// Returns the number of items released.
    pub fn close(&self) -> usize {
        self.handle.closed.store(true, Ordering::Release);
        let released = self.receiver.drain().count();
        self.handle.bytes.store(0, Ordering::Release);
        released
    }
}

impl<T> Drop for MsuQueue<T> {
    fn drop(&mut self) {
        self.close();
    }
}
