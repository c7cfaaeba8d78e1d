//! Frame distribution hub.
//!
//! One hub instance fans raw upstream payloads out to any number of
//! subscribers per [`ChannelKind`]. Each subscriber owns a bounded FIFO;
//! when it is full the oldest frame is discarded so that a slow consumer
//! always sees the most recent data and never stalls the publisher.
//!
//! The subscriber list is a copy-on-write snapshot: `publish` reads it
//! without locking, `subscribe`/`unsubscribe` replace it under a writer lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use singu_common::frame::ChannelKind;
use tokio::sync::Notify;
use tracing::debug;

// ─── Subscriber queue ───────────────────────────────────────────────

#[derive(Debug)]
struct SubscriberQueue {
    id: u64,
    capacity: usize,
    frames: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue, evicting the oldest frame when full. Returns false if closed.
    fn push(&self, payload: Bytes) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut frames = self.frames.lock();
            if frames.len() >= self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(payload);
        }
        self.notify.notify_one();
        true
    }

    fn pop(&self) -> Option<Bytes> {
        self.frames.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ─── Channel ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Channel {
    kind: ChannelKind,
    subscribers: ArcSwap<Vec<Arc<SubscriberQueue>>>,
    writer: Mutex<()>,
}

impl Channel {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            subscribers: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    fn add(&self, queue: Arc<SubscriberQueue>) {
        let _guard = self.writer.lock();
        let mut next = Vec::clone(&self.subscribers.load());
        next.push(queue);
        self.subscribers.store(Arc::new(next));
    }

    /// Remove a subscriber by id. Returns the removed queue, if it was present.
    fn remove(&self, id: u64) -> Option<Arc<SubscriberQueue>> {
        let _guard = self.writer.lock();
        let current = self.subscribers.load();
        let position = current.iter().position(|q| q.id == id)?;
        let mut next = Vec::clone(&current);
        let removed = next.remove(position);
        self.subscribers.store(Arc::new(next));
        Some(removed)
    }
}

// ─── FrameHub ───────────────────────────────────────────────────────

#[derive(Debug)]
struct HubInner {
    channels: [Arc<Channel>; 3],
    next_id: AtomicU64,
}

/// Multi-subscriber fan-out of raw upstream payloads.
///
/// Cloning is cheap; clones share the same subscriber lists.
#[derive(Debug, Clone)]
pub struct FrameHub {
    inner: Arc<HubInner>,
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: ChannelKind::ALL.map(|kind| Arc::new(Channel::new(kind))),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn channel(&self, kind: ChannelKind) -> &Arc<Channel> {
        let index = match kind {
            ChannelKind::Speed => 0,
            ChannelKind::Position => 1,
            ChannelKind::Heartbeat => 2,
        };
        &self.inner.channels[index]
    }

    /// Register a subscriber with a bounded queue of `capacity` frames.
    ///
    /// A zero capacity is raised to one.
    pub fn subscribe(&self, kind: ChannelKind, capacity: usize) -> (FrameReceiver, Unsubscribe) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(id, capacity.max(1)));
        let channel = self.channel(kind);
        channel.add(Arc::clone(&queue));
        debug!(channel = %kind, id, capacity = queue.capacity, "hub subscriber added");

        let receiver = FrameReceiver {
            kind,
            queue: Arc::clone(&queue),
        };
        let handle = Unsubscribe {
            channel: Arc::downgrade(channel),
            id,
            done: AtomicBool::new(false),
        };
        (receiver, handle)
    }

    /// Register a subscriber with the channel's default capacity.
    pub fn subscribe_default(&self, kind: ChannelKind) -> (FrameReceiver, Unsubscribe) {
        self.subscribe(kind, kind.default_capacity())
    }

    /// Deliver `payload` to every open subscriber of `kind`.
    ///
    /// Never blocks on consumers. Returns the number of queues written.
    pub fn publish(&self, kind: ChannelKind, payload: Bytes) -> usize {
        let snapshot = self.channel(kind).subscribers.load();
        snapshot
            .iter()
            .filter(|queue| queue.push(payload.clone()))
            .count()
    }

    /// Number of registered subscribers of `kind`.
    pub fn subscriber_count(&self, kind: ChannelKind) -> usize {
        self.channel(kind).subscribers.load().len()
    }
}

// ─── Receiver / Unsubscribe ─────────────────────────────────────────

/// Consuming end of one hub subscription.
#[derive(Debug)]
pub struct FrameReceiver {
    kind: ChannelKind,
    queue: Arc<SubscriberQueue>,
}

impl FrameReceiver {
    /// Wait for the next frame. Returns `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Take the next frame without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.queue.pop()
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.queue.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted by drop-oldest since subscription.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        // Stop accepting frames nobody will read.
        self.queue.close();
    }
}

/// Removes a subscription. Idempotent; runs automatically on drop.
#[derive(Debug)]
pub struct Unsubscribe {
    channel: Weak<Channel>,
    id: u64,
    done: AtomicBool,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        if let Some(queue) = channel.remove(self.id) {
            queue.close();
            debug!(channel = %channel.kind, id = self.id, "hub subscriber removed");
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
