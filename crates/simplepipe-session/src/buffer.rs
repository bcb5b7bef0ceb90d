use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use simplepipe_frame::{priority, PipeEvent};

/// Per-session ordered queue of pending payload items.
///
/// Items before `flushed` have been handed to a transport and are only kept
/// until the next [`DeliveryBuffer::compact`]. Items at or after `flushed` are
/// pending delivery. The first `in_flight` pending items are reserved by a
/// send that has not finished yet; they are neither merge targets nor
/// resorted.
#[derive(Default)]
pub struct DeliveryBuffer {
    items: Vec<Arc<dyn PipeEvent>>,
    flushed: usize,
    in_flight: usize,
    generation: u64,
}

/// Pending items reserved by [`DeliveryBuffer::reserve`].
#[derive(Debug)]
pub struct Reservation {
    pub items: Vec<Arc<dyn PipeEvent>>,
    /// Whether the reservation covers everything that was pending.
    pub drains_all: bool,
    generation: u64,
}

/// What an [`DeliveryBuffer::enqueue`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub appended: usize,
    pub merged: usize,
    pub skipped: usize,
    pub resorted: bool,
}

impl EnqueueOutcome {
    /// Whether the pending range changed and consumers should be woken.
    pub fn changed(&self) -> bool {
        self.appended + self.merged > 0
    }
}

impl DeliveryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total items held, flushed ones included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn flushed_index(&self) -> usize {
        self.flushed
    }

    pub fn pending_len(&self) -> usize {
        self.items.len() - self.flushed
    }

    pub fn pending(&self) -> &[Arc<dyn PipeEvent>] {
        &self.items[self.flushed..]
    }

    /// Pending items not reserved by an unfinished send.
    pub fn deliverable_len(&self) -> usize {
        self.pending_len() - self.in_flight
    }

    fn open_start(&self) -> usize {
        self.flushed + self.in_flight
    }

    /// Add a batch of items.
    ///
    /// A cacheable item that is still cached is already pending and is
    /// skipped. An item equal to a pending one is merged into it. Anything
    /// else is marked cached and appended. When the incoming batch is larger
    /// than `threshold` and an appended item has a priority, the pending range
    /// is stable-sorted by descending priority.
    pub fn enqueue(&mut self, items: &[Arc<dyn PipeEvent>], threshold: usize) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::default();
        let mut has_priority = false;

        for item in items {
            if let Some(cacheable) = item.as_cacheable() {
                if cacheable.is_cached() {
                    outcome.skipped += 1;
                    continue;
                }
                let open = self.open_start();
                let existing = self.items[open..].iter().find(|pending| {
                    pending
                        .as_cacheable()
                        .is_some_and(|c| c.same_item(item.as_ref()))
                });
                if let Some(existing) = existing {
                    if let Some(target) = existing.as_cacheable() {
                        target.synchronize_from(item.as_ref());
                    }
                    outcome.merged += 1;
                    continue;
                }
                cacheable.set_cached(true);
            }
            has_priority |= item.priority().is_some();
            self.items.push(Arc::clone(item));
            outcome.appended += 1;
        }

        if has_priority && items.len() > threshold {
            let open = self.open_start();
            self.items[open..].sort_by_key(|item| Reverse(rank(item.as_ref())));
            outcome.resorted = true;
        }
        outcome
    }

    /// Append without dedup or resort. Used when moving data between sessions.
    pub fn append_raw(&mut self, items: impl IntoIterator<Item = Arc<dyn PipeEvent>>) -> usize {
        let before = self.items.len();
        self.items.extend(items);
        self.items.len() - before
    }

    /// Reserve up to `limit` pending items for a send, dropping flushed items
    /// first. Returns `None` when nothing is pending or an earlier
    /// reservation is still outstanding.
    pub fn reserve(&mut self, limit: usize) -> Option<Reservation> {
        if self.in_flight > 0 {
            return None;
        }
        self.compact();
        if self.items.is_empty() {
            return None;
        }
        let count = self.items.len().min(limit.max(1));
        self.in_flight = count;
        Some(Reservation {
            items: self.items[..count].to_vec(),
            drains_all: count == self.items.len(),
            generation: self.generation,
        })
    }

    /// End a reservation. A delivered one is committed, a failed one becomes
    /// deliverable again. Reservations from before a [`DeliveryBuffer::clear`]
    /// are ignored.
    pub fn finish(&mut self, reservation: &Reservation, delivered: bool) {
        if reservation.generation != self.generation {
            return;
        }
        let count = std::mem::take(&mut self.in_flight);
        if delivered {
            self.commit(count);
        }
    }

    /// Mark the first `count` pending items as handed to the transport.
    pub fn commit(&mut self, count: usize) {
        let end = (self.flushed + count).min(self.items.len());
        for item in &self.items[self.flushed..end] {
            if let Some(cacheable) = item.as_cacheable() {
                cacheable.set_cached(false);
            }
        }
        self.flushed = end;
    }

    /// Drop flushed items.
    pub fn compact(&mut self) {
        if self.flushed > 0 {
            self.items.drain(..self.flushed);
            self.flushed = 0;
        }
    }

    /// Remove pending items that are not reserved, keeping their cached flags.
    /// Used when a compound session changes its delivery target.
    pub fn take_open(&mut self) -> Vec<Arc<dyn PipeEvent>> {
        let open = self.open_start();
        self.items.split_off(open)
    }

    /// Clone pending items accepted by `filter`.
    pub fn clone_pending(&self, filter: impl Fn(&dyn PipeEvent) -> bool) -> Vec<Arc<dyn PipeEvent>> {
        self.pending()
            .iter()
            .filter(|item| filter(item.as_ref()))
            .cloned()
            .collect()
    }

    /// Drop everything. Pending cacheable items lose their cached flag.
    pub fn clear(&mut self) {
        for item in self.pending() {
            if let Some(cacheable) = item.as_cacheable() {
                cacheable.set_cached(false);
            }
        }
        self.items.clear();
        self.flushed = 0;
        self.in_flight = 0;
        self.generation += 1;
    }
}

impl fmt::Debug for DeliveryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryBuffer")
            .field("len", &self.items.len())
            .field("flushed", &self.flushed)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

// Non-priority items sit at IMPORTANT; priority items at IMPORTANT rank above them.
fn rank(item: &dyn PipeEvent) -> (i32, u8) {
    match item.priority() {
        Some(p) => (p, 1),
        None => (priority::IMPORTANT, 0),
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use bytes::{BufMut, BytesMut};
    use parking_lot::Mutex;
    use simplepipe_frame::{CacheFlag, Cacheable};

    use super::*;

    #[derive(Debug)]
    struct Plain(u32);

    impl PipeEvent for Plain {
        fn tag(&self) -> &str {
            "Plain"
        }
        fn encode_body(&self, dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
            dst.put_slice(self.0.to_string().as_bytes());
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Ranked(u32, i32);

    impl PipeEvent for Ranked {
        fn tag(&self) -> &str {
            "Ranked"
        }
        fn encode_body(&self, _dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
            Ok(())
        }
        fn priority(&self) -> Option<i32> {
            Some(self.1)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Counter {
        id: u32,
        value: Mutex<u32>,
        cached: CacheFlag,
    }

    impl Counter {
        fn new(id: u32, value: u32) -> Arc<Self> {
            Arc::new(Self {
                id,
                value: Mutex::new(value),
                cached: CacheFlag::default(),
            })
        }
    }

    impl PipeEvent for Counter {
        fn tag(&self) -> &str {
            "Counter"
        }
        fn encode_body(&self, _dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
            Ok(())
        }
        fn as_cacheable(&self) -> Option<&dyn Cacheable> {
            Some(self)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Cacheable for Counter {
        fn is_cached(&self) -> bool {
            self.cached.get()
        }
        fn set_cached(&self, cached: bool) {
            self.cached.set(cached);
        }
        fn same_item(&self, other: &dyn PipeEvent) -> bool {
            other
                .as_any()
                .downcast_ref::<Counter>()
                .is_some_and(|o| o.id == self.id)
        }
        fn synchronize_from(&self, other: &dyn PipeEvent) {
            if let Some(other) = other.as_any().downcast_ref::<Counter>() {
                *self.value.lock() = *other.value.lock();
            }
        }
    }

    fn ids(buffer: &DeliveryBuffer) -> Vec<u32> {
        buffer
            .pending()
            .iter()
            .map(|item| {
                let any = item.as_any();
                any.downcast_ref::<Plain>()
                    .map(|p| p.0)
                    .or_else(|| any.downcast_ref::<Ranked>().map(|r| r.0))
                    .or_else(|| any.downcast_ref::<Counter>().map(|c| c.id))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn plain_items_append_in_call_order() {
        let mut buffer = DeliveryBuffer::new();
        let batch: Vec<Arc<dyn PipeEvent>> = (0..5).map(|i| Arc::new(Plain(i)) as _).collect();
        let outcome = buffer.enqueue(&batch, 100);
        buffer.enqueue(&[Arc::new(Plain(9)) as _], 100);

        assert_eq!(outcome.appended, 5);
        assert!(!outcome.resorted);
        assert_eq!(ids(&buffer), vec![0, 1, 2, 3, 4, 9]);
    }

    #[test]
    fn cached_item_is_skipped() {
        let mut buffer = DeliveryBuffer::new();
        let counter = Counter::new(1, 10);
        buffer.enqueue(&[counter.clone() as _], 100);
        let outcome = buffer.enqueue(&[counter.clone() as _], 100);

        assert_eq!(outcome.skipped, 1);
        assert!(!outcome.changed());
        assert_eq!(buffer.pending_len(), 1);
    }

    #[test]
    fn equal_pending_item_is_merged() {
        let mut buffer = DeliveryBuffer::new();
        let first = Counter::new(7, 1);
        buffer.enqueue(&[first.clone() as _], 100);

        let newer = Counter::new(7, 42);
        let outcome = buffer.enqueue(&[newer.clone() as _], 100);

        assert_eq!(outcome.merged, 1);
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(*first.value.lock(), 42);
        assert!(!newer.is_cached());
    }

    #[test]
    fn flushed_items_are_not_merge_targets() {
        let mut buffer = DeliveryBuffer::new();
        let first = Counter::new(3, 1);
        buffer.enqueue(&[first.clone() as _], 100);
        buffer.commit(1);
        assert!(!first.is_cached());

        let newer = Counter::new(3, 2);
        let outcome = buffer.enqueue(&[newer as _], 100);
        assert_eq!(outcome.appended, 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pending_len(), 1);

        buffer.compact();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.flushed_index(), 0);
    }

    #[test]
    fn important_item_sorts_first_above_threshold() {
        let mut buffer = DeliveryBuffer::new();
        let mut batch: Vec<Arc<dyn PipeEvent>> =
            (0..100).map(|i| Arc::new(Plain(i)) as _).collect();
        batch.push(Arc::new(Ranked(100, priority::IMPORTANT)));

        let outcome = buffer.enqueue(&batch, 100);
        assert!(outcome.resorted);
        let order = ids(&buffer);
        assert_eq!(order[0], 100);
        assert_eq!(&order[1..], &(0..100).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn low_priority_sinks_and_ties_keep_order() {
        let mut buffer = DeliveryBuffer::new();
        let mut batch: Vec<Arc<dyn PipeEvent>> = vec![
            Arc::new(Ranked(0, priority::LOW)),
            Arc::new(Ranked(1, priority::NORMAL)),
        ];
        batch.extend((2..6).map(|i| Arc::new(Plain(i)) as Arc<dyn PipeEvent>));
        batch.push(Arc::new(Ranked(6, priority::NORMAL)));

        buffer.enqueue(&batch, 3);
        assert_eq!(ids(&buffer), vec![2, 3, 4, 5, 1, 6, 0]);
    }

    #[test]
    fn no_resort_at_threshold_or_without_priority() {
        let mut buffer = DeliveryBuffer::new();
        let mut batch: Vec<Arc<dyn PipeEvent>> =
            (0..99).map(|i| Arc::new(Plain(i)) as _).collect();
        batch.push(Arc::new(Ranked(99, priority::IMPORTANT)));
        assert!(!buffer.enqueue(&batch, 100).resorted);
        assert_eq!(ids(&buffer)[99], 99);

        let plain: Vec<Arc<dyn PipeEvent>> = (0..150).map(|i| Arc::new(Plain(i)) as _).collect();
        assert!(!buffer.enqueue(&plain, 100).resorted);
    }

    #[test]
    fn resort_leaves_flushed_prefix_alone() {
        let mut buffer = DeliveryBuffer::new();
        buffer.enqueue(&[Arc::new(Plain(50)) as _], 1);
        buffer.commit(1);

        let batch: Vec<Arc<dyn PipeEvent>> = vec![
            Arc::new(Plain(1)),
            Arc::new(Ranked(2, priority::IMPORTANT)),
        ];
        buffer.enqueue(&batch, 1);
        assert_eq!(ids(&buffer), vec![2, 1]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn clear_releases_cached_flags() {
        let mut buffer = DeliveryBuffer::new();
        let counter = Counter::new(1, 1);
        buffer.enqueue(&[counter.clone() as _, Arc::new(Plain(2)) as _], 100);
        assert_eq!(buffer.clone_pending(|e| e.tag() == "Plain").len(), 1);

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!counter.is_cached());
    }

    #[test]
    fn reserved_items_are_not_merged_or_resorted() {
        let mut buffer = DeliveryBuffer::new();
        let counter = Counter::new(4, 1);
        buffer.enqueue(&[counter.clone() as _, Arc::new(Plain(1)) as _], 100);
        let reservation = buffer.reserve(1).unwrap();
        assert!(!reservation.drains_all);
        assert!(buffer.reserve(1).is_none());
        assert_eq!(buffer.deliverable_len(), 1);

        let newer = Counter::new(4, 9);
        let batch: Vec<Arc<dyn PipeEvent>> =
            vec![newer as _, Arc::new(Ranked(2, priority::IMPORTANT)) as _];
        let outcome = buffer.enqueue(&batch, 1);
        assert_eq!(outcome.appended, 2);
        assert_eq!(*counter.value.lock(), 1);
        assert_eq!(ids(&buffer), vec![4, 2, 1, 4]);

        buffer.finish(&reservation, true);
        assert_eq!(buffer.pending_len(), 3);
        assert!(!counter.is_cached());
    }

    #[test]
    fn failed_reservation_returns_items() {
        let mut buffer = DeliveryBuffer::new();
        buffer.append_raw([Arc::new(Plain(1)) as Arc<dyn PipeEvent>]);
        let reservation = buffer.reserve(10).unwrap();
        assert!(reservation.drains_all);
        assert_eq!(buffer.deliverable_len(), 0);

        buffer.finish(&reservation, false);
        assert_eq!(buffer.deliverable_len(), 1);
        assert_eq!(buffer.reserve(10).unwrap().items.len(), 1);
    }

    #[test]
    fn clear_during_send_discards_reservation() {
        let mut buffer = DeliveryBuffer::new();
        buffer.append_raw([Arc::new(Plain(1)) as Arc<dyn PipeEvent>]);
        let reservation = buffer.reserve(10).unwrap();
        buffer.clear();
        buffer.append_raw([Arc::new(Plain(2)) as Arc<dyn PipeEvent>]);

        buffer.finish(&reservation, true);
        assert_eq!(ids(&buffer), vec![2]);
    }

    #[test]
    fn take_open_leaves_reserved_items() {
        let mut buffer = DeliveryBuffer::new();
        let batch: Vec<Arc<dyn PipeEvent>> = (0..3).map(|i| Arc::new(Plain(i)) as _).collect();
        buffer.enqueue(&batch, 100);
        let reservation = buffer.reserve(1).unwrap();

        let moved = buffer.take_open();
        assert_eq!(moved.len(), 2);
        buffer.finish(&reservation, true);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn commit_past_end_is_clamped() {
        let mut buffer = DeliveryBuffer::new();
        buffer.append_raw([Arc::new(Plain(1)) as Arc<dyn PipeEvent>]);
        buffer.commit(10);
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.flushed_index(), 1);
    }
}
