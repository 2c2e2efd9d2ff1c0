//! Bounded priority queue shared by the workers.
//!
//! Highest priority pops first; equal priorities pop in submission order.
//! Pushing never blocks: a full queue rejects. After [`TaskQueue::close`]
//! pushes are refused and `pop` drains what is left, then returns `None`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Why a push was refused. The item is handed back.
#[derive(Debug)]
pub enum PushError<T> {
    /// At capacity.
    Full(T),
    /// Closed for shutdown.
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

struct Entry<T> {
    priority: u32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
    closed: bool,
}

/// Bounded max-priority queue with async pop.
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> TaskQueue<T> {
    /// Create a queue holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns the item back if the queue is full or closed.
    pub fn try_push(&self, item: T, priority: u32) -> Result<(), PushError<T>> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PushError::Closed(item));
            }
            if inner.heap.len() >= self.capacity {
                return Err(PushError::Full(item));
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry {
                priority,
                seq,
                item,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the highest-priority item. Returns `None` once closed and empty.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(entry) = inner.heap.pop() {
                    return Some(entry.item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Refuse further pushes and wake idle consumers.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Items waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pops_by_priority_then_fifo() {
        let queue = TaskQueue::new(10);
        queue.try_push("low", 100).unwrap();
        queue.try_push("high-1", 130).unwrap();
        queue.try_push("mid", 110).unwrap();
        queue.try_push("high-2", 130).unwrap();

        assert_eq!(queue.pop().await, Some("high-1"));
        assert_eq!(queue.pop().await, Some("high-2"));
        assert_eq!(queue.pop().await, Some("mid"));
        assert_eq!(queue.pop().await, Some("low"));
    }

    #[test]
    fn rejects_when_full() {
        let queue = TaskQueue::new(2);
        queue.try_push(1, 0).unwrap();
        queue.try_push(2, 0).unwrap();

        assert!(matches!(queue.try_push(3, 0), Err(PushError::Full(3))));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = TaskQueue::new(4);
        queue.try_push(1, 0).unwrap();
        queue.close();

        assert!(matches!(queue.try_push(2, 0), Err(PushError::Closed(2))));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new(1));
        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn push_wakes_waiting_consumer() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new(1));
        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.try_push(7, 0).unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, Some(7));
    }
}
