//! Unbounded multi-producer/multi-consumer FIFO with a suspending `pop`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// An unbounded FIFO queue whose `pop` waits until an item is available.
///
/// `push` never blocks and never fails. Every pushed item is handed to exactly one
/// `pop`. A pending `pop` can be dropped at any point without losing an item, which
/// is what makes [`BlockingQueue::pop_timeout`] safe.
///
/// # Examples
///
/// ```
/// use mq_client::BlockingQueue;
///
/// # #[tokio::main]
/// # async fn main() {
/// let queue = BlockingQueue::new();
/// queue.push(1);
/// queue.push(2);
/// assert_eq!(queue.pop().await, 1);
/// assert_eq!(queue.pop().await, 2);
/// # }
/// ```
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Notify,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        // The critical sections never panic midway, so a poisoned lock still
        // guards a consistent deque.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `item` to the tail and wakes one waiting `pop`.
    pub fn push(&self, item: T) {
        self.items().push_back(item);
        self.not_empty.notify_one();
    }

    /// Removes and returns the head, waiting for a `push` while the queue is empty.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            // Register interest before looking at the deque so a push landing
            // between the check and the await still wakes us.
            notified.as_mut().enable();

            if let Some(item) = self.items().pop_front() {
                return item;
            }

            notified.await;
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning `None`.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
