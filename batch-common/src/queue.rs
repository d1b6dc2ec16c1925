use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Enumeration of errors for operations with a queue source.
/// A transient error must be treated by consumers as an empty fetch, never as fatal.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue is temporarily unavailable: {0}")]
    Unavailable(String),
}

/// A unit of work to be consumed from a queue.
/// The payload is opaque to the queue and the consumer loop; only handlers interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: String,
}

impl Message {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl From<&str> for Message {
    fn from(payload: &str) -> Self {
        Self::new(payload)
    }
}

/// A source of messages to be drained in bounded batches.
///
/// Implementations own the backing store of undelivered messages and must remove
/// returned messages atomically with respect to other callers: a message delivered
/// to one caller is never also delivered to another. An implementation may suspend
/// while waiting for messages or return an empty batch immediately; both are legal.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Receive up to `max_size` messages, removing them from the backing store.
    /// Returned messages preserve their enqueue order.
    async fn receive_batch(&self, max_size: usize) -> Result<Vec<Message>, QueueError>;
}

#[async_trait]
impl<Q: QueueSource + ?Sized> QueueSource for std::sync::Arc<Q> {
    async fn receive_batch(&self, max_size: usize) -> Result<Vec<Message>, QueueError> {
        self.as_ref().receive_batch(max_size).await
    }
}

pub const DEFAULT_FETCH_LATENCY: Duration = Duration::from_millis(10);

/// A queue implemented on top of an in-memory buffer.
///
/// The reference implementation for tests and local runs. It never waits for
/// messages to arrive: each fetch pays a fixed latency standing in for the cost
/// of a network round trip, then drains whatever is currently buffered,
/// possibly nothing. The buffer is mutex-guarded so that concurrent
/// `receive_batch` calls stay atomic, even though a single consumer loop only
/// ever issues one at a time.
pub struct InMemoryQueue {
    messages: Mutex<VecDeque<Message>>,
    fetch_latency: Duration,
}

impl InMemoryQueue {
    /// Initialize a queue preloaded with `messages`, using the default fetch latency.
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self::with_fetch_latency(messages, DEFAULT_FETCH_LATENCY)
    }

    pub fn with_fetch_latency(
        messages: impl IntoIterator<Item = Message>,
        fetch_latency: Duration,
    ) -> Self {
        Self {
            messages: Mutex::new(messages.into_iter().collect()),
            fetch_latency,
        }
    }

    /// Enqueue a message at the back of the queue.
    /// We take ownership of the message to enforce it is only enqueued once.
    pub async fn enqueue(&self, message: Message) {
        self.messages.lock().await.push_back(message);
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl QueueSource for InMemoryQueue {
    async fn receive_batch(&self, max_size: usize) -> Result<Vec<Message>, QueueError> {
        // Simulated cost of the fetch, as a real backing store would have.
        tokio::time::sleep(self.fetch_latency).await;

        let mut messages = self.messages.lock().await;
        let take = max_size.min(messages.len());

        Ok(messages.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preloaded(count: usize) -> InMemoryQueue {
        InMemoryQueue::with_fetch_latency(
            (0..count).map(|i| Message::new(format!("msg-{}", i))),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_receive_batch_returns_all_when_under_max_size() {
        let queue = preloaded(3);

        let batch = queue.receive_batch(5).await.expect("failed to fetch");

        assert_eq!(
            batch,
            vec![
                Message::new("msg-0"),
                Message::new("msg-1"),
                Message::new("msg-2")
            ]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_receive_batch_respects_max_size_and_order() {
        let queue = preloaded(7);

        let first = queue.receive_batch(3).await.expect("failed to fetch");
        let second = queue.receive_batch(3).await.expect("failed to fetch");
        let third = queue.receive_batch(3).await.expect("failed to fetch");

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert_eq!(third.len(), 1);

        let fetched: Vec<String> = first
            .into_iter()
            .chain(second)
            .chain(third)
            .map(|m| m.payload)
            .collect();
        let expected: Vec<String> = (0..7).map(|i| format!("msg-{}", i)).collect();
        assert_eq!(fetched, expected);
    }

    #[tokio::test]
    async fn test_receive_batch_on_empty_queue_returns_nothing() {
        let queue = preloaded(0);

        let batch = queue.receive_batch(5).await.expect("failed to fetch");

        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_messages_are_delivered_to_exactly_one_caller() {
        use std::sync::Arc;

        let queue = Arc::new(preloaded(20));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                queue.receive_batch(5).await.expect("failed to fetch")
            }));
        }

        let mut all: Vec<String> = Vec::new();
        for task in tasks {
            let batch = task.await.expect("fetch task panicked");
            all.extend(batch.into_iter().map(|m| m.payload));
        }

        all.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("msg-{}", i)).collect();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_enqueue_appends_at_the_back() {
        let queue = preloaded(1);
        queue.enqueue(Message::new("late")).await;

        let batch = queue.receive_batch(5).await.expect("failed to fetch");

        assert_eq!(batch, vec![Message::new("msg-0"), Message::new("late")]);
    }
}
