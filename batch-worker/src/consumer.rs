use std::future::Future;
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use batch_common::health::HealthHandle;
use batch_common::queue::{Message, QueueSource};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::HandlerError;

/// A `MessageHandler` is anything that can process one message, reporting
/// success or failure. It is invoked once per message with no ordering
/// guarantee within a batch, and is expected to complete in finite time: a
/// handler that never completes stalls the batch barrier and thus the whole
/// loop, which is a caller responsibility, not guarded here.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Any async function or closure over a message is a handler.
#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        self(message).await
    }
}

/// A consumer to poll a `QueueSource` in bounded batches and dispatch each
/// message to a handler, concurrently within the batch.
///
/// Each cycle fetches at most `batch_size` messages, spawns one task per
/// message, and waits for all of them before fetching again, so batches never
/// overlap. An empty fetch idles for `idle_interval` before retrying. The
/// degree of concurrency equals the batch size; a global concurrency cap
/// across batches is a deliberate extension point left out of this consumer.
pub struct BatchConsumer<Q, H> {
    /// An identifier for this consumer, used in logs and metric labels.
    name: String,
    /// The queue we will be draining batches from.
    queue: Q,
    /// The handler invoked once per message.
    handler: Arc<H>,
    /// Upper bound on the number of messages per fetch.
    batch_size: usize,
    /// How long to wait after an empty fetch before polling again.
    idle_interval: time::Duration,
    /// The liveness check handle, reported on every poll cycle.
    liveness: HealthHandle,
    /// One-shot stop signal, observed between cycles and during the idle wait.
    shutdown: CancellationToken,
}

impl<Q, H> BatchConsumer<Q, H>
where
    Q: QueueSource + 'static,
    H: MessageHandler + 'static,
{
    pub fn new(
        name: &str,
        queue: Q,
        handler: H,
        batch_size: usize,
        idle_interval: time::Duration,
        liveness: HealthHandle,
    ) -> Self {
        assert!(batch_size >= 1, "batch_size must be at least 1");

        Self {
            name: name.to_owned(),
            queue,
            handler: Arc::new(handler),
            batch_size,
            idle_interval,
            liveness,
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the consumer loop on the runtime and return a handle to stop it.
    pub fn start(self) -> ConsumerHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());

        ConsumerHandle { shutdown, task }
    }

    /// Run this consumer until cancelled. Cancellation is the only way out and
    /// is not an error: the loop returns cleanly whether the signal arrives
    /// while fetching, idling, or waiting on an in-flight batch.
    pub async fn run(self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.liveness.report_healthy().await;

            // A fetch failure is indistinguishable from an empty queue at this
            // layer: both lead to an idle wait, never to loop termination.
            let batch = match self.queue.receive_batch(self.batch_size).await {
                Ok(batch) => batch,
                Err(error) => {
                    warn!("failed to fetch batch: {}", error);
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
                continue;
            }

            let labels = [("consumer", self.name.clone())];
            metrics::counter!("batches_fetched_total", &labels).increment(1);

            self.dispatch(batch).await;
        }

        info!("consumer {} stopped", self.name);
    }

    /// Fan a batch out to one task per message and wait for all of them.
    ///
    /// This is the barrier that keeps fetches strictly sequential: the next
    /// cycle cannot begin until the slowest invocation of this batch is done.
    /// A cancellation arriving here does not interrupt anything; every
    /// already-started invocation runs to completion first.
    async fn dispatch(&self, batch: Vec<Message>) {
        let now = tokio::time::Instant::now();
        let labels = [("consumer", self.name.clone())];

        let tasks: Vec<_> = batch
            .into_iter()
            .map(|message| {
                spawn_message_processing_task(self.handler.clone(), self.name.clone(), message)
            })
            .collect();

        for joined in join_all(tasks).await {
            if let Err(error) = joined {
                // A panicking handler is a programming error; its siblings
                // still complete and the loop carries on.
                error!("message processing task panicked: {}", error);
            }
        }

        metrics::histogram!("batch_processing_duration_seconds", &labels)
            .record(now.elapsed().as_secs_f64());
    }
}

/// Spawn a Tokio task to process a single message from a batch.
///
/// A handler failure is recorded and logged but does not propagate: it cannot
/// abort sibling invocations or the consumer loop, and the message is not
/// re-queued. Retry policy belongs to the handler, not to this consumer.
fn spawn_message_processing_task<H: MessageHandler + 'static>(
    handler: Arc<H>,
    consumer_name: String,
    message: Message,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let labels = [("consumer", consumer_name)];

        match handler.handle(message).await {
            Ok(()) => {
                metrics::counter!("messages_processed_total", &labels).increment(1);
            }
            Err(error) => {
                metrics::counter!("messages_failed_total", &labels).increment(1);
                error!("failed to process message: {}", error);
            }
        }
    })
}

/// Handle to a running consumer loop.
pub struct ConsumerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Signal the loop to stop. Idempotent: cancelling twice is a no-op.
    ///
    /// The loop will not start a new fetch or idle wait after this, but an
    /// in-flight batch finishes all of its started invocations first.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel and wait until the loop has observably stopped.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            error!("consumer task panicked: {}", error);
        }
    }
}
