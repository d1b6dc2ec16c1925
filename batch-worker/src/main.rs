//! Consume messages from a queue source with a batch consumer loop.
use envconfig::Envconfig;
use tokio::signal::unix::SignalKind;
use tracing::info;

use batch_common::health::HealthRegistry;
use batch_common::metrics::{serve, setup_status_router};
use batch_common::queue::{InMemoryQueue, Message};
use batch_worker::config::Config;
use batch_worker::consumer::BatchConsumer;
use batch_worker::error::{HandlerError, WorkerError};

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness
        .register("consumer".to_string(), time::Duration::seconds(30))
        .await;

    let queue = InMemoryQueue::with_fetch_latency(
        (0..config.seed_messages).map(|i| Message::new(format!("msg-{}", i))),
        config.fetch_latency.0,
    );

    let handler = |message: Message| async move {
        info!("processed message: {}", message.payload);
        Ok::<(), HandlerError>(())
    };

    let consumer = BatchConsumer::new(
        config.worker_name.as_str(),
        queue,
        handler,
        config.batch_size,
        config.idle_interval.0,
        consumer_liveness,
    );
    let handle = consumer.start();

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_status_router(liveness);
        serve(router, &bind)
            .await
            .expect("failed to start serving the status endpoints");
    });

    wait_for_shutdown_signal().await;
    handle.stop().await;

    Ok(())
}
