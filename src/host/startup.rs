//! Host startup and shutdown sequence

use crate::broker::memory::InMemoryBroker;
use crate::client::{
    handler, Client, ClientBuilder, ClientError, ConsumerState, MessageHandler, Services,
};
use crate::config::HostConfig;
use crate::core::cancellation::CancellationContext;
use crate::core::error_handling::log_error_with_context;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::host::args::Args;
use crate::host::publisher::{publish, DemoPublisher};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on waiting for consumers to drain at shutdown
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Messages handled by the host's consumers, shared through the client's services
#[derive(Debug, Default)]
pub struct ReceivedCounter(AtomicU64);

impl ReceivedCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Parse arguments, initialise logging and run the host; returns the exit code
pub fn startup() -> i32 {
    let args = Args::parse();
    let use_color = !args.no_color && std::io::stdout().is_terminal();

    let log_file = args.log_file.as_ref().map(|p| p.to_string_lossy().to_string());
    if let Err(e) = init_logging(
        args.log_level.as_deref(),
        args.log_format(),
        log_file.as_deref(),
        use_color,
    ) {
        eprintln!("Error: failed to initialise logging: {}", e);
        return 1;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("FATAL: cannot start async runtime: {}", e);
            return 1;
        }
    };

    runtime.block_on(async {
        let shutdown = ShutdownCoordinator::new();
        shutdown.install_signal_handlers();
        run(&args, &shutdown).await
    })
}

/// Run the broker and client until `shutdown` is triggered
pub async fn run(args: &Args, shutdown: &ShutdownCoordinator) -> i32 {
    let config = match &args.config {
        Some(path) => HostConfig::load(path).await,
        None => {
            log::info!("No --config given; using the built-in demo configuration");
            HostConfig::demo()
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log_error_with_context(&e, "Loading configuration");
            return 1;
        }
    };

    let broker = InMemoryBroker::with_settings(config.broker.settings());
    log::info!("In-memory broker listening on {}", broker.endpoint());

    let client = match build_client(&config, &broker) {
        Ok(client) => client,
        Err(e) => {
            log_error_with_context(&e, "Client registration");
            return 1;
        }
    };

    let ctx = shutdown.context();
    if let Err(e) = client.start(&ctx).await {
        let code = if e.is_cancelled() {
            log::info!("Startup interrupted by shutdown");
            0
        } else {
            log_error_with_context(&e, "Client startup");
            1
        };
        stop(&client).await;
        return code;
    }

    let publisher = match (&config.publisher, client.anonymous_producer::<DemoPublisher>()) {
        (Some(settings), Some(producer)) => Some(tokio::spawn(publish(
            producer,
            settings.clone(),
            ctx.child(),
        ))),
        _ => None,
    };

    match args.run_for() {
        Some(limit) => {
            if ctx.run_until_cancelled(tokio::time::sleep(limit)).await.is_ok() {
                log::info!("Run time of {}s elapsed", limit.as_secs());
                shutdown.trigger_shutdown();
            }
        }
        None => shutdown.wait().await,
    }

    if let Some(task) = publisher {
        if let Err(e) = task.await {
            log::warn!("Publisher task failed: {}", e);
        }
    }

    stop(&client).await;

    let received = client
        .services()
        .get::<ReceivedCounter>()
        .map(|counter| counter.get())
        .unwrap_or_default();
    log::info!("Shutdown complete; {} message(s) handled", received);
    0
}

async fn stop(client: &Client) {
    let deadline = CancellationContext::new();
    let timer = {
        let deadline = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_TIMEOUT).await;
            deadline.cancel();
        })
    };

    match client.stop(&deadline).await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => log::warn!(
            "Consumers did not stop within {}s",
            STOP_TIMEOUT.as_secs()
        ),
        Err(e) => log::warn!("Stopping consumers failed: {}", e),
    }
    timer.abort();

    for (label, state) in client.consumer_states() {
        if state != ConsumerState::Stopped && state != ConsumerState::Created {
            log::warn!("Consumer {} left in state {:?}", label, state);
        }
    }
    client.dispose().await;
}

/// Register every configured connection, consumer and the demo publisher
pub fn build_client(config: &HostConfig, broker: &InMemoryBroker) -> Result<Client, ClientError> {
    let mut builder =
        ClientBuilder::new().with_services(Services::new().with(ReceivedCounter::default()));

    for connection in &config.connections {
        let mut registration = builder.add_connection(
            connection.name.clone(),
            Arc::new(broker.connector()),
            connection.endpoints.clone(),
        )?;
        registration
            .connect_retry(connection.retry.clone())
            .enable_address_declaration(connection.declare_addresses)
            .enable_queue_declaration(connection.declare_queues);

        for consumer in &connection.consumers {
            match &consumer.queue {
                Some(queue) => registration.add_queue_consumer(
                    consumer.address.clone(),
                    consumer.routing_type,
                    queue.clone(),
                    consumer.options.clone(),
                    consumer.queue_options.clone(),
                    logging_handler(),
                )?,
                None => registration.add_consumer(
                    consumer.address.clone(),
                    consumer.routing_type,
                    consumer.options.clone(),
                    logging_handler(),
                )?,
            };
        }
    }

    if let Some(publisher) = &config.publisher {
        let mut registration =
            builder
                .connection(&publisher.connection)
                .ok_or_else(|| ClientError::UnknownConnection {
                    name: publisher.connection.clone(),
                })?;
        registration.add_anonymous_producer::<DemoPublisher>(publisher.options.clone())?;
    }

    builder.build()
}

/// Log, count and accept every message
fn logging_handler() -> MessageHandler {
    handler(|message, context| async move {
        let location = match context.queue() {
            Some(queue) => format!("{}::{}", context.address(), queue),
            None => context.address().to_string(),
        };
        log::info!(
            "[{}#{}] {} {:?}",
            location,
            context.instance(),
            message.body,
            message.properties
        );
        if let Some(counter) = context.services().get::<ReceivedCounter>() {
            counter.0.fetch_add(1, Ordering::Relaxed);
        }
        context.accept(&message).await?;
        Ok(())
    })
}
