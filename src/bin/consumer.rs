use std::time::Duration;

use clap::Parser;
use rafka::prelude::{BrokerAddress, ConsumerBuilder, GenericCommands, RedisConnection};
use tracing_subscriber::EnvFilter;

/// Consume messages from Rafka and print them.
#[derive(Parser)]
#[command(name = "rafka-consumer")]
struct Args {
    #[arg(long, env = "RAFKA_HOST", default_value = rafka::DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "RAFKA_PORT", default_value_t = rafka::DEFAULT_PORT)]
    port: u16,

    #[arg(long, env = "RAFKA_GROUP")]
    group: String,

    /// Comma separated list of topics
    #[arg(long, env = "RAFKA_TOPICS", value_delimiter = ',', required = true)]
    topics: Vec<String>,

    /// Member id, random if not given
    #[arg(long, env = "RAFKA_CONSUMER_ID")]
    id: Option<String>,

    /// Seconds to wait for a message
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Consume batches of this size instead of single messages
    #[arg(long, default_value_t = 0)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        // Display source code file paths
        .with_file(true)
        // Display source code line numbers
        .with_line_number(true)
        // Display the thread ID an event was recorded on
        .with_thread_ids(true)
        // Don't display the event's target (module path)
        .with_target(false)
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    let mut builder = ConsumerBuilder::<RedisConnection>::new(
        BrokerAddress::new(args.host, args.port),
        args.group,
        args.topics,
    )
    .map_err(|err| tracing::error!("{:?}", err))?;
    if let Some(id) = args.id {
        builder = builder.id(id);
    }
    let mut consumer = builder
        .build()
        .await
        .map_err(|err| tracing::error!("{:?}", err))?;

    loop {
        let consumed = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            consumed = async {
                if args.batch_size > 0 {
                    consumer
                        .consume_batch(timeout, args.batch_size, Duration::ZERO)
                        .await
                } else {
                    consumer
                        .consume(timeout)
                        .await
                        .map(|message| message.into_iter().collect())
                }
            } => consumed,
        };

        match consumed {
            Ok(messages) => {
                for message in messages {
                    tracing::info!(
                        "{}/{}@{}: {}",
                        message.topic,
                        message.partition,
                        message.offset,
                        String::from_utf8_lossy(&message.value)
                    );
                }
            }
            Err(err) => tracing::error!("Error consuming {:?}", err),
        }
    }

    consumer
        .close()
        .await
        .map_err(|err| tracing::error!("{:?}", err))
}
