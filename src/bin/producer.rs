use clap::Parser;
use rafka::prelude::{BrokerAddress, GenericCommands, ProducerBuilder, RedisConnection};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Produce every line read from stdin to a Rafka topic.
#[derive(Parser)]
#[command(name = "rafka-producer")]
struct Args {
    #[arg(long, env = "RAFKA_HOST", default_value = rafka::DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "RAFKA_PORT", default_value_t = rafka::DEFAULT_PORT)]
    port: u16,

    #[arg(long, env = "RAFKA_TOPIC")]
    topic: String,

    /// Partition hashing key
    #[arg(long)]
    key: Option<String>,

    #[arg(long, default_value_t = rafka::DEFAULT_FLUSH_TIMEOUT_MS)]
    flush_timeout_ms: u64,
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

    tracing::info!("Connecting to {}:{}", args.host, args.port);
    let mut producer =
        ProducerBuilder::<RedisConnection>::new(BrokerAddress::new(args.host, args.port))
            .build()
            .await
            .map_err(|err| tracing::error!("{:?}", err))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut produced = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|err| tracing::error!("Error reading stdin {:?}", err))?
    {
        producer
            .produce(&args.topic, line, args.key.as_deref())
            .await
            .map_err(|err| tracing::error!("{:?}", err))?;
        produced += 1;
    }

    let unflushed = producer
        .flush(args.flush_timeout_ms)
        .await
        .map_err(|err| tracing::error!("{:?}", err))?;
    tracing::info!(
        "Produced {} messages to {}, {} left unflushed",
        produced,
        args.topic,
        unflushed
    );

    producer
        .close()
        .await
        .map_err(|err| tracing::error!("{:?}", err))
}
