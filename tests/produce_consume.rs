mod testsupport;

use std::time::Duration;

use rafka::prelude::{
    ConsumerBuilder, Error, GenericCommands, ProducerBuilder, RedisConnection,
    DEFAULT_FLUSH_TIMEOUT_MS,
};
use tokio_stream::StreamExt;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn it_can_produce_and_consume() -> Result<(), Box<Error>> {
    let (skip, address, topic) = testsupport::get_address_and_topic()?;
    if skip {
        return Ok(());
    }

    let mut producer = ProducerBuilder::<RedisConnection>::new(address.clone())
        .build()
        .await?;
    assert_eq!(producer.ping().await?, "PONG");

    let marker = testsupport::unique_group("run");
    let values: Vec<String> = (0..3).map(|i| format!("{marker}-{i}")).collect();
    for value in values.iter() {
        producer
            .produce(&topic, value, Some("same-partition"))
            .await?;
    }
    assert_eq!(producer.flush(DEFAULT_FLUSH_TIMEOUT_MS).await?, 0);
    producer.close().await?;

    let mut consumer = ConsumerBuilder::<RedisConnection>::new(
        address,
        testsupport::unique_group("produce-consume"),
        vec![topic.clone()],
    )?
    .option("auto.offset.reset", "earliest")
    .build()
    .await?;

    // the topic may hold messages of earlier runs, keep ours only
    let mut consumed = vec![];
    for _ in 0..20 {
        let batch = consumer.consume_batch(TIMEOUT, 10, TIMEOUT).await?;
        consumed.extend(
            batch
                .into_iter()
                .filter(|message| message.value.starts_with(marker.as_bytes())),
        );
        if consumed.len() >= values.len() {
            break;
        }
    }

    assert!(consumed.iter().all(|message| message.topic == topic));
    // same key, same partition, so order is kept
    let received: Vec<String> = consumed
        .iter()
        .map(|message| String::from_utf8_lossy(&message.value).into_owned())
        .collect();
    assert_eq!(received, values);

    consumer.close().await?;
    Ok(())
}

#[tokio::test]
async fn it_can_stream_messages() -> Result<(), Box<Error>> {
    let (skip, address, topic) = testsupport::get_address_and_topic()?;
    if skip {
        return Ok(());
    }

    let mut producer = ProducerBuilder::<RedisConnection>::new(address.clone())
        .build()
        .await?;
    producer.produce(&topic, "streamed", None).await?;
    producer.flush(DEFAULT_FLUSH_TIMEOUT_MS).await?;

    let consumer = ConsumerBuilder::<RedisConnection>::new(
        address,
        testsupport::unique_group("stream"),
        vec![topic.clone()],
    )?
    .option("auto.offset.reset", "earliest")
    .build()
    .await?;

    let stream = consumer.into_autocommit_stream(TIMEOUT);
    tokio::pin!(stream);

    let next = tokio::time::timeout(Duration::from_secs(60), stream.next())
        .await
        .map_err(|_| Box::new(Error::CommandError("no message streamed".to_owned())))?;
    let message = match next {
        Some(message) => message?,
        None => panic!("stream ended"),
    };
    assert_eq!(message.topic, topic);

    Ok(())
}
