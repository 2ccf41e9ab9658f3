mod testsupport;

use std::time::Duration;

use rafka::prelude::{ConsumerBuilder, Error, GenericCommands, RedisConnection};

#[tokio::test]
async fn it_can_build_a_consumer() -> Result<(), Box<Error>> {
    let (skip, address, topic) = testsupport::get_address_and_topic()?;
    if skip {
        return Ok(());
    }

    let mut consumer = ConsumerBuilder::<RedisConnection>::new(
        address,
        testsupport::unique_group("builder"),
        vec![topic],
    )?
    .id("builder-test")
    .auto_commit(false)
    .build()
    .await?;

    assert!(consumer.config().client_id.ends_with(":builder-test"));
    assert_eq!(consumer.ping().await?, "PONG");

    // an idle topic times out instead of failing
    if let Some(message) = consumer.consume(Duration::from_secs(1)).await? {
        consumer.commit(&[message]).await?;
    }

    consumer.close().await?;
    // closing twice is harmless
    consumer.close().await?;
    Ok(())
}

#[tokio::test]
async fn it_rejects_a_consumer_without_topics() -> Result<(), Box<Error>> {
    let (skip, address) = testsupport::get_address()?;
    if skip {
        return Ok(());
    }

    let result = ConsumerBuilder::<RedisConnection>::new(address, "group", vec![]);
    assert!(matches!(result, Err(Error::MissingConfigOption("topic"))));
    Ok(())
}
