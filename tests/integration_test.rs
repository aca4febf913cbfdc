use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use topicast::broker::{Broker, PayloadFrame};
use topicast::config::BrokerSettings;
use topicast::client::{PubSubClient, stream_end_result};
use topicast::transport::{ServerMessage, Server};
use topicast::utils::error::{ClientError, ErrorCode};

async fn setup_server() -> (String, Arc<Broker>, JoinHandle<()>) {
    serve(Broker::new(CancellationToken::new())).await
}

async fn serve(broker: Broker) -> (String, Arc<Broker>, JoinHandle<()>) {
    let broker = Arc::new(broker);
    let server = Server::bind("127.0.0.1:0", broker.clone())
        .await
        .expect("Failed to bind");
    let addr = server.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        server.run().await.expect("server failed");
    });

    (format!("ws://{addr}"), broker, handle)
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn next_event(events: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

fn assert_broker_error(result: Result<(), ClientError>, expected: ErrorCode) {
    match result {
        Err(ClientError::Broker { code, .. }) => assert_eq!(code, expected),
        other => panic!("Expected broker error {expected}, got {other:?}"),
    }
}

#[tokio::test]
async fn integration_pubsub_end_to_end() {
    let (url, broker, _server) = setup_server().await;

    let mut consumer = PubSubClient::connect(&url).await.expect("consumer connect");
    let mut events = consumer.take_events().unwrap();
    let publisher = PubSubClient::connect(&url).await.expect("publisher connect");

    consumer.subscribe("kubernetes", "s1").unwrap();
    wait_for("subscription", || broker.registry().contains("kubernetes", "s1")).await;

    publisher.publish("kubernetes", b"hello").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ServerMessage::Payload(PayloadFrame::new("kubernetes", b"hello".to_vec()))
    );

    assert_broker_error(
        publisher.publish("unknown-topic", b"hello").await,
        ErrorCode::NotFound,
    );

    consumer.unsubscribe("kubernetes", "s1").await.unwrap();
    let end = next_event(&mut events).await;
    assert!(matches!(stream_end_result(&end), Some(Ok(()))), "{end:?}");
    assert_broker_error(
        publisher.publish("kubernetes", b"hello").await,
        ErrorCode::NotFound,
    );
    assert_broker_error(
        consumer.unsubscribe("kubernetes", "s1").await,
        ErrorCode::NotFound,
    );

    publisher.close().await;
    consumer.close().await;
}

#[tokio::test]
async fn integration_fan_out_to_every_subscriber() {
    let (url, broker, _server) = setup_server().await;
    let publisher = PubSubClient::connect(&url).await.unwrap();

    let mut consumers = Vec::new();
    for i in 0..3 {
        let mut client = PubSubClient::connect(&url).await.unwrap();
        let events = client.take_events().unwrap();
        let id = format!("s{i}");
        client.subscribe("group:chat", &id).unwrap();
        consumers.push((client, events));
    }
    wait_for("all subscriptions", || {
        broker.registry().subscriber_count("group:chat") == 3
    })
    .await;

    publisher.publish("group:chat", b"alice: hi").await.unwrap();

    for (_, events) in consumers.iter_mut() {
        match next_event(events).await {
            ServerMessage::Payload(frame) => {
                assert_eq!(frame.topic, "group:chat");
                assert_eq!(frame.payload, b"alice: hi");
            }
            other => panic!("Expected payload, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn integration_disconnected_subscriber_counts_as_failure() {
    let (url, broker, _server) = setup_server().await;
    let publisher = PubSubClient::connect(&url).await.unwrap();

    let live = PubSubClient::connect(&url).await.unwrap();
    live.subscribe("kubernetes", "live").unwrap();
    let gone = PubSubClient::connect(&url).await.unwrap();
    gone.subscribe("kubernetes", "gone").unwrap();
    wait_for("both subscriptions", || {
        broker.registry().subscriber_count("kubernetes") == 2
    })
    .await;

    gone.close().await;

    // The stale entry stays; once the server notices the disconnect every
    // publish reports it as a failed push.
    let mut last = Ok(());
    for _ in 0..200 {
        last = publisher.publish("kubernetes", b"hello").await;
        if last.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_broker_error(last, ErrorCode::DataLoss);
    assert!(broker.registry().contains("kubernetes", "gone"));
}

#[tokio::test]
async fn integration_duplicate_subscribe_is_silent() {
    let (url, broker, _server) = setup_server().await;

    let mut consumer = PubSubClient::connect(&url).await.unwrap();
    let mut events = consumer.take_events().unwrap();
    consumer.subscribe("kubernetes", "s1").unwrap();
    let second = consumer.subscribe("kubernetes", "s1").unwrap();

    let end = next_event(&mut events).await;
    match &end {
        ServerMessage::StreamEnd { request_id, .. } => assert_eq!(*request_id, Some(second)),
        other => panic!("Expected stream_end, got {other:?}"),
    }
    assert!(matches!(stream_end_result(&end), Some(Ok(()))));
    assert_eq!(broker.registry().subscriber_count("kubernetes"), 1);
}

#[tokio::test]
async fn integration_shutdown_cancels_sessions() {
    let (url, broker, server) = setup_server().await;

    let mut consumer = PubSubClient::connect(&url).await.unwrap();
    let mut events = consumer.take_events().unwrap();
    let request_id = consumer.subscribe("kubernetes", "s1").unwrap();
    wait_for("subscription", || broker.registry().contains("kubernetes", "s1")).await;

    broker.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not stop")
        .unwrap();

    // every open session says why it ended before the connection goes
    let end = next_event(&mut events).await;
    match &end {
        ServerMessage::StreamEnd {
            request_id: id,
            topic,
            subscriber_id,
            ..
        } => {
            assert_eq!(*id, Some(request_id));
            assert_eq!(topic, "kubernetes");
            assert_eq!(subscriber_id, "s1");
        }
        other => panic!("Expected stream_end, got {other:?}"),
    }
    match stream_end_result(&end) {
        Some(Err(ClientError::Broker { code, message })) => {
            assert_eq!(code, ErrorCode::Cancelled);
            assert!(message.ends_with("broker closed"), "{message}");
        }
        other => panic!("Expected a cancelled stream, got {other:?}"),
    }

    // the connection is gone, so requests fail
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match consumer.publish("kubernetes", b"late").await {
                Err(ClientError::ConnectionClosed) => return,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "connection stayed open after shutdown");
}

#[tokio::test]
async fn integration_shutdown_does_not_evict() {
    let (url, broker, server) = serve(Broker::with_settings(
        &BrokerSettings { eviction: true },
        CancellationToken::new(),
    ))
    .await;

    let mut consumer = PubSubClient::connect(&url).await.unwrap();
    let mut events = consumer.take_events().unwrap();
    consumer.subscribe("kubernetes", "s1").unwrap();
    wait_for("subscription", || broker.registry().contains("kubernetes", "s1")).await;

    broker.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not stop")
        .unwrap();

    let end = next_event(&mut events).await;
    assert!(
        matches!(
            stream_end_result(&end),
            Some(Err(ClientError::Broker {
                code: ErrorCode::Cancelled,
                ..
            }))
        ),
        "{end:?}"
    );
    assert!(broker.registry().contains("kubernetes", "s1"));
}
