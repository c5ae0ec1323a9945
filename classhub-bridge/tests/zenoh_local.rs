//! Local bus adapter against a real Zenoh session.
//!
//! Note: Zenoh requires multi-thread tokio runtime.
//! Each test uses a unique topic prefix to avoid interference.

use std::time::Duration;

use classhub_bridge::{LocalBus, LocalEvent, TransportError, ZenohConfig, ZenohLocalBus};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("classroom_{}", nanos)
}

fn peer() -> ZenohConfig {
    ZenohConfig {
        mode: "peer".to_string(),
        ..ZenohConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscribe_and_publish() {
    let topic = format!("{}/curtain/status", unique_prefix());
    let bus = ZenohLocalBus::new(peer());

    let (connection, mut events) = bus.connect().await.expect("Failed to connect");
    assert!(connection.is_connected());

    connection.subscribe(&topic).await.expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_millis(100)).await;

    connection
        .publish(&topic, b"true".to_vec())
        .await
        .expect("Failed to publish");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for message")
        .expect("Event stream closed");

    match event {
        LocalEvent::Message(message) => {
            assert_eq!(message.topic, topic);
            assert_eq!(message.payload, b"true");
        }
        other => panic!("unexpected event {:?}", other),
    }

    connection.close().await;
    assert!(!connection.is_connected());
    assert_eq!(
        connection.publish(&topic, b"false".to_vec()).await,
        Err(TransportError::NotConnected)
    );
}
