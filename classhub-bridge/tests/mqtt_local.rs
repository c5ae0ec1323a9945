//! MQTT local bus adapter against a scripted broker.
//!
//! The broker side speaks just enough MQTT 3.1.1 to accept one client:
//! CONNACK, SUBACK, one PUBLISH towards the hub, then it reads what the hub
//! publishes and hangs up.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use classhub_bridge::config::LocalBusConfig;
use classhub_bridge::{LocalBus, LocalEvent, MqttLocalBus, TransportError};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Read one MQTT packet, returning its first header byte and body.
async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = stream.read_u8().await.unwrap();

    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.unwrap();
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    (header, body)
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);

    let mut packet = vec![0x30, remaining as u8, 0x00, topic.len() as u8];
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

#[tokio::test]
async fn test_subscribe_receive_publish_and_lose_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let (header, _) = read_packet(&mut stream).await;
        assert_eq!(header >> 4, 1, "expected CONNECT");
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let (header, body) = read_packet(&mut stream).await;
        assert_eq!(header >> 4, 8, "expected SUBSCRIBE");
        let topic_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        let topic = String::from_utf8(body[4..4 + topic_len].to_vec()).unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();

        stream
            .write_all(&publish_packet(&topic, b"true"))
            .await
            .unwrap();

        let published = loop {
            let (header, body) = read_packet(&mut stream).await;
            if header >> 4 == 3 {
                break body;
            }
        };
        (topic, published)
    });

    let config = LocalBusConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..LocalBusConfig::default()
    };
    let bus = MqttLocalBus::new(&config);
    let (connection, mut events) = tokio::time::timeout(TIMEOUT, bus.connect())
        .await
        .expect("Timeout connecting")
        .expect("Failed to connect");
    assert!(connection.is_connected());

    connection
        .subscribe("classroom/curtain/status")
        .await
        .expect("Failed to subscribe");

    let event = tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("Timeout waiting for message")
        .expect("Event stream closed");
    match event {
        LocalEvent::Message(message) => {
            assert_eq!(message.topic, "classroom/curtain/status");
            assert_eq!(message.payload, b"true");
        }
        other => panic!("unexpected event {:?}", other),
    }

    connection
        .publish("classroom/curtain/command", b"false".to_vec())
        .await
        .expect("Failed to publish");

    let (subscribed, published) = tokio::time::timeout(TIMEOUT, broker)
        .await
        .expect("Timeout waiting for broker")
        .unwrap();
    assert_eq!(subscribed, "classroom/curtain/status");
    let topic_len = u16::from_be_bytes([published[0], published[1]]) as usize;
    assert_eq!(&published[2..2 + topic_len], b"classroom/curtain/command");
    assert_eq!(&published[2 + topic_len..], b"false");

    // The broker task has dropped its socket.
    let event = tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("Timeout waiting for disconnect")
        .expect("Event stream closed");
    assert!(matches!(event, LocalEvent::Disconnected(_)));
    assert!(!connection.is_connected());
    assert_eq!(
        connection.publish("classroom/curtain/command", b"true".to_vec()).await,
        Err(TransportError::NotConnected)
    );

    connection.close().await;
}

#[tokio::test]
async fn test_refused_connack_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_packet(&mut stream).await;
        // Not authorized.
        stream.write_all(&[0x20, 0x02, 0x00, 0x05]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let config = LocalBusConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..LocalBusConfig::default()
    };
    let result = tokio::time::timeout(TIMEOUT, MqttLocalBus::new(&config).connect())
        .await
        .expect("Timeout connecting");
    assert!(matches!(result, Err(TransportError::Connect(_))));
}
