//! Runs `MqttConnector` against a minimal MQTT 3.1.1 broker served over a
//! local WebSocket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use stationwatch::config::BrokerSettings;
use stationwatch::mqtt::{ConnectionConfig, Connector, Envelope, MqttConnector, TransportEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const CONNECT: u8 = 1;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

const OFFLINE: &str = r#"{"status":"offline","stationId":"Pump-3"}"#;

/// Broker that acknowledges the connection, answers the subscription with
/// `suback_code` and then publishes `payload` on the subscribed topic.
/// Reports the type of every packet it receives.
struct FakeBroker {
    port: u16,
    received: mpsc::UnboundedReceiver<u8>,
}

impl FakeBroker {
    async fn start(suback_code: u8, payload: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, suback_code, payload, tx.clone()));
            }
        });

        Self { port, received }
    }

    fn connector(&self) -> MqttConnector {
        MqttConnector::new(BrokerSettings {
            port: self.port,
            connect_timeout_secs: 5,
            ..BrokerSettings::default()
        })
    }

    /// Waits until a packet of type `kind` arrives.
    async fn expect_packet(&mut self, kind: u8) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(received) = self.received.recv().await {
                if received == kind {
                    return;
                }
            }
            panic!("broker connection ended before packet type {}", kind);
        })
        .await
        .expect("packet not received in time")
    }
}

/// Answers with the subprotocol the client asked for (`mqtt`).
fn echo_protocol(req: &Request, mut resp: Response) -> Result<Response, ErrorResponse> {
    if let Some(protocol) = req.headers().get("Sec-WebSocket-Protocol") {
        resp.headers_mut()
            .insert("Sec-WebSocket-Protocol", protocol.clone());
    }
    Ok(resp)
}

async fn serve(
    stream: TcpStream,
    suback_code: u8,
    payload: &'static str,
    received: mpsc::UnboundedSender<u8>,
) {
    let ws_stream = match accept_hdr_async(stream, echo_protocol).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();
    let mut buffer = Vec::new();
    let mut topic = String::new();

    while let Some(Ok(msg)) = read.next().await {
        let Message::Binary(data) = msg else {
            continue;
        };
        buffer.extend_from_slice(&data);

        while let Some((kind, body)) = take_packet(&mut buffer) {
            let _ = received.send(kind);
            let replies = match kind {
                CONNECT => vec![vec![0x20, 0x02, 0x00, 0x00]],
                SUBSCRIBE => {
                    // packet id, then one length-prefixed topic filter
                    let len = u16::from_be_bytes([body[2], body[3]]) as usize;
                    topic = String::from_utf8_lossy(&body[4..4 + len]).into_owned();
                    vec![
                        vec![0x90, 0x03, body[0], body[1], suback_code],
                        publish(&topic, payload),
                    ]
                }
                PINGREQ => vec![vec![0xD0, 0x00]],
                _ => Vec::new(),
            };

            for reply in replies {
                if write.send(Message::Binary(reply)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Splits one complete packet off the front of `buffer`.
fn take_packet(buffer: &mut Vec<u8>) -> Option<(u8, Vec<u8>)> {
    let mut remaining = 0usize;
    let mut pos = 1;
    loop {
        let byte = *buffer.get(pos)?;
        remaining |= ((byte & 0x7f) as usize) << (7 * (pos - 1));
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if buffer.len() < pos + remaining {
        return None;
    }

    let kind = buffer[0] >> 4;
    let body = buffer[pos..pos + remaining].to_vec();
    buffer.drain(..pos + remaining);
    Some((kind, body))
}

/// QoS 0 PUBLISH, small enough for a one-byte remaining length.
fn publish(topic: &str, payload: &str) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    let mut packet = vec![0x30, remaining as u8];
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload.as_bytes());
    packet
}

async fn next_event(events: &mut mpsc::Receiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no transport event in time")
        .expect("transport dropped its event channel")
}

#[tokio::test]
async fn test_connect_subscribe_and_receive() {
    let broker = FakeBroker::start(0x00, OFFLINE).await;
    let config = ConnectionConfig::configure("127.0.0.1", "status").unwrap();
    let (tx, mut events) = mpsc::channel(16);

    let _handle = broker.connector().connect(4, &config, tx).unwrap();

    let connected = next_event(&mut events).await;
    assert_eq!(connected.session, 4);
    assert_eq!(connected.event, TransportEvent::Connected);
    assert_eq!(
        next_event(&mut events).await.event,
        TransportEvent::Subscribed {
            topic: "status".to_string()
        }
    );
    assert_eq!(
        next_event(&mut events).await.event,
        TransportEvent::Message {
            topic: "status".to_string(),
            payload: OFFLINE.as_bytes().to_vec(),
        }
    );
}

#[tokio::test]
async fn test_rejected_subscription_is_reported() {
    let broker = FakeBroker::start(0x80, OFFLINE).await;
    let config = ConnectionConfig::configure("127.0.0.1", "status").unwrap();
    let (tx, mut events) = mpsc::channel(16);

    let _handle = broker.connector().connect(1, &config, tx).unwrap();

    assert_eq!(next_event(&mut events).await.event, TransportEvent::Connected);
    assert_eq!(
        next_event(&mut events).await.event,
        TransportEvent::SubscribeFailed {
            topic: "status".to_string()
        }
    );
}

#[tokio::test]
async fn test_ending_handle_sends_disconnect() {
    let mut broker = FakeBroker::start(0x00, OFFLINE).await;
    let config = ConnectionConfig::configure("127.0.0.1", "status").unwrap();
    let (tx, mut events) = mpsc::channel(16);

    let mut handle = broker.connector().connect(9, &config, tx).unwrap();
    broker.expect_packet(CONNECT).await;
    broker.expect_packet(SUBSCRIBE).await;

    // Drain until the publish so the pump is in its streaming loop
    loop {
        if let TransportEvent::Message { .. } = next_event(&mut events).await.event {
            break;
        }
    }

    handle.end();
    broker.expect_packet(DISCONNECT).await;
}
