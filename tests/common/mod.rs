//! In-process fake receiver speaking EISCP on 127.0.0.1.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use onkyo_eiscp::{ClientConfig, DeviceIdentity, EiscpCodec, Frame, MacAddress, Zone};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

pub const MAC: &str = "0009B0D00BD5";

pub type Peer = Framed<TcpStream, EiscpCodec>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub async fn accept(listener: &TcpListener) -> Peer {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client did not connect")
        .unwrap();
    Framed::new(stream, EiscpCodec)
}

pub fn identity(port: u16) -> DeviceIdentity {
    DeviceIdentity {
        model: "TX-NR686".to_string(),
        mac: MAC.parse().unwrap(),
        host: "127.0.0.1".to_string(),
        port,
        region: "XX".to_string(),
        zones: vec![Zone::Main, Zone::Zone2],
        protocol_version: 1,
    }
}

/// No background queries, so the test script sees every frame
pub fn scripted_config() -> ClientConfig {
    ClientConfig {
        refresh_on_connect: false,
        poll_interval_secs: None,
        request_timeout_ms: 2_000,
        connect_timeout_ms: 1_000,
        backoff_initial_ms: 50,
        backoff_max_ms: 200,
        rediscover_after: 0,
        ..ClientConfig::default()
    }
}

pub async fn next_message(peer: &mut Peer) -> String {
    timeout(Duration::from_secs(5), peer.next())
        .await
        .expect("no frame from client")
        .expect("client closed the connection")
        .unwrap()
        .message
}

/// Send a report the way receivers do, terminated by EOF CR LF
pub async fn report(peer: &mut Peer, message: &str) {
    let mut data = format!("!1{}", message).into_bytes();
    data.extend_from_slice(&[0x1a, b'\r', b'\n']);

    let mut raw = b"ISCP".to_vec();
    raw.extend_from_slice(&16u32.to_be_bytes());
    raw.extend_from_slice(&(data.len() as u32).to_be_bytes());
    raw.extend_from_slice(&[0x01, 0, 0, 0]);
    raw.extend_from_slice(&data);

    peer.get_mut().write_all(&raw).await.unwrap();
}

/// Answer queries from a table of `code -> value`; unknown codes get `N/A`.
/// Set commands are confirmed with their own value.
pub fn serve(mut peer: Peer, values: &[(&str, &str)]) -> JoinHandle<()> {
    let values: HashMap<String, String> = values
        .iter()
        .map(|(code, value)| (code.to_string(), value.to_string()))
        .collect();

    tokio::spawn(async move {
        while let Some(Ok(frame)) = peer.next().await {
            let (code, value) = frame.message.split_at(3);
            let reply = if value == "QSTN" {
                values.get(code).cloned().unwrap_or_else(|| "N/A".to_string())
            } else {
                value.to_string()
            };
            if peer.send(Frame::new(format!("{}{}", code, reply))).await.is_err() {
                break;
            }
        }
    })
}

pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn discovery_reply(model: &str, mac: &str, port: u16) -> Vec<u8> {
    Frame::with_unit(b'1', format!("ECN{}/{}/XX/{}", model, port, mac))
        .to_bytes()
        .to_vec()
}

/// UDP responder answering every discovery query with one identity
pub async fn udp_responder(model: &'static str, mac: &'static str, tcp_port: u16) -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let Ok(frame) = onkyo_eiscp::decode_datagram(&buf[..len]) else {
                continue;
            };
            if frame.message == "ECNQSTN" {
                let _ = socket.send_to(&discovery_reply(model, mac, tcp_port), from).await;
            }
        }
    });
    (addr, task)
}

pub fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}
