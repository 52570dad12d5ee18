//! Test-only `RouterCore` double and TLS client harness shared by the
//! integration tests.
//!
//! Messages understood by `FakeCore::load_message` use a tiny wire
//! encoding private to this harness, not part of the protocol proper:
//! `u8 tag | u64 target (LE) | u8 sentinel | ...payload`. `tag` selects
//! the `MessageType`; `target` is only meaningful for `Unsubscribe`;
//! `sentinel` lets a test ask `FakeCore` to fail affinity/verification
//! for a given frame without adding test-only methods to the `Message`
//! trait itself.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bw_peer::router::communication::message::{Command, Frame, FrameHeader, StatusCode};
use bw_peer::router::communication::server::PeerServer;
use bw_peer::router::core::{DeliveryCallback, ListCallback, Message, MessageType, RouterCore, SubscriptionId};
use bw_peer::router::crypto::signature::KeyPair;
use bw_peer::router::log;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

pub const TAG_PUBLISH: u8 = 0;
pub const TAG_PERSIST: u8 = 1;
pub const TAG_UNSUBSCRIBE: u8 = 2;
pub const TAG_SUBSCRIBE: u8 = 3;
pub const TAG_TAP: u8 = 4;
pub const TAG_QUERY: u8 = 5;
pub const TAG_TAP_QUERY: u8 = 6;
pub const TAG_LIST: u8 = 7;
pub const TAG_OTHER: u8 = 8;

pub const SENTINEL_OK: u8 = 0;
pub const SENTINEL_AFFINITY_FAIL: u8 = 1;
pub const SENTINEL_VERIFY_FAIL: u8 = 2;

/// Builds a test message body: `tag | target (8 bytes LE) | sentinel | payload`.
pub fn body(tag: u8, target: u64, sentinel: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    out.push(tag);
    out.extend_from_slice(&target.to_le_bytes());
    out.push(sentinel);
    out.extend_from_slice(payload);
    out
}

pub fn publish_body(payload: &[u8]) -> Vec<u8> {
    body(TAG_PUBLISH, 0, SENTINEL_OK, payload)
}

pub fn subscribe_body() -> Vec<u8> {
    body(TAG_SUBSCRIBE, 0, SENTINEL_OK, b"")
}

pub fn list_body() -> Vec<u8> {
    body(TAG_LIST, 0, SENTINEL_OK, b"")
}

pub fn unsubscribe_body(target: u64) -> Vec<u8> {
    body(TAG_UNSUBSCRIBE, target, SENTINEL_OK, b"")
}

pub fn affinity_fail_body() -> Vec<u8> {
    body(TAG_PUBLISH, 0, SENTINEL_AFFINITY_FAIL, b"")
}

pub fn verify_fail_body() -> Vec<u8> {
    body(TAG_PUBLISH, 0, SENTINEL_VERIFY_FAIL, b"")
}

/// A message type the dispatcher doesn't recognize as any of its named
/// operations.
pub fn other_body() -> Vec<u8> {
    body(TAG_OTHER, 0, SENTINEL_OK, b"")
}

/// Shorter than the 10-byte minimum header any real message body needs
/// under this harness's encoding — always rejected by `load_message`.
pub fn malformed_body() -> Vec<u8> {
    vec![9, 9]
}

struct FakeMessage {
    tag: u8,
    target: u64,
    payload: Vec<u8>,
}

impl Message for FakeMessage {
    fn message_type(&self) -> MessageType {
        match self.tag {
            TAG_PUBLISH => MessageType::Publish,
            TAG_PERSIST => MessageType::Persist,
            TAG_UNSUBSCRIBE => MessageType::Unsubscribe,
            TAG_SUBSCRIBE => MessageType::Subscribe,
            TAG_TAP => MessageType::Tap,
            TAG_QUERY => MessageType::Query,
            TAG_TAP_QUERY => MessageType::TapQuery,
            TAG_LIST => MessageType::List,
            TAG_OTHER => MessageType::Other,
            other => panic!("unreachable test message tag {other}"),
        }
    }

    fn encoded(&self) -> &[u8] {
        &self.payload
    }

    fn unsubscribe_target(&self) -> Option<u64> {
        if self.tag == TAG_UNSUBSCRIBE {
            Some(self.target)
        } else {
            None
        }
    }
}

/// A delivered result, carrying nothing but its encoded bytes.
struct DeliveredMessage(Vec<u8>);

impl Message for DeliveredMessage {
    fn message_type(&self) -> MessageType {
        MessageType::Publish
    }

    fn encoded(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Published(Vec<u8>),
    Persisted(Vec<u8>),
    Subscribed { mid: u64 },
    Queried { id: u64 },
    Listed { id: u64 },
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subs: HashMap<u64, (CancellationToken, DeliveryCallback)>,
    queries: HashMap<u64, DeliveryCallback>,
    lists: HashMap<u64, ListCallback>,
    published: Vec<Vec<u8>>,
    persisted: Vec<Vec<u8>>,
}

/// A `RouterCore` double driven entirely by the test: every subscribe,
/// query, or list registration is held open until the test explicitly
/// delivers to it (or the session's cancellation token fires).
pub struct FakeCore {
    inner: std::sync::Mutex<Inner>,
    events: mpsc::UnboundedSender<Event>,
}

impl FakeCore {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self { inner: std::sync::Mutex::new(Inner::default()), events: tx }),
            rx,
        )
    }

    fn next_id(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        inner.next_id
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn persisted(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().persisted.clone()
    }

    pub fn subscription_is_live(&self, mid: u64) -> bool {
        self.inner.lock().unwrap().subs.contains_key(&mid)
    }

    /// Delivers one result to a live subscription, or `None` to end it.
    pub fn deliver_subscription(&self, mid: u64, payload: Option<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        let live = match inner.subs.get(&mid) {
            Some((ctx, _)) if ctx.is_cancelled() => false,
            Some(_) => true,
            None => return,
        };
        if !live {
            inner.subs.remove(&mid);
            return;
        }
        if let Some((_, cb)) = inner.subs.get(&mid) {
            cb(payload.map(|p| Box::new(DeliveredMessage(p)) as Box<dyn Message>));
        }
    }

    pub fn deliver_query(&self, id: u64, payload: Option<Vec<u8>>) {
        let inner = self.inner.lock().unwrap();
        if let Some(cb) = inner.queries.get(&id) {
            cb(payload.map(|p| Box::new(DeliveredMessage(p)) as Box<dyn Message>));
        }
    }

    pub fn deliver_list(&self, id: u64, uri: Option<&str>) {
        let inner = self.inner.lock().unwrap();
        if let Some(cb) = inner.lists.get(&id) {
            match uri {
                Some(u) => cb(Some(u), true),
                None => cb(None, false),
            }
        }
    }
}

impl RouterCore for FakeCore {
    fn load_message(&self, bytes: &[u8]) -> Result<Box<dyn Message>, String> {
        if bytes.len() < 10 {
            return Err("frame body is too short to be a message".to_string());
        }
        let tag = bytes[0];
        if tag > TAG_OTHER {
            return Err(format!("unknown message tag {tag}"));
        }
        let mut target_buf = [0u8; 8];
        target_buf.copy_from_slice(&bytes[1..9]);
        let target = u64::from_le_bytes(target_buf);
        // bytes[9] is the sentinel; kept as part of the payload so
        // `verify_affinity`/`verify` (which only see `&dyn Message`) can
        // read it back out of `encoded()`.
        let payload = bytes[9..].to_vec();
        Ok(Box::new(FakeMessage { tag, target, payload }))
    }

    fn verify_affinity(&self, msg: &dyn Message) -> Result<(), String> {
        match msg.encoded().first() {
            Some(&SENTINEL_AFFINITY_FAIL) => Err("message does not belong to this router".to_string()),
            _ => Ok(()),
        }
    }

    fn verify(&self, msg: &dyn Message) -> Result<(), (StatusCode, String)> {
        match msg.encoded().first() {
            Some(&SENTINEL_VERIFY_FAIL) => {
                Err((StatusCode::Verifier(900), "signature chain does not terminate".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn publish(&self, msg: Box<dyn Message>) {
        let payload = msg.encoded().to_vec();
        self.inner.lock().unwrap().published.push(payload.clone());
        let _ = self.events.send(Event::Published(payload));
    }

    fn persist(&self, msg: Box<dyn Message>) {
        let payload = msg.encoded().to_vec();
        self.inner.lock().unwrap().persisted.push(payload.clone());
        let _ = self.events.send(Event::Persisted(payload));
    }

    fn unsubscribe(&self, umid: u64) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.subs.remove(&umid).is_some() {
            Ok(())
        } else {
            Err(format!("no subscription with id {umid}"))
        }
    }

    fn subscribe(
        &self,
        ctx: CancellationToken,
        _msg: Box<dyn Message>,
        callback: DeliveryCallback,
    ) -> SubscriptionId {
        let mid = self.next_id();
        self.inner.lock().unwrap().subs.insert(mid, (ctx, callback));
        let _ = self.events.send(Event::Subscribed { mid });
        SubscriptionId { mid, sig: mid.wrapping_add(1) }
    }

    fn query(&self, _msg: Box<dyn Message>, callback: DeliveryCallback) {
        let id = self.next_id();
        self.inner.lock().unwrap().queries.insert(id, callback);
        let _ = self.events.send(Event::Queried { id });
    }

    fn list(&self, _msg: Box<dyn Message>, callback: ListCallback) {
        let id = self.next_id();
        self.inner.lock().unwrap().lists.insert(id, callback);
        let _ = self.events.send(Event::Listed { id });
    }
}

/// Accepts any server certificate. Only ever used by this test harness's
/// client connector, against a server we just minted ourselves.
struct AcceptAnyCert;

impl rustls::client::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// Binds a `PeerServer` on an OS-assigned loopback port, backed by a
/// fresh `FakeCore`, and returns everything a test needs to drive it.
pub async fn spawn_server() -> (SocketAddr, Arc<FakeCore>, mpsc::UnboundedReceiver<Event>, CancellationToken) {
    let (core, events) = FakeCore::new();
    let router_key = KeyPair::generate().expect("generate router key");
    let log = log::root_logger();
    let any_port: SocketAddr = "127.0.0.1:0".parse().unwrap();

    let server = PeerServer::bind(any_port, &router_key, core.clone(), log)
        .await
        .expect("bind peer server");
    let addr = server.local_addr().expect("peer server local address");
    let shutdown = server.shutdown_token();
    tokio::spawn(server.serve());
    (addr, core, events, shutdown)
}

pub struct TestClient {
    stream: Mutex<TlsStream<TcpStream>>,
    pub proof: [u8; 96],
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let tcp = TcpStream::connect(addr).await.expect("connect to peer server");

        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        config.enable_sni = false;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = rustls::ServerName::IpAddress(addr.ip());

        let mut tls = connector.connect(server_name, tcp).await.expect("tls handshake");

        let mut proof = [0u8; 96];
        tls.read_exact(&mut proof).await.expect("read identity proof");

        Self { stream: Mutex::new(tls), proof }
    }

    pub async fn send(&self, seqno: u64, command: Command, body: Vec<u8>) {
        let frame = Frame::new(seqno, command, body);
        let header = frame.header.to_bytes();
        let mut stream = self.stream.lock().await;
        stream.write_all(&header[..]).await.expect("write header");
        stream.write_all(&frame.body[..]).await.expect("write body");
        stream.flush().await.expect("flush");
    }

    pub async fn recv(&self) -> (FrameHeader, Vec<u8>) {
        let mut stream = self.stream.lock().await;
        let mut hdr_buf = [0u8; FrameHeader::LENGTH];
        stream.read_exact(&mut hdr_buf).await.expect("read header");
        let header = FrameHeader::deserialize_from(&hdr_buf[..]).expect("decode header");
        let mut body = vec![0u8; header.length as usize];
        stream.read_exact(&mut body).await.expect("read body");
        (header, body)
    }
}
