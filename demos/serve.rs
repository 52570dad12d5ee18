//! Minimal end-to-end wiring of the peer server against a routing core
//! that does nothing but acknowledge publishes. Real `RouterCore`
//! implementations (verification, subscriptions, queries, listing) live
//! outside this crate's scope.

use std::sync::Arc;

use bw_peer::router::communication::message::StatusCode;
use bw_peer::router::communication::server::PeerServer;
use bw_peer::router::core::{
    DeliveryCallback, ListCallback, Message, MessageType, RouterCore, SubscriptionId,
};
use bw_peer::router::crypto::signature::KeyPair;
use bw_peer::router::log;
use tokio_util::sync::CancellationToken;

struct EchoMessage(Vec<u8>);

impl Message for EchoMessage {
    fn message_type(&self) -> MessageType {
        MessageType::Publish
    }

    fn encoded(&self) -> &[u8] {
        &self.0
    }
}

struct AcceptAllCore;

impl RouterCore for AcceptAllCore {
    fn load_message(&self, bytes: &[u8]) -> Result<Box<dyn Message>, String> {
        Ok(Box::new(EchoMessage(bytes.to_vec())))
    }

    fn verify_affinity(&self, _msg: &dyn Message) -> Result<(), String> {
        Ok(())
    }

    fn verify(&self, _msg: &dyn Message) -> Result<(), (StatusCode, String)> {
        Ok(())
    }

    fn publish(&self, _msg: Box<dyn Message>) {}
    fn persist(&self, _msg: Box<dyn Message>) {}

    fn unsubscribe(&self, _umid: u64) -> Result<(), String> {
        Err("no subscriptions are ever registered by this demo core".into())
    }

    fn subscribe(
        &self,
        _ctx: CancellationToken,
        _msg: Box<dyn Message>,
        _callback: DeliveryCallback,
    ) -> SubscriptionId {
        SubscriptionId { mid: 0, sig: 0 }
    }

    fn query(&self, _msg: Box<dyn Message>, callback: DeliveryCallback) {
        callback(None);
    }

    fn list(&self, _msg: Box<dyn Message>, callback: ListCallback) {
        callback(None, false);
    }
}

#[tokio::main]
async fn main() {
    let log = log::root_logger();
    let router_key = KeyPair::generate().expect("generate router key");
    let addr = "127.0.0.1:28589".parse().unwrap();

    let server = PeerServer::bind(addr, &router_key, Arc::new(AcceptAllCore), log)
        .await
        .expect("bind peer server");

    server.serve().await;
}
