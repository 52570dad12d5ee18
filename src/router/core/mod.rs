//! The seam between the peer session protocol and the message
//! verification/routing core.
//!
//! Everything in this module is a consumed interface: the real
//! implementations of `publish`, `persist`, `subscribe`, `unsubscribe`,
//! `query`, `list`, affinity checking, and message verification live
//! outside this crate's scope. What's defined here is only the shape the
//! session dispatcher needs to drive them.

use tokio_util::sync::CancellationToken;

use crate::router::communication::message::StatusCode;

/// The type of a decoded message, as needed to pick a dispatcher branch.
///
/// `Other` covers any message type this crate doesn't recognize — the
/// routing core's own type space is open-ended, unlike this enum, so a
/// value it can't map onto one of the named variants still needs a
/// branch to land on instead of being unrepresentable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MessageType {
    Publish,
    Persist,
    Unsubscribe,
    Subscribe,
    Tap,
    Query,
    TapQuery,
    List,
    Other,
}

/// A decoded, opaque message. Routing and verification are delegated to
/// the injected `RouterCore`; this crate only needs enough of the shape
/// to drive the dispatcher and to re-emit the message's encoded bytes in
/// `Result` frames.
pub trait Message: Send + Sync {
    fn message_type(&self) -> MessageType;

    /// The message's own encoded bytes, reused verbatim as a `Result`
    /// frame body for subscribe/query/tap deliveries.
    fn encoded(&self) -> &[u8];

    /// Present only on `Unsubscribe` messages: the target subscription's
    /// message id.
    fn unsubscribe_target(&self) -> Option<u64> {
        None
    }

    /// Best-effort diagnostic context logged (at `debug` level) when
    /// verification fails — mirrors the PAC giver/receiver/origin VK
    /// dump in the original implementation. Not sent to the peer.
    fn diagnostic_context(&self) -> String {
        String::new()
    }
}

/// A subscription identifier: a message id and a signature id, together
/// forming the 16-byte body of a `SubscriptionAck` frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SubscriptionId {
    pub mid: u64,
    pub sig: u64,
}

/// Invoked once per delivered message on a subscription or query; `None`
/// signals completion — exactly one `End` frame follows.
pub type DeliveryCallback = Box<dyn Fn(Option<Box<dyn Message>>) + Send + Sync>;

/// Invoked once per listed URI; `ok = false` signals completion.
pub type ListCallback = Box<dyn Fn(Option<&str>, bool) + Send + Sync>;

/// The capability set the session dispatcher consumes from the message
/// verification and routing core.
pub trait RouterCore: Send + Sync + 'static {
    /// Parses `bytes` into a `Message`, or reports why it couldn't.
    fn load_message(&self, bytes: &[u8]) -> Result<Box<dyn Message>, String>;

    /// Checks that this router is the correct destination/origin for
    /// `msg`, failing fast on misrouted traffic before the (more
    /// expensive) cryptographic verification step.
    fn verify_affinity(&self, msg: &dyn Message) -> Result<(), String>;

    /// Cryptographically verifies `msg`, returning the verifier's own
    /// status code and a human-readable reason on failure.
    fn verify(&self, msg: &dyn Message) -> Result<(), (StatusCode, String)>;

    /// Fire-and-forget: hand a published message to the routing core.
    fn publish(&self, msg: Box<dyn Message>);

    /// Fire-and-forget: hand a persisted message to the routing core.
    fn persist(&self, msg: Box<dyn Message>);

    /// Cancels a previously registered subscription.
    fn unsubscribe(&self, umid: u64) -> Result<(), String>;

    /// Registers a streaming subscription (or tap, which is
    /// protocol-identical at this layer). `ctx` is the session's
    /// cancellation token; the core must stop invoking `callback` once
    /// `ctx` is cancelled.
    fn subscribe(
        &self,
        ctx: CancellationToken,
        msg: Box<dyn Message>,
        callback: DeliveryCallback,
    ) -> SubscriptionId;

    /// Issues a one-shot query (or tap-query); `callback` streams
    /// results and is invoked one final time with `None` on completion.
    fn query(&self, msg: Box<dyn Message>, callback: DeliveryCallback);

    /// Lists matching URIs; `callback` streams results and is invoked one
    /// final time with `(None, false)` on completion.
    fn list(&self, msg: Box<dyn Message>, callback: ListCallback);
}
