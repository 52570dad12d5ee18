//! The per-connection session: frame dispatcher and write serialization.
//!
//! After the listener (`router::communication::server`) completes the TLS
//! handshake and writes the 96-byte proof, it hands the stream to
//! `Session::run`. From there on, this module owns the connection for its
//! entire lifetime: reading frames, spawning a handler per frame, and
//! serializing every response back onto the one socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::router::communication::message::{
    status_body, subscription_ack_body, Command, Frame, FrameHeader, StatusCode,
};
use crate::router::communication::socket::SecureSocket;
use crate::router::core::{Message, MessageType, RouterCore};
use crate::router::log::Logger;

/// Write deadline enforced on every individual write syscall, so a peer
/// that stops reading can't hold a frame's write open indefinitely.
const WRITE_DEADLINE: Duration = Duration::from_secs(60);

/// Serializes writes onto the connection's socket.
///
/// Invariant: the bytes of no two frames ever interleave on the wire.
/// Enforced by holding the mutex across both the header write and the
/// body write of a single frame.
struct FrameWriter {
    half: AsyncMutex<WriteHalf<SecureSocket>>,
    ctx: CancellationToken,
}

impl FrameWriter {
    fn new(half: WriteHalf<SecureSocket>, ctx: CancellationToken) -> Self {
        Self { half: AsyncMutex::new(half), ctx }
    }

    /// Writes one frame. On any write error or deadline expiry the
    /// session is torn down: the caller observes this by checking
    /// `ctx.is_cancelled()` is not required — cancellation is triggered
    /// here, directly, so every other write attempt in flight also sees
    /// the same terminal state on its next poll.
    async fn write_frame(&self, frame: Frame) {
        if self.ctx.is_cancelled() {
            return;
        }

        let header_bytes = frame.header.to_bytes();
        let mut half = self.half.lock().await;

        let write_both = async {
            half.write_all(&header_bytes[..]).await?;
            half.write_all(&frame.body[..]).await?;
            half.flush().await
        };

        match timeout(WRITE_DEADLINE, write_both).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                // write error or deadline: tear the session down. All
                // in-flight handlers, including subscription callbacks
                // that will later attempt to write, observe cancellation
                // on their next check and stop.
                self.ctx.cancel();
            }
        }
    }

    async fn send_status(&self, seqno: u64, code: StatusCode, reason: &str) {
        self.write_frame(Frame::new(seqno, Command::Status, status_body(code, reason)))
            .await;
    }

    async fn send_subscription_ack(&self, seqno: u64, mid: u64, sig: u64) {
        self.write_frame(Frame::new(
            seqno,
            Command::SubscriptionAck,
            subscription_ack_body(StatusCode::Okay, mid, sig),
        ))
        .await;
    }

    async fn send_result(&self, seqno: u64, body: Vec<u8>) {
        self.write_frame(Frame::new(seqno, Command::Result, body)).await;
    }

    async fn send_end(&self, seqno: u64) {
        self.write_frame(Frame::new(seqno, Command::End, Vec::new())).await;
    }
}

/// A live peer connection: the read half (owned solely by the dispatch
/// loop), the shared write half, the session's cancellation root, and the
/// injected routing/verification core.
pub struct Session {
    peer_id: String,
    read_half: ReadHalf<SecureSocket>,
    writer: Arc<FrameWriter>,
    ctx: CancellationToken,
    core: Arc<dyn RouterCore>,
    log: Logger,
}

impl Session {
    pub fn new(
        peer_id: String,
        socket: SecureSocket,
        parent_ctx: &CancellationToken,
        core: Arc<dyn RouterCore>,
        log: Logger,
    ) -> Self {
        let ctx = parent_ctx.child_token();
        let (read_half, write_half) = tokio::io::split(socket);
        let writer = Arc::new(FrameWriter::new(write_half, ctx.clone()));
        Self { peer_id, read_half, writer, ctx, core, log }
    }

    /// Runs the dispatcher loop until the connection ends, for any
    /// reason: a read error, EOF, or a write failure observed by the
    /// shared `FrameWriter`. On exit, cancels the session's token so
    /// every subscription registered under it unregisters.
    pub async fn run(mut self) {
        slog::info!(self.log, "peer connected"; "peer" => &self.peer_id);

        loop {
            if self.ctx.is_cancelled() {
                break;
            }

            let frame = tokio::select! {
                biased;
                _ = self.ctx.cancelled() => break,
                frame = read_frame(&mut self.read_half) => frame,
            };

            let (header, body) = match frame {
                Ok(pair) => pair,
                Err(_) => break,
            };

            let writer = self.writer.clone();
            let core = self.core.clone();
            let ctx = self.ctx.clone();
            let log = self.log.clone();

            tokio::spawn(async move {
                dispatch(header, body, writer, core, ctx, log).await;
            });
        }

        self.ctx.cancel();
        slog::info!(self.log, "peer disconnected"; "peer" => &self.peer_id);
    }
}

async fn read_frame(
    half: &mut ReadHalf<SecureSocket>,
) -> std::io::Result<(FrameHeader, Vec<u8>)> {
    let mut hdr_buf = [0u8; FrameHeader::LENGTH];
    half.read_exact(&mut hdr_buf[..]).await?;
    let header = FrameHeader::deserialize_from(&hdr_buf[..])
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let mut body = vec![0u8; header.length as usize];
    half.read_exact(&mut body[..]).await?;
    Ok((header, body))
}

async fn dispatch(
    header: FrameHeader,
    body: Vec<u8>,
    writer: Arc<FrameWriter>,
    core: Arc<dyn RouterCore>,
    ctx: CancellationToken,
    log: Logger,
) {
    let seqno = header.seqno;

    match Command::from_u8(header.command) {
        Some(Command::Message) => handle_message(seqno, body, writer, core, ctx, log).await,
        _ => {
            writer
                .send_status(seqno, StatusCode::BadOperation, "what command is this?")
                .await;
        }
    }
}

async fn handle_message(
    seqno: u64,
    body: Vec<u8>,
    writer: Arc<FrameWriter>,
    core: Arc<dyn RouterCore>,
    ctx: CancellationToken,
    log: Logger,
) {
    let msg = match core.load_message(&body) {
        Ok(msg) => msg,
        Err(reason) => {
            writer
                .send_status(seqno, StatusCode::MalformedMessage, &reason)
                .await;
            return;
        }
    };

    if let Err(reason) = core.verify_affinity(msg.as_ref()) {
        writer
            .send_status(seqno, StatusCode::AffinityMismatch, &reason)
            .await;
        return;
    }

    if let Err((code, reason)) = core.verify(msg.as_ref()) {
        slog::debug!(
            log, "message failed verification";
            "reason" => &reason,
            "context" => msg.diagnostic_context(),
        );
        writer.send_status(seqno, code, &reason).await;
        return;
    }

    match msg.message_type() {
        MessageType::Publish => {
            writer.send_status(seqno, StatusCode::Okay, "").await;
            core.publish(msg);
        }
        MessageType::Persist => {
            writer.send_status(seqno, StatusCode::Okay, "").await;
            core.persist(msg);
        }
        MessageType::Unsubscribe => {
            let target = msg.unsubscribe_target().unwrap_or(0);
            match core.unsubscribe(target) {
                Ok(()) => writer.send_status(seqno, StatusCode::Okay, "").await,
                Err(reason) => {
                    writer
                        .send_status(seqno, StatusCode::UnsubscribeError, &reason)
                        .await
                }
            }
        }
        MessageType::Subscribe | MessageType::Tap => {
            let cb_writer = writer.clone();
            let callback: crate::router::core::DeliveryCallback = Box::new(move |delivered| {
                let writer = cb_writer.clone();
                match delivered {
                    None => {
                        tokio::spawn(async move { writer.send_end(seqno).await });
                    }
                    Some(m) => {
                        let encoded = m.encoded().to_vec();
                        tokio::spawn(async move { writer.send_result(seqno, encoded).await });
                    }
                }
            });
            // the subscription is registered before the ack is sent: a
            // delivery may race ahead of the ack reaching the peer. The
            // ack's only job is to convey the subscription id.
            let sub_id = core.subscribe(ctx.clone(), msg, callback);
            writer
                .send_subscription_ack(seqno, sub_id.mid, sub_id.sig)
                .await;
        }
        MessageType::Query | MessageType::TapQuery => {
            writer.send_status(seqno, StatusCode::Okay, "").await;
            let cb_writer = writer.clone();
            let callback: crate::router::core::DeliveryCallback = Box::new(move |delivered| {
                let writer = cb_writer.clone();
                match delivered {
                    None => {
                        tokio::spawn(async move { writer.send_end(seqno).await });
                    }
                    Some(m) => {
                        let encoded = m.encoded().to_vec();
                        tokio::spawn(async move { writer.send_result(seqno, encoded).await });
                    }
                }
            });
            core.query(msg, callback);
        }
        MessageType::List => {
            writer.send_status(seqno, StatusCode::Okay, "").await;
            let cb_writer = writer.clone();
            let callback: crate::router::core::ListCallback = Box::new(move |uri, ok| {
                let writer = cb_writer.clone();
                if !ok {
                    tokio::spawn(async move { writer.send_end(seqno).await });
                } else {
                    let body = uri.unwrap_or_default().as_bytes().to_vec();
                    tokio::spawn(async move { writer.send_result(seqno, body).await });
                }
            });
            core.list(msg, callback);
        }
        MessageType::Other => {
            writer
                .send_status(seqno, StatusCode::BadOperation, "type mismatch")
                .await;
        }
    }
}
