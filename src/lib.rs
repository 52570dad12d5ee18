//! `bw-peer`: the BOSSWAVE peer session protocol.
//!
//! See `router::communication::server::PeerServer` for the listener
//! entry point, and `router::communication::session::Session` for the
//! per-connection frame dispatcher.

pub mod router;
