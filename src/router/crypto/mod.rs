//! Cryptographic primitives consumed by the identity-minting step.

#[cfg(feature = "crypto_signature_ring_ed25519")]
pub mod signature;
