//! Ed25519 signing primitives used to bind a peer's transport certificate
//! to its long-term router identity.

use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair as _};

use crate::router::error::*;

/// The length, in bytes, of a router's verifying (public) key.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// The length, in bytes, of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// A router's long-term Ed25519 key pair.
///
/// Generated once per process and shared behind an `Arc` by every
/// connection that needs to mint a proof-of-identity blob.
pub struct KeyPair {
    inner: Ed25519KeyPair,
}

/// The public half of a `KeyPair`.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PublicKey([u8; VERIFYING_KEY_LENGTH]);

/// A detached Ed25519 signature.
#[derive(Copy, Clone)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .simple(ErrorKind::Identity)?;
        let inner = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .simple(ErrorKind::Identity)?;
        Ok(Self { inner })
    }

    /// Reconstructs a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let inner = Ed25519KeyPair::from_seed_unchecked(seed)
            .simple(ErrorKind::Identity)?;
        Ok(Self { inner })
    }

    /// Returns the public half of this key pair.
    pub fn public_key(&self) -> PublicKey {
        let mut buf = [0; VERIFYING_KEY_LENGTH];
        buf.copy_from_slice(self.inner.public_key().as_ref());
        PublicKey(buf)
    }

    /// Signs an arbitrary blob of bytes, e.g. the signature bytes carried
    /// by a self-signed transport certificate.
    pub fn sign(&self, blob: &[u8]) -> Signature {
        let sig = self.inner.sign(blob);
        let mut buf = [0; SIGNATURE_LENGTH];
        buf.copy_from_slice(sig.as_ref());
        Signature(buf)
    }
}

impl PublicKey {
    /// Formats this key as URL-safe base64 without padding, the form used
    /// as the transport certificate's subject common name.
    pub fn fmt_key(&self) -> String {
        base64_url_unpadded(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.0
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != VERIFYING_KEY_LENGTH {
            return Err("verifying key has an invalid length")
                .wrapped(ErrorKind::Identity);
        }
        let mut buf = [0; VERIFYING_KEY_LENGTH];
        buf.copy_from_slice(raw);
        Ok(Self(buf))
    }

    /// Verifies a signature produced by the matching secret key over `blob`.
    pub fn verify(&self, blob: &[u8], sig: &Signature) -> bool {
        let key = signature::UnparsedPublicKey::new(&signature::ED25519, &self.0[..]);
        key.verify(blob, &sig.0[..]).is_ok()
    }
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != SIGNATURE_LENGTH {
            return Err("signature has an invalid length")
                .wrapped(ErrorKind::Identity);
        }
        let mut buf = [0; SIGNATURE_LENGTH];
        buf.copy_from_slice(raw);
        Ok(Self(buf))
    }
}

/// Minimal URL-safe, unpadded base64 encoder — avoids pulling in the
/// `base64` crate for a single call site with a fixed-width input.
fn base64_url_unpadded(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut out = String::with_capacity((bytes.len() * 4 + 2) / 3);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[((n >> 6) & 0x3f) as usize] as char);
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(n & 0x3f) as usize] as char);
        }
    }
    out
}
