//! Mints the router's one-shot transport identity: a self-signed TLS
//! certificate whose subject is bound to the router's Ed25519 verifying
//! key, plus the 96-byte proof blob peers use to check that binding.

use std::sync::Arc;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    KeyUsagePurpose, PrivatePkcs8KeyDer, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use x509_parser::prelude::FromDer;

use crate::router::crypto::signature::{KeyPair, SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};
use crate::router::error::*;

/// Validity window of a minted transport certificate.
const CERT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The bits of a fresh transport RSA key.
const RSA_KEY_BITS: usize = 2048;

/// The 96-byte proof-of-identity prelude sent unframed as the first bytes
/// on every accepted connection, immediately after the TLS handshake.
///
/// Bytes `[0, 32)` are the router's verifying key; bytes `[32, 96)` are an
/// Ed25519 signature, by the router's signing key, over the raw
/// `signatureValue` bytes carried by the minted transport certificate.
#[derive(Clone)]
pub struct Proof([u8; Proof::LENGTH]);

impl Proof {
    pub const LENGTH: usize = VERIFYING_KEY_LENGTH + SIGNATURE_LENGTH;

    pub fn as_bytes(&self) -> &[u8; Proof::LENGTH] {
        &self.0
    }
}

/// A minted transport identity: the rustls server configuration bound to
/// the self-signed certificate, and the proof blob derived from it.
pub struct Identity {
    pub server_config: Arc<rustls::ServerConfig>,
    pub proof: Proof,
}

/// Mints a fresh transport certificate and signs its signature bytes with
/// `router_key`, producing a complete `Identity`.
///
/// Regenerated on every process start; nothing here is persisted to disk.
/// Any cryptographic failure is treated as fatal by the caller — see
/// `router::communication::server::PeerServer::bind`.
pub fn mint(router_key: &KeyPair) -> Result<Identity> {
    let vk = router_key.public_key();

    let rsa_key = RsaPrivateKey::new(&mut RsaCompatRng, RSA_KEY_BITS)
        .wrapped(ErrorKind::Identity)?;
    let pkcs8_der = rsa_key
        .to_pkcs8_der()
        .wrapped(ErrorKind::Identity)?;
    let key_pair = rcgen::KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(pkcs8_der.as_bytes().to_vec()),
        &PKCS_RSA_SHA256,
    )
    .wrapped(ErrorKind::Identity)?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .wrapped(ErrorKind::Identity)?;

    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, vk.fmt_key());
    params.distinguished_name = name;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + CERT_VALIDITY;

    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.serial_number = Some(SerialNumber::from_slice(&random_serial()));

    let cert = params
        .self_signed(&key_pair)
        .wrapped(ErrorKind::Identity)?;
    let cert_der = cert.der();

    let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert_der.as_ref())
        .wrapped(ErrorKind::Identity)?;
    let cert_signature_bytes = parsed.signature_value.as_ref();

    let sig = router_key.sign(cert_signature_bytes);
    let mut proof = [0u8; Proof::LENGTH];
    proof[..VERIFYING_KEY_LENGTH].copy_from_slice(vk.as_bytes());
    proof[VERIFYING_KEY_LENGTH..].copy_from_slice(sig.as_bytes());

    let rustls_key = rustls::PrivateKey(pkcs8_der.as_bytes().to_vec());
    let rustls_cert = rustls::Certificate(cert_der.as_ref().to_vec());
    let server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![rustls_cert], rustls_key)
        .wrapped(ErrorKind::Tls)?;

    Ok(Identity {
        server_config: Arc::new(server_config),
        proof: Proof(proof),
    })
}

fn random_serial() -> [u8; 16] {
    let mut buf = [0u8; 16];
    OsRng.fill_bytes(&mut buf);
    // top bit clear keeps this a positive INTEGER per X.690 DER encoding
    buf[0] &= 0x7f;
    buf
}

/// Bridges `rand_core`'s `OsRng` to the `rand` 0.8-flavoured
/// `CryptoRng + RngCore` bound the `rsa` crate's keygen expects.
struct RsaCompatRng;

impl rand_core::RngCore for RsaCompatRng {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        OsRng.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        OsRng.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
        OsRng.fill_bytes(dest);
        Ok(())
    }
}

impl rand_core::CryptoRng for RsaCompatRng {}
