//! Web Push message encryption (RFC 8291, `aes128gcm` content coding).
//!
//! A push message is encrypted for one browser subscription using:
//! - an ephemeral P-256 key pair generated per message,
//! - ECDH with the subscription's `p256dh` public key,
//! - HKDF-SHA256 keyed with the subscription's 16-byte `auth` secret,
//! - AES-128-GCM over a single record.
//!
//! The output body is: salt (16) || record size (u32 BE) || key id length (1)
//! || ephemeral public key (65) || ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::{
    agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, ECDH_P256},
    hkdf,
    rand::{SecureRandom, SystemRandom},
};

/// Length of an uncompressed P-256 public key
pub const PUBLIC_KEY_LENGTH: usize = 65;

/// Length of the subscription auth secret
pub const AUTH_SECRET_LENGTH: usize = 16;

const SALT_LENGTH: usize = 16;
const TAG_LENGTH: usize = 16;

/// Record size advertised in the header. The whole message fits in one record.
const RECORD_SIZE: u32 = 4096;

/// Header: salt + rs + idlen + keyid
const HEADER_LENGTH: usize = SALT_LENGTH + 4 + 1 + PUBLIC_KEY_LENGTH;

/// Largest plaintext that keeps the body within the 4096 bytes push services accept
pub const MAX_PLAINTEXT_LENGTH: usize = RECORD_SIZE as usize - HEADER_LENGTH - TAG_LENGTH - 1;

/// Padding delimiter for the last (only) record
const LAST_RECORD_DELIMITER: u8 = 0x02;

struct Len(usize);

impl hkdf::KeyType for Len {
    fn len(&self) -> usize {
        self.0
    }
}

fn hkdf_expand(prk: &hkdf::Prk, info: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    prk.expand(&[info], Len(len))
        .and_then(|okm| okm.fill(&mut out))
        .map_err(|_| anyhow!("HKDF expand failed"))?;
    Ok(out)
}

/// Content encryption key and nonce for one message
struct ContentKeys {
    cek: Vec<u8>,
    nonce: Vec<u8>,
}

fn derive_content_keys(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> Result<ContentKeys> {
    let prk_key = hkdf::Salt::new(hkdf::HKDF_SHA256, auth_secret).extract(ecdh_secret);

    let mut key_info = Vec::with_capacity(14 + PUBLIC_KEY_LENGTH * 2);
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);
    let ikm = hkdf_expand(&prk_key, &key_info, 32)?;

    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(&ikm);
    Ok(ContentKeys {
        cek: hkdf_expand(&prk, b"Content-Encoding: aes128gcm\0", 16)?,
        nonce: hkdf_expand(&prk, b"Content-Encoding: nonce\0", 12)?,
    })
}

/// Decode a base64url key as browsers hand them out (padding optional)
pub fn decode_key(value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .context("Key is not valid base64url")
}

/// Encrypt `plaintext` for a subscription.
///
/// # Arguments
/// * `ua_public` - the subscription's `p256dh` key, 65 bytes uncompressed
/// * `auth_secret` - the subscription's `auth` secret, 16 bytes
/// * `plaintext` - the message, at most [`MAX_PLAINTEXT_LENGTH`] bytes
///
/// # Returns
/// The request body to POST to the push endpoint with `Content-Encoding: aes128gcm`.
pub fn encrypt(ua_public: &[u8], auth_secret: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if ua_public.len() != PUBLIC_KEY_LENGTH || ua_public[0] != 0x04 {
        return Err(anyhow!("p256dh must be an uncompressed P-256 point"));
    }
    if auth_secret.len() != AUTH_SECRET_LENGTH {
        return Err(anyhow!("auth secret must be {} bytes", AUTH_SECRET_LENGTH));
    }
    if plaintext.len() > MAX_PLAINTEXT_LENGTH {
        return Err(anyhow!(
            "payload of {} bytes exceeds the {} byte limit",
            plaintext.len(),
            MAX_PLAINTEXT_LENGTH
        ));
    }

    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LENGTH];
    rng.fill(&mut salt).map_err(|_| anyhow!("Failed to generate salt"))?;

    let as_private = EphemeralPrivateKey::generate(&ECDH_P256, &rng)
        .map_err(|_| anyhow!("Failed to generate ephemeral key"))?;
    let as_public = as_private
        .compute_public_key()
        .map_err(|_| anyhow!("Failed to compute ephemeral public key"))?;

    let ecdh_secret = agreement::agree_ephemeral(
        as_private,
        &UnparsedPublicKey::new(&ECDH_P256, ua_public),
        |secret| secret.to_vec(),
    )
    .map_err(|_| anyhow!("ECDH key agreement failed"))?;

    let keys = derive_content_keys(&ecdh_secret, auth_secret, ua_public, as_public.as_ref(), &salt)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);

    let cipher = Aes128Gcm::new_from_slice(&keys.cek).context("Failed to create cipher")?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&keys.nonce), record.as_slice())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut body = Vec::with_capacity(HEADER_LENGTH + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LENGTH as u8);
    body.extend_from_slice(as_public.as_ref());
    body.extend_from_slice(&ciphertext);
    Ok(body)
}
