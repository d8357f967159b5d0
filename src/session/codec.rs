use anyhow::{anyhow, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

const NONCE_LEN: usize = 12;
const COOKIE_AAD: &[u8] = b"pordisto-cookie:v1";

/// Authenticated encryption for cookie payloads.
///
/// Values are `base64url(nonce || ciphertext)` of the JSON-serialized payload. The
/// key is derived from the configured secret with SHA-256 so any secret length works.
#[derive(Clone)]
pub struct CookieCodec {
    key: [u8; 32],
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec").finish_non_exhaustive()
    }
}

impl CookieCodec {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.expose_secret().as_bytes()).into();
        Self { key }
    }

    /// Serialize and encrypt a payload.
    ///
    /// # Errors
    /// Returns an error if serialization or encryption fails.
    #[allow(deprecated)]
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(value)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: COOKIE_AAD,
                },
            )
            .map_err(|e| anyhow!("Cookie encryption failure: {e}"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(Base64UrlUnpadded::encode_string(&sealed))
    }

    /// Decrypt and deserialize a payload.
    ///
    /// Absence, bad encoding, a failed tag check (tampering or a rotated key) and an
    /// unexpected shape all yield `None`.
    #[allow(deprecated)]
    #[must_use]
    pub fn decode<T: DeserializeOwned>(&self, raw: Option<&str>) -> Option<T> {
        let raw = raw?;
        let sealed = Base64UrlUnpadded::decode_vec(raw).ok()?;
        if sealed.len() <= NONCE_LEN {
            return None;
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = match cipher.decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: COOKIE_AAD,
            },
        ) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                debug!("cookie failed authentication");
                return None;
            }
        };

        serde_json::from_slice(&plaintext).ok()
    }
}
