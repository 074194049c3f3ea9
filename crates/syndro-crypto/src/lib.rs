//! X25519 key exchange, AES-256-GCM chunk framing, and streaming SHA-256,
//! the cryptographic channel underneath every transfer.

mod error;
mod hash;
mod keys;
mod nonce;

pub use error::CryptoError;
pub use hash::{hash_file, hash_string, transfer_id};
pub use keys::{derive, new_key_pair};
pub use nonce::NonceTracker;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use std::sync::Mutex;

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const MIN_FRAME_SIZE: usize = NONCE_SIZE + TAG_SIZE;
pub const MAX_CHUNK_SIZE: usize = 100 * 1024 * 1024;

/// A per-session encryption channel bound to one shared secret. Tracks its
/// own nonce history so no 12-byte nonce is ever reused under this secret.
pub struct Channel {
    cipher: Aes256Gcm,
    nonces: Mutex<NonceTracker>,
}

impl Channel {
    pub fn new(secret: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret)),
            nonces: Mutex::new(NonceTracker::new()),
        }
    }

    /// Encrypts `plaintext`, framing the output as `nonce(12) || ciphertext || tag(16)`.
    pub fn encrypt_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = {
            let mut tracker = self.nonces.lock().expect("nonce tracker poisoned");
            if tracker.is_exhausted() {
                return Err(CryptoError::NonceLimitExhausted);
            }
            let mut candidate = [0u8; NONCE_SIZE];
            loop {
                rand::rng().fill_bytes(&mut candidate);
                if tracker.try_record(candidate) {
                    break;
                }
            }
            candidate
        };
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a framed record produced by [`Channel::encrypt_chunk`].
    pub fn decrypt_chunk(&self, framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if framed.len() < MIN_FRAME_SIZE {
            return Err(CryptoError::Malformed);
        }
        if framed.len() > MAX_CHUNK_SIZE {
            return Err(CryptoError::Oversized);
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Chunkwise [`Channel::encrypt_chunk`] over a plaintext chunk stream.
    pub fn encrypt_stream<S>(
        self: std::sync::Arc<Self>,
        input: S,
    ) -> impl futures_util::Stream<Item = Result<Vec<u8>, CryptoError>>
    where
        S: futures_util::Stream<Item = std::io::Result<Vec<u8>>>,
    {
        async_stream::stream! {
            futures_util::pin_mut!(input);
            while let Some(chunk) = futures_util::StreamExt::next(&mut input).await {
                match chunk {
                    Ok(plaintext) => yield self.encrypt_chunk(&plaintext),
                    Err(e) => yield Err(CryptoError::Io(e)),
                }
            }
        }
    }

    /// Chunkwise [`Channel::decrypt_chunk`] over a ciphertext frame stream.
    pub fn decrypt_stream<S>(
        self: std::sync::Arc<Self>,
        input: S,
    ) -> impl futures_util::Stream<Item = Result<Vec<u8>, CryptoError>>
    where
        S: futures_util::Stream<Item = std::io::Result<Vec<u8>>>,
    {
        async_stream::stream! {
            futures_util::pin_mut!(input);
            while let Some(frame) = futures_util::StreamExt::next(&mut input).await {
                match frame {
                    Ok(framed) => yield self.decrypt_chunk(&framed),
                    Err(e) => yield Err(CryptoError::Io(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret() -> [u8; 32] {
        let (a, _) = new_key_pair();
        let (_, b_pub) = new_key_pair();
        derive(&a, &b_pub).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let channel = Channel::new(&test_secret());
        let plaintext = b"hello world!!";
        let framed = channel.encrypt_chunk(plaintext).unwrap();
        assert_eq!(framed.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
        let decrypted = channel.decrypt_chunk(&framed).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_rejects_too_short_input() {
        let channel = Channel::new(&test_secret());
        assert!(matches!(
            channel.decrypt_chunk(&[0u8; 10]),
            Err(CryptoError::Malformed)
        ));
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let channel = Channel::new(&test_secret());
        let mut framed = channel.encrypt_chunk(b"sensitive data").unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        assert!(matches!(
            channel.decrypt_chunk(&framed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let channel_a = Channel::new(&test_secret());
        let channel_b = Channel::new(&test_secret());
        let framed = channel_a.encrypt_chunk(b"secret").unwrap();
        assert!(channel_b.decrypt_chunk(&framed).is_err());
    }

    #[test]
    fn ecdh_is_symmetric() {
        let (a_priv, a_pub) = new_key_pair();
        let (b_priv, b_pub) = new_key_pair();
        assert_eq!(derive(&a_priv, &b_pub).unwrap(), derive(&b_priv, &a_pub).unwrap());
    }

    #[test]
    fn derive_rejects_wrong_length_public_key() {
        let (a_priv, _) = new_key_pair();
        assert!(matches!(
            derive(&a_priv, &[0u8; 31]),
            Err(CryptoError::InvalidPublicKey)
        ));
    }
}
