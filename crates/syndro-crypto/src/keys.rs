use crate::error::CryptoError;
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// Generates a new X25519 keypair. `pub` is 32 bytes.
pub fn new_key_pair() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

/// Performs the ECDH step, producing the 32-byte shared secret for a new
/// [`crate::Channel`]. Establishing a fresh secret implies fresh nonce
/// bookkeeping, since callers always build a new `Channel` around the
/// returned secret.
pub fn derive(our_priv: &[u8; 32], their_pub: &[u8]) -> Result<[u8; 32], CryptoError> {
    let their_pub: [u8; 32] = their_pub
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let secret = StaticSecret::from(*our_priv);
    let their_pub = PublicKey::from(their_pub);
    Ok(secret.diffie_hellman(&their_pub).to_bytes())
}
