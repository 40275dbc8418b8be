//! Sealed delivery of the generated delegate key.
//!
//! Ephemeral-sender construction: fresh X25519 key per seal, shared secret
//! hashed with both public keys into a ChaCha20-Poly1305 key, zero nonce
//! (safe because the key is single-use). Only the holder of the one-time
//! recipient secret can open the payload; the relay keeps nothing.

use chacha20poly1305::{
    aead::{Aead, NewAead},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

pub const PUBLIC_KEY_SIZE: usize = 32;
/// Ephemeral public key plus AEAD tag.
pub const SEALED_OVERHEAD: usize = PUBLIC_KEY_SIZE + 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SealError {
    #[error("recipient public key is not a valid exchange key")]
    BadRecipientKey,
    #[error("sealed payload is malformed")]
    Malformed,
    #[error("sealed payload could not be opened")]
    Failed,
}

/// Seal `plaintext` to the holder of `recipient`'s secret key.
pub fn seal(recipient: &[u8; PUBLIC_KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let recipient_key = PublicKey::from(*recipient);
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&recipient_key);
    if !shared.was_contributory() {
        return Err(SealError::BadRecipientKey);
    }

    let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient);
    let cipher = ChaCha20Poly1305::new(&key);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
        .expect("aead encryption of in-memory plaintext cannot fail");

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a payload sealed to `recipient_secret`'s public key.
pub fn open(recipient_secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(SealError::Malformed);
    }
    let mut ephemeral_public = [0u8; PUBLIC_KEY_SIZE];
    ephemeral_public.copy_from_slice(&sealed[..PUBLIC_KEY_SIZE]);

    let shared = recipient_secret.diffie_hellman(&PublicKey::from(ephemeral_public));
    if !shared.was_contributory() {
        return Err(SealError::BadRecipientKey);
    }

    let recipient_public = PublicKey::from(recipient_secret);
    let key = derive_key(
        shared.as_bytes(),
        &ephemeral_public,
        recipient_public.as_bytes(),
    );
    ChaCha20Poly1305::new(&key)
        .decrypt(Nonce::from_slice(&[0u8; 12]), &sealed[PUBLIC_KEY_SIZE..])
        .map_err(|_| SealError::Failed)
}

fn derive_key(shared: &[u8], ephemeral_public: &[u8], recipient_public: &[u8]) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    Key::from(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> (StaticSecret, [u8; 32]) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret, *public.as_bytes())
    }

    #[test]
    fn sealed_payload_opens_only_for_the_recipient() {
        let (secret, public) = recipient();
        let sealed = seal(&public, b"delegate key material").unwrap();
        assert_eq!(open(&secret, &sealed).unwrap(), b"delegate key material");

        let (other_secret, _) = recipient();
        assert_eq!(open(&other_secret, &sealed), Err(SealError::Failed));
    }

    #[test]
    fn tampering_is_detected() {
        let (secret, public) = recipient();
        let mut sealed = seal(&public, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(open(&secret, &sealed), Err(SealError::Failed));
    }

    #[test]
    fn each_seal_uses_a_fresh_ephemeral_key() {
        let (_, public) = recipient();
        let a = seal(&public, b"same plaintext").unwrap();
        let b = seal(&public, b"same plaintext").unwrap();
        assert_ne!(a[..PUBLIC_KEY_SIZE], b[..PUBLIC_KEY_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let (secret, _) = recipient();
        assert_eq!(open(&secret, &[0u8; 10]), Err(SealError::Malformed));
    }

    #[test]
    fn low_order_recipient_key_is_rejected() {
        assert_eq!(
            seal(&[0u8; 32], b"anything"),
            Err(SealError::BadRecipientKey)
        );
    }
}
