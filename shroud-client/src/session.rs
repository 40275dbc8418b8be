//! Master-secret session handling.
//!
//! The master secret exists in plaintext only inside [`MasterKeyCell::with_master`];
//! at rest it is sealed under a random per-session key so long-lived process
//! memory never holds it directly. Dropping the cell (lock, identity
//! switch) zeroizes the session key and with it any way to recover the
//! secret from this process.

use chacha20poly1305::{
    aead::{Aead, NewAead},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use shroud_common::{fr_from_bytes, fr_to_bytes, secrets::derive_master, Fr};
use zeroize::Zeroizing;

const SESSION_NONCE_SIZE: usize = 12;

pub struct MasterKeyCell {
    session_key: Zeroizing<[u8; 32]>,
    nonce: [u8; SESSION_NONCE_SIZE],
    sealed_master: Vec<u8>,
}

impl MasterKeyCell {
    /// Derive the master secret from the unlock signature and seal it for
    /// the lifetime of this session.
    pub fn unlock(signature: &[u8]) -> Self {
        let master = derive_master(signature);
        let plaintext = Zeroizing::new(fr_to_bytes(&master));

        let mut session_key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *session_key);
        let mut nonce = [0u8; SESSION_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*session_key));
        let sealed_master = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .expect("sealing a 32-byte block cannot fail");

        Self {
            session_key,
            nonce,
            sealed_master,
        }
    }

    /// Unseal the master secret for the duration of `f` only.
    pub fn with_master<T>(&self, f: impl FnOnce(&Fr) -> T) -> T {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.session_key));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&self.nonce), self.sealed_master.as_slice())
                .expect("cell contents are sealed by this process"),
        );
        let bytes: [u8; 32] = plaintext
            .as_slice()
            .try_into()
            .expect("sealed master is 32 bytes");
        let master = fr_from_bytes(&bytes).expect("sealed master is canonical");
        f(&master)
    }

    /// Explicit lock; dropping the cell has the same effect.
    pub fn lock(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURE: &[u8] = b"session-test-signature";

    #[test]
    fn unsealed_master_matches_direct_derivation() {
        let cell = MasterKeyCell::unlock(SIGNATURE);
        let expected = derive_master(SIGNATURE);
        assert_eq!(cell.with_master(|master| *master), expected);
        // Repeated access keeps working against the same sealed copy.
        assert_eq!(cell.with_master(|master| *master), expected);
    }

    #[test]
    fn two_sessions_share_the_master_but_not_the_wrapping() {
        let a = MasterKeyCell::unlock(SIGNATURE);
        let b = MasterKeyCell::unlock(SIGNATURE);
        assert_eq!(a.with_master(|m| *m), b.with_master(|m| *m));
        // Fresh session key and nonce per unlock.
        assert_ne!(a.sealed_master, b.sealed_master);
    }

    #[test]
    fn sealed_bytes_do_not_contain_the_master() {
        let cell = MasterKeyCell::unlock(SIGNATURE);
        let master_bytes = fr_to_bytes(&derive_master(SIGNATURE));
        assert!(!cell
            .sealed_master
            .windows(master_bytes.len())
            .any(|window| window == master_bytes));
        cell.lock();
    }
}
