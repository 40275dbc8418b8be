//! Deterministic secret hierarchy: one master secret per identity, one
//! agent secret per nonce, one public commitment per agent secret.

use sha2::{Digest, Sha256};

use crate::{fr_from_bytes, fr_to_bytes, hash, reduce_be_bytes_to_fr, FieldError, Fr};

/// Upper bound of the agent nonce space scanned during discovery.
pub const MAX_AGENTS: u32 = 16;

/// Secret and commitment for one agent index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentKeys {
    /// Private witness for the ownership proof. Never leaves the client.
    pub secret: Fr,
    /// `hash(secret)`, the only agent-identifying value that may go
    /// on-chain or to a remote service in private mode.
    pub commitment: Fr,
}

/// Derive the per-identity master secret from a wallet signature over a
/// fixed message.
///
/// The signature is digested with SHA-256 and the first 31 digest bytes are
/// folded big-endian into the field, so the result always fits below the
/// BN254 scalar modulus without reduction bias. A corrupted signature yields
/// a different, non-matching master secret rather than an error.
pub fn derive_master(signature: &[u8]) -> Fr {
    let digest = Sha256::digest(signature);
    reduce_be_bytes_to_fr(&digest[..31])
}

/// Derive the agent secret and commitment for one nonce.
///
/// Deterministic: the same `(master, nonce)` always yields the same pair,
/// which is what makes cross-device recovery possible without any
/// server-held state.
pub fn derive_agent(master: &Fr, nonce: u32) -> AgentKeys {
    let secret = hash(&[*master, Fr::from(u64::from(nonce))])
        .expect("poseidon supports two inputs");
    let commitment = hash(&[secret]).expect("poseidon supports one input");
    AgentKeys { secret, commitment }
}

/// 32-byte big-endian commitment encoding used for on-chain matching.
pub fn commitment_to_bytes(commitment: &Fr) -> [u8; 32] {
    fr_to_bytes(commitment)
}

/// Strict decode of an on-chain commitment.
pub fn commitment_from_bytes(bytes: &[u8; 32]) -> Result<Fr, FieldError> {
    fr_from_bytes(bytes)
}
