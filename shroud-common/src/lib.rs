use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use num_bigint::BigUint;

pub mod secrets;

/// Scalar field of BN254, the field the proof system's circuits operate in.
pub type Fr = ark_bn254::Fr;

/// Width of the on-chain commitment encoding.
pub const COMMITMENT_SIZE: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("poseidon does not support {0} inputs")]
    UnsupportedArity(usize),
    #[error("byte encoding is not a canonical field element")]
    NonCanonical,
}

/// Poseidon over BN254 with circom-compatible parameters.
///
/// This is the one hash shared with the arithmetic circuit; every derivation
/// and commitment in the system goes through it. The parameters are fixed by
/// the circuit artifact, so any change here breaks every proof.
pub fn hash(inputs: &[Fr]) -> Result<Fr, FieldError> {
    let mut poseidon =
        Poseidon::<Fr>::new_circom(inputs.len()).map_err(|_| FieldError::UnsupportedArity(inputs.len()))?;
    Ok(poseidon
        .hash(inputs)
        .expect("input length matches the poseidon width by construction"))
}

/// Fixed 32-byte big-endian encoding used for on-chain storage and matching.
pub fn fr_to_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}

/// Strict inverse of [`fr_to_bytes`]: rejects non-canonical (>= modulus)
/// encodings instead of silently reducing them.
pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr, FieldError> {
    let value = BigUint::from_bytes_be(bytes);
    let modulus = BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be());
    if value >= modulus {
        return Err(FieldError::NonCanonical);
    }
    Ok(Fr::from_be_bytes_mod_order(bytes))
}

/// Fold an arbitrary big-endian byte string into the field by modular
/// reduction. Used where the input is not required to be canonical.
pub fn reduce_be_bytes_to_fr(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}
