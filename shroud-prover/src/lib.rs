//! Ownership proof pipeline.
//!
//! Turns "I know the secret behind commitment C" into a chain-verifiable
//! attestation without the secret ever being serialized, logged, or sent
//! anywhere. The arithmetic circuits are fixed, versioned artifacts owned
//! by the proving toolchain; this crate only drives them and enforces the
//! wire contracts around them.

use std::{sync::Arc, time::Duration};

use shroud_common::{fr_to_bytes, hash, Fr};
use tracing::{debug, info};

pub mod context;
pub mod inner;
pub mod path;

pub use context::ProverContext;
pub use inner::{InnerArtifacts, InnerProver, ToolchainStatus};
pub use path::{ChainAttestation, PathKind, ProofPath};

/// Artifact size contract. These are fixed by the circuit artifacts on both
/// sides of the wire; a mismatch is a hard validation error raised before
/// any expensive proving work.
pub const INNER_VK_FIELD_ELEMENTS: usize = 115;
pub const INNER_PROOF_FIELD_ELEMENTS: usize = 457;
pub const CHAIN_PROOF_SIZE: usize = 324;
pub const WITNESS_HEADER_SIZE: usize = 12;
pub const COMMITMENT_SIZE: usize = 32;
pub const MIN_WITNESS_SIZE: usize = WITNESS_HEADER_SIZE + COMMITMENT_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// Malformed input shape or size; correct the input and retry.
    #[error("invalid proof input: {0}")]
    Validation(String),
    /// The witness does not open the commitment. Distinct from toolchain
    /// trouble so callers can tell "wrong secret" from "service down".
    #[error("agent secret does not open the commitment")]
    BadWitness,
    #[error("proving toolchain unavailable: {0}")]
    ToolchainUnavailable(String),
    /// Off-chain poseidon disagrees with the circuit artifact. Fatal: no
    /// proof produced against this artifact can be trusted.
    #[error("hash primitive is incompatible with the circuit artifact")]
    HashIncompatible,
    #[error("proving service rejected the request: {0}")]
    Service(String),
    #[error("proving step timed out after {0:?}")]
    Timeout(Duration),
}

/// Lifecycle of one proof request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    Proving,
    Submitted,
    Attested,
}

/// One pipeline instance serves one proof request: initialize once, prove
/// once. A failed instance is discarded, never resumed.
pub struct ProofPipeline {
    inner: Arc<dyn InnerProver>,
    path: Arc<dyn ProofPath>,
    state: PipelineState,
}

impl ProofPipeline {
    pub fn new(inner: Arc<dyn InnerProver>, path: Arc<dyn ProofPath>) -> Self {
        Self {
            inner,
            path,
            state: PipelineState::Uninitialized,
        }
    }

    pub fn from_context(context: &ProverContext, path: Arc<dyn ProofPath>) -> Self {
        Self::new(context.handle(), path)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// One-time toolchain and compatibility gate. No proof work may start
    /// before the off-chain hash has been checked against the circuit
    /// artifact's probe vector; an incompatible hash is fatal.
    pub async fn init(&mut self) -> Result<(), ProofError> {
        if self.state != PipelineState::Uninitialized {
            return Err(ProofError::Validation(
                "pipeline is already initialized".into(),
            ));
        }

        let status = self.inner.status().await?;
        if !status.ready {
            return Err(ProofError::ToolchainUnavailable(
                "toolchain reports artifacts not ready".into(),
            ));
        }
        verify_hash_probe(&status)?;
        debug!(circuit_version = status.circuit_version, "prover toolchain ready");

        self.state = PipelineState::Ready;
        Ok(())
    }

    /// Run the full pipeline: local inner proof, then remote finalization
    /// through the configured path.
    pub async fn prove_ownership(
        &mut self,
        secret: &Fr,
        commitment: &Fr,
    ) -> Result<ChainAttestation, ProofError> {
        if self.state != PipelineState::Ready {
            return Err(ProofError::Validation(format!(
                "pipeline is {:?}, expected Ready",
                self.state
            )));
        }

        // A mismatched witness surfaces here, before any proving cost.
        if hash(&[*secret]).map_err(|err| ProofError::Validation(err.to_string()))? != *commitment {
            return Err(ProofError::BadWitness);
        }

        self.state = PipelineState::Proving;
        let artifacts = self.inner.prove(secret, commitment).await?;
        validate_inner_sizes(&artifacts)?;

        let commitment_bytes = fr_to_bytes(commitment);
        if artifacts
            .public_inputs
            .first()
            .map(|input| fr_to_bytes(input))
            != Some(commitment_bytes)
        {
            return Err(ProofError::Validation(
                "inner proof public input does not carry the commitment".into(),
            ));
        }

        self.state = PipelineState::Submitted;
        let attestation = self.path.finalize(&artifacts, &commitment_bytes).await?;
        validate_attestation(&attestation, &commitment_bytes)?;

        self.state = PipelineState::Attested;
        info!(path = ?attestation.path, "ownership proof attested");
        Ok(attestation)
    }
}

fn verify_hash_probe(status: &ToolchainStatus) -> Result<(), ProofError> {
    let inputs = status
        .hash_probe
        .inputs
        .iter()
        .map(|bytes| shroud_common::fr_from_bytes(bytes).map_err(|_| ProofError::HashIncompatible))
        .collect::<Result<Vec<_>, _>>()?;
    let ours = hash(&inputs).map_err(|_| ProofError::HashIncompatible)?;
    if fr_to_bytes(&ours) != status.hash_probe.output {
        return Err(ProofError::HashIncompatible);
    }
    Ok(())
}

/// The size contract is checked on our side before the artifacts are sent
/// anywhere; the remote side re-checks independently.
fn validate_inner_sizes(artifacts: &InnerArtifacts) -> Result<(), ProofError> {
    if artifacts.vk.len() != INNER_VK_FIELD_ELEMENTS {
        return Err(ProofError::Validation(format!(
            "inner verification key must be {} field elements, got {}",
            INNER_VK_FIELD_ELEMENTS,
            artifacts.vk.len()
        )));
    }
    if artifacts.proof.len() != INNER_PROOF_FIELD_ELEMENTS {
        return Err(ProofError::Validation(format!(
            "inner proof must be {} field elements, got {}",
            INNER_PROOF_FIELD_ELEMENTS,
            artifacts.proof.len()
        )));
    }
    if artifacts.public_inputs.is_empty() {
        return Err(ProofError::Validation("inner proof has no public inputs".into()));
    }
    Ok(())
}

fn validate_attestation(
    attestation: &ChainAttestation,
    commitment: &[u8; COMMITMENT_SIZE],
) -> Result<(), ProofError> {
    if attestation.proof.len() != CHAIN_PROOF_SIZE {
        return Err(ProofError::Validation(format!(
            "chain proof must be {} bytes, got {}",
            CHAIN_PROOF_SIZE,
            attestation.proof.len()
        )));
    }
    if attestation.witness.len() < MIN_WITNESS_SIZE {
        return Err(ProofError::Validation(format!(
            "witness must be at least {} bytes, got {}",
            MIN_WITNESS_SIZE,
            attestation.witness.len()
        )));
    }
    if &attestation.witness[WITNESS_HEADER_SIZE..MIN_WITNESS_SIZE] != commitment {
        return Err(ProofError::Validation(
            "witness does not carry the expected commitment".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inner::{DevProver, HashProbe};
    use crate::path::mock::MockPath;
    use shroud_common::secrets::{derive_agent, derive_master};

    fn agent_keys() -> (Fr, Fr) {
        let master = derive_master(b"pipeline-test-signature");
        let keys = derive_agent(&master, 0);
        (keys.secret, keys.commitment)
    }

    fn ready_pipeline() -> ProofPipeline {
        ProofPipeline::new(
            Arc::new(DevProver::new(1)),
            Arc::new(MockPath::accepting(PathKind::Recursive)),
        )
    }

    #[tokio::test]
    async fn walks_the_full_state_machine() {
        let (secret, commitment) = agent_keys();
        let mut pipeline = ready_pipeline();
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);

        pipeline.init().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);

        let attestation = pipeline.prove_ownership(&secret, &commitment).await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Attested);
        assert_eq!(attestation.proof.len(), CHAIN_PROOF_SIZE);
        assert_eq!(
            &attestation.witness[WITNESS_HEADER_SIZE..MIN_WITNESS_SIZE],
            &fr_to_bytes(&commitment)
        );
    }

    #[tokio::test]
    async fn refuses_to_prove_before_init() {
        let (secret, commitment) = agent_keys();
        let mut pipeline = ready_pipeline();
        let err = pipeline.prove_ownership(&secret, &commitment).await.unwrap_err();
        assert!(matches!(err, ProofError::Validation(_)));
    }

    #[tokio::test]
    async fn mismatched_secret_is_a_distinct_error() {
        let (_, commitment) = agent_keys();
        let other = derive_agent(&derive_master(b"someone else"), 0).secret;

        let mut pipeline = ready_pipeline();
        pipeline.init().await.unwrap();
        let err = pipeline.prove_ownership(&other, &commitment).await.unwrap_err();
        assert!(matches!(err, ProofError::BadWitness));
        // No proving work was started.
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[tokio::test]
    async fn incompatible_hash_probe_is_fatal_before_any_proof_work() {
        let mut prover = DevProver::new(1);
        prover.hash_probe_override = Some(HashProbe {
            inputs: vec![fr_to_bytes(&Fr::from(1u64))],
            output: [0xEE; 32],
        });

        let mut pipeline = ProofPipeline::new(
            Arc::new(prover),
            Arc::new(MockPath::accepting(PathKind::Recursive)),
        );
        let err = pipeline.init().await.unwrap_err();
        assert!(matches!(err, ProofError::HashIncompatible));
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    }

    #[tokio::test]
    async fn undersized_artifacts_fail_validation_before_submission() {
        let (secret, commitment) = agent_keys();
        let mut prover = DevProver::new(1);
        prover.truncate_vk = true;

        let path = Arc::new(MockPath::accepting(PathKind::Recursive));
        let mut pipeline = ProofPipeline::new(Arc::new(prover), path.clone());
        pipeline.init().await.unwrap();

        let err = pipeline.prove_ownership(&secret, &commitment).await.unwrap_err();
        assert!(matches!(err, ProofError::Validation(_)));
        assert_eq!(path.finalize_calls(), 0, "nothing may reach the remote side");
    }

    #[tokio::test]
    async fn secret_never_appears_in_any_serialized_artifact() {
        let (secret, commitment) = agent_keys();
        let secret_bytes = fr_to_bytes(&secret);

        let prover = DevProver::new(1);
        let artifacts = prover.prove(&secret, &commitment).await.unwrap();
        for element in artifacts
            .vk
            .iter()
            .chain(artifacts.proof.iter())
            .chain(artifacts.public_inputs.iter())
        {
            assert_ne!(fr_to_bytes(element), secret_bytes);
        }

        let mut pipeline = ready_pipeline();
        pipeline.init().await.unwrap();
        let attestation = pipeline.prove_ownership(&secret, &commitment).await.unwrap();
        let serialized = [attestation.proof.as_slice(), attestation.witness.as_slice()].concat();
        assert!(!serialized
            .windows(secret_bytes.len())
            .any(|window| window == secret_bytes));
    }
}
