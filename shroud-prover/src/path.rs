//! Service-side finalization: the two interchangeable proof paths.
//!
//! Both consume only secret-free material (the inner proof, its public
//! inputs, and on the recursive path the verification key) and return the
//! succinct proof plus witness bytes the on-ledger verifier accepts.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    inner::{fields_to_hex, InnerArtifacts},
    ProofError, CHAIN_PROOF_SIZE, INNER_PROOF_FIELD_ELEMENTS, INNER_VK_FIELD_ELEMENTS,
    MIN_WITNESS_SIZE, WITNESS_HEADER_SIZE,
};

pub const ATTESTATION_NONCE_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    /// Remote recursive circuit proves "this inner proof verifies against
    /// this VK" and emits the succinct chain proof.
    Recursive,
    /// Remote service verifies the inner proof directly and attests to the
    /// result, bound to a fresh nonce. Cheaper than recursion, but trusts
    /// the service's honesty about having checked the proof.
    Attestation,
}

/// Chain-ready proof material.
#[derive(Clone, Debug)]
pub struct ChainAttestation {
    pub proof: Vec<u8>,
    pub witness: Vec<u8>,
    pub path: PathKind,
}

#[async_trait]
pub trait ProofPath: Send + Sync {
    fn kind(&self) -> PathKind;

    async fn ready(&self) -> Result<bool, ProofError>;

    async fn finalize(
        &self,
        inner: &InnerArtifacts,
        commitment: &[u8; 32],
    ) -> Result<ChainAttestation, ProofError>;
}

#[derive(Deserialize)]
struct StatusResponse {
    ready: bool,
}

#[derive(Deserialize)]
struct RecursiveResponse {
    proof: String,
    witness: String,
}

#[derive(Deserialize)]
struct AttestResponse {
    verified: bool,
    nonce: String,
    proof: String,
    witness: String,
}

#[derive(Serialize)]
struct RecursiveRequest {
    vk: Vec<String>,
    proof: Vec<String>,
    public_inputs: Vec<String>,
}

/// HTTP client shared by both path implementations.
struct PathClient {
    http: reqwest::Client,
    base_url: String,
}

impl PathClient {
    fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProofError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProofError::ToolchainUnavailable(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn ready(&self) -> Result<bool, ProofError> {
        let response = self
            .http
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(map_transport)?;
        let status: StatusResponse = response.json().await.map_err(map_transport)?;
        Ok(status.ready)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProofError> {
        let response = self
            .http
            .post(format!("{}/{endpoint}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ProofError::Service(format!("{status}: {detail}")));
        }
        response.json().await.map_err(map_transport)
    }
}

fn map_transport(err: reqwest::Error) -> ProofError {
    if err.is_timeout() {
        // reqwest already enforced the configured ceiling.
        ProofError::Service("proving service timed out".into())
    } else {
        ProofError::ToolchainUnavailable(err.to_string())
    }
}

pub struct RecursivePath {
    client: PathClient,
}

impl RecursivePath {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProofError> {
        Ok(Self {
            client: PathClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ProofPath for RecursivePath {
    fn kind(&self) -> PathKind {
        PathKind::Recursive
    }

    async fn ready(&self) -> Result<bool, ProofError> {
        self.client.ready().await
    }

    async fn finalize(
        &self,
        inner: &InnerArtifacts,
        commitment: &[u8; 32],
    ) -> Result<ChainAttestation, ProofError> {
        // The recursive circuit's input shape is part of its artifact; an
        // off-size payload would only waste minutes of remote proving.
        if inner.vk.len() != INNER_VK_FIELD_ELEMENTS
            || inner.proof.len() != INNER_PROOF_FIELD_ELEMENTS
        {
            return Err(ProofError::Validation(
                "inner artifacts violate the recursive circuit size contract".into(),
            ));
        }

        let request = RecursiveRequest {
            vk: fields_to_hex(&inner.vk),
            proof: fields_to_hex(&inner.proof),
            public_inputs: fields_to_hex(&inner.public_inputs),
        };
        let response: RecursiveResponse = self
            .client
            .post("prove/recursive", &serde_json::to_value(request).expect("serializable"))
            .await?;

        let proof = bytes_from_hex(&response.proof)?;
        let witness = bytes_from_hex(&response.witness)?;
        check_chain_artifacts(&proof, &witness, commitment)?;
        Ok(ChainAttestation {
            proof,
            witness,
            path: PathKind::Recursive,
        })
    }
}

pub struct AttestationPath {
    client: PathClient,
}

impl AttestationPath {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProofError> {
        Ok(Self {
            client: PathClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ProofPath for AttestationPath {
    fn kind(&self) -> PathKind {
        PathKind::Attestation
    }

    async fn ready(&self) -> Result<bool, ProofError> {
        self.client.ready().await
    }

    async fn finalize(
        &self,
        inner: &InnerArtifacts,
        commitment: &[u8; 32],
    ) -> Result<ChainAttestation, ProofError> {
        if inner.proof.len() != INNER_PROOF_FIELD_ELEMENTS {
            return Err(ProofError::Validation(
                "inner proof violates the verifier size contract".into(),
            ));
        }

        let body = json!({
            "proof": fields_to_hex(&inner.proof),
            "public_inputs": fields_to_hex(&inner.public_inputs),
        });
        let response: AttestResponse = self.client.post("attest", &body).await?;
        if !response.verified {
            return Err(ProofError::Service(
                "verifier rejected the inner proof".into(),
            ));
        }

        let nonce = bytes_from_hex(&response.nonce)?;
        if nonce.len() != ATTESTATION_NONCE_SIZE || nonce.iter().all(|byte| *byte == 0) {
            return Err(ProofError::Validation(
                "attestation nonce must be 32 fresh bytes".into(),
            ));
        }

        let proof = bytes_from_hex(&response.proof)?;
        let witness = bytes_from_hex(&response.witness)?;
        check_chain_artifacts(&proof, &witness, commitment)?;
        // The attestation must be bound to its nonce, or it could be
        // replayed across unrelated requests.
        if witness.len() < MIN_WITNESS_SIZE + ATTESTATION_NONCE_SIZE
            || witness[MIN_WITNESS_SIZE..MIN_WITNESS_SIZE + ATTESTATION_NONCE_SIZE] != nonce[..]
        {
            return Err(ProofError::Validation(
                "attestation witness is not bound to the issued nonce".into(),
            ));
        }

        Ok(ChainAttestation {
            proof,
            witness,
            path: PathKind::Attestation,
        })
    }
}

fn check_chain_artifacts(
    proof: &[u8],
    witness: &[u8],
    commitment: &[u8; 32],
) -> Result<(), ProofError> {
    if proof.len() != CHAIN_PROOF_SIZE {
        return Err(ProofError::Validation(format!(
            "chain proof must be {CHAIN_PROOF_SIZE} bytes, got {}",
            proof.len()
        )));
    }
    if witness.len() < MIN_WITNESS_SIZE {
        return Err(ProofError::Validation(format!(
            "witness must be at least {MIN_WITNESS_SIZE} bytes, got {}",
            witness.len()
        )));
    }
    if &witness[WITNESS_HEADER_SIZE..MIN_WITNESS_SIZE] != commitment {
        return Err(ProofError::Validation(
            "witness does not carry the expected commitment".into(),
        ));
    }
    Ok(())
}

fn bytes_from_hex(s: &str) -> Result<Vec<u8>, ProofError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).map_err(|err| ProofError::Validation(format!("invalid hex bytes: {err}")))
}

/// Deterministic path used by tests.
pub mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    pub struct MockPath {
        kind: PathKind,
        accept: bool,
        calls: AtomicUsize,
    }

    impl MockPath {
        pub fn accepting(kind: PathKind) -> Self {
            Self {
                kind,
                accept: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn rejecting(kind: PathKind) -> Self {
            Self {
                kind,
                accept: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn finalize_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProofPath for MockPath {
        fn kind(&self) -> PathKind {
            self.kind
        }

        async fn ready(&self) -> Result<bool, ProofError> {
            Ok(true)
        }

        async fn finalize(
            &self,
            _inner: &InnerArtifacts,
            commitment: &[u8; 32],
        ) -> Result<ChainAttestation, ProofError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.accept {
                return Err(ProofError::Service("mock path rejects".into()));
            }

            let mut witness = Vec::with_capacity(MIN_WITNESS_SIZE + ATTESTATION_NONCE_SIZE);
            witness.extend_from_slice(&1u32.to_le_bytes());
            witness.extend_from_slice(&1u32.to_le_bytes());
            witness.extend_from_slice(&match self.kind {
                PathKind::Recursive => 0u32.to_le_bytes(),
                PathKind::Attestation => 1u32.to_le_bytes(),
            });
            witness.extend_from_slice(commitment);
            if self.kind == PathKind::Attestation {
                witness.extend_from_slice(&[0x5A; ATTESTATION_NONCE_SIZE]);
            }

            Ok(ChainAttestation {
                proof: vec![0xA5; CHAIN_PROOF_SIZE],
                witness,
                path: self.kind,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_artifact_checks_catch_each_fault() {
        let commitment = [3u8; 32];
        let mut witness = vec![0u8; MIN_WITNESS_SIZE];
        witness[WITNESS_HEADER_SIZE..].copy_from_slice(&commitment);

        let good = vec![1u8; CHAIN_PROOF_SIZE];
        assert!(check_chain_artifacts(&good, &witness, &commitment).is_ok());

        assert!(check_chain_artifacts(&good[..CHAIN_PROOF_SIZE - 1], &witness, &commitment).is_err());
        assert!(check_chain_artifacts(&good, &witness[..MIN_WITNESS_SIZE - 1], &commitment).is_err());
        assert!(check_chain_artifacts(&good, &witness, &[4u8; 32]).is_err());
    }

    #[test]
    fn hex_decoding_rejects_garbage() {
        assert!(bytes_from_hex("0xdeadbeef").is_ok());
        assert!(bytes_from_hex("not-hex").is_err());
    }
}
