//! Inner proof generation, the client-local pipeline stage.
//!
//! The inner proof is generated without zero-knowledge blinding so the
//! recursive circuit can consume it; it never leaves the client except as
//! proof/VK field elements, which reveal nothing about the witness.

use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use shroud_common::{fr_from_bytes, fr_to_bytes, hash, Fr};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::warn;

use crate::{ProofError, INNER_PROOF_FIELD_ELEMENTS, INNER_VK_FIELD_ELEMENTS};

/// Toolchain exit code that means "circuit constraints unsatisfied", i.e.
/// the secret does not open the commitment.
const EXIT_UNSATISFIED_WITNESS: i32 = 2;

/// Circuit-side hash probe: the artifact's claim of what the in-circuit
/// hash returns for a fixed input vector. Compared against the off-chain
/// implementation at pipeline initialization.
#[derive(Clone, Debug)]
pub struct HashProbe {
    pub inputs: Vec<[u8; 32]>,
    pub output: [u8; 32],
}

#[derive(Clone, Debug)]
pub struct ToolchainStatus {
    pub ready: bool,
    pub circuit_version: u32,
    pub hash_probe: HashProbe,
}

/// Inner proof plus verification key, both as field-element arrays sized
/// per the artifact contract.
#[derive(Clone, Debug)]
pub struct InnerArtifacts {
    pub vk: Vec<Fr>,
    pub proof: Vec<Fr>,
    pub public_inputs: Vec<Fr>,
}

/// Injectable proving capability so the backend is swappable and mockable:
/// an external toolchain process in production, an in-process stand-in for
/// development and tests.
#[async_trait]
pub trait InnerProver: Send + Sync {
    async fn status(&self) -> Result<ToolchainStatus, ProofError>;

    /// Generate the inner proof. Implementations must never write the
    /// secret to disk, logs, or any network socket.
    async fn prove(&self, secret: &Fr, commitment: &Fr) -> Result<InnerArtifacts, ProofError>;
}

/// Configuration for the external proving toolchain.
#[derive(Clone, Debug)]
pub struct ToolchainConfig {
    pub binary: PathBuf,
    pub artifact_dir: PathBuf,
    /// Per-invocation ceiling; recursive-path proving can legitimately take
    /// minutes, so this is generous but never unbounded.
    pub timeout: Duration,
}

/// Drives the proving toolchain as a child process. The witness goes in on
/// stdin (an anonymous pipe, never argv or a file), artifacts come back as
/// JSON on stdout.
pub struct ProcessProver {
    config: ToolchainConfig,
}

#[derive(Deserialize)]
struct StatusOutput {
    ready: bool,
    circuit_version: u32,
    hash_probe: ProbeOutput,
}

#[derive(Deserialize)]
struct ProbeOutput {
    inputs: Vec<String>,
    output: String,
}

#[derive(Deserialize)]
struct ProveOutput {
    vk: Vec<String>,
    proof: Vec<String>,
    public_inputs: Vec<String>,
}

impl ProcessProver {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[&str], stdin: Option<String>) -> Result<Vec<u8>, ProofError> {
        let mut command = Command::new(&self.config.binary);
        command
            .args(args)
            .arg("--artifacts")
            .arg(&self.config.artifact_dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| ProofError::ToolchainUnavailable(err.to_string()))?;

        if let Some(input) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| ProofError::ToolchainUnavailable("stdin not piped".into()))?;
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|err| ProofError::ToolchainUnavailable(err.to_string()))?;
            // Close the pipe so the toolchain sees EOF.
            drop(pipe);
        }

        // kill_on_drop reaps the child if the timeout wins.
        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProofError::Timeout(self.config.timeout))?
            .map_err(|err| ProofError::ToolchainUnavailable(err.to_string()))?;

        if !output.status.success() {
            if output.status.code() == Some(EXIT_UNSATISFIED_WITNESS) {
                return Err(ProofError::BadWitness);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status, "proving toolchain failed");
            return Err(ProofError::Service(stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl InnerProver for ProcessProver {
    async fn status(&self) -> Result<ToolchainStatus, ProofError> {
        let stdout = self.run(&["status", "--json"], None).await?;
        let parsed: StatusOutput = serde_json::from_slice(&stdout)
            .map_err(|err| ProofError::ToolchainUnavailable(format!("bad status output: {err}")))?;
        Ok(ToolchainStatus {
            ready: parsed.ready,
            circuit_version: parsed.circuit_version,
            hash_probe: HashProbe {
                inputs: parsed
                    .hash_probe
                    .inputs
                    .iter()
                    .map(|s| bytes32_from_hex(s))
                    .collect::<Result<_, _>>()?,
                output: bytes32_from_hex(&parsed.hash_probe.output)?,
            },
        })
    }

    async fn prove(&self, secret: &Fr, commitment: &Fr) -> Result<InnerArtifacts, ProofError> {
        let commitment_hex = format!("0x{}", hex::encode(fr_to_bytes(commitment)));
        let witness_line = format!("0x{}\n", hex::encode(fr_to_bytes(secret)));

        let stdout = self
            .run(
                &["prove", "--json", "--commitment", &commitment_hex],
                Some(witness_line),
            )
            .await?;

        let parsed: ProveOutput = serde_json::from_slice(&stdout)
            .map_err(|err| ProofError::Service(format!("bad prover output: {err}")))?;
        Ok(InnerArtifacts {
            vk: fields_from_hex(&parsed.vk)?,
            proof: fields_from_hex(&parsed.proof)?,
            public_inputs: fields_from_hex(&parsed.public_inputs)?,
        })
    }
}

/// In-process stand-in for the toolchain, used in development and tests.
/// Artifacts are shaped per the real contract and derived one-way from the
/// witness, so nothing recoverable about the secret appears in them. Its
/// hash probe is computed with the local primitive, so the compatibility
/// gate passes by construction.
pub struct DevProver {
    pub circuit_version: u32,
    pub hash_probe_override: Option<HashProbe>,
    pub truncate_vk: bool,
}

impl DevProver {
    pub fn new(circuit_version: u32) -> Self {
        Self {
            circuit_version,
            hash_probe_override: None,
            truncate_vk: false,
        }
    }
}

#[async_trait]
impl InnerProver for DevProver {
    async fn status(&self) -> Result<ToolchainStatus, ProofError> {
        let probe = match &self.hash_probe_override {
            Some(probe) => probe.clone(),
            None => {
                let inputs = [Fr::from(1u64), Fr::from(2u64)];
                let output = hash(&inputs).expect("poseidon supports two inputs");
                HashProbe {
                    inputs: inputs.iter().map(fr_to_bytes).collect(),
                    output: fr_to_bytes(&output),
                }
            }
        };
        Ok(ToolchainStatus {
            ready: true,
            circuit_version: self.circuit_version,
            hash_probe: probe,
        })
    }

    async fn prove(&self, secret: &Fr, commitment: &Fr) -> Result<InnerArtifacts, ProofError> {
        if hash(&[*secret]).expect("poseidon supports one input") != *commitment {
            return Err(ProofError::BadWitness);
        }

        let vk_len = if self.truncate_vk {
            INNER_VK_FIELD_ELEMENTS - 1
        } else {
            INNER_VK_FIELD_ELEMENTS
        };
        let vk = (0..vk_len)
            .map(|i| hash(&[*commitment, Fr::from(i as u64)]).expect("poseidon arity 2"))
            .collect();
        let proof = (0..INNER_PROOF_FIELD_ELEMENTS)
            .map(|i| hash(&[*secret, Fr::from(1 + i as u64)]).expect("poseidon arity 2"))
            .collect();

        Ok(InnerArtifacts {
            vk,
            proof,
            public_inputs: vec![*commitment],
        })
    }
}

fn bytes32_from_hex(s: &str) -> Result<[u8; 32], ProofError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped)
        .map_err(|err| ProofError::Validation(format!("invalid hex field element: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| ProofError::Validation("field element must be 32 bytes".into()))
}

pub(crate) fn field_from_hex(s: &str) -> Result<Fr, ProofError> {
    let bytes = bytes32_from_hex(s)?;
    fr_from_bytes(&bytes).map_err(|err| ProofError::Validation(err.to_string()))
}

fn fields_from_hex(values: &[String]) -> Result<Vec<Fr>, ProofError> {
    values.iter().map(|s| field_from_hex(s)).collect()
}

pub(crate) fn fields_to_hex(values: &[Fr]) -> Vec<String> {
    values
        .iter()
        .map(|value| format!("0x{}", hex::encode(fr_to_bytes(value))))
        .collect()
}
