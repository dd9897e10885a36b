//! External attestation seam.
//!
//! The engine requests a tamper-evident attestation of each check-in from
//! an external subsystem. Only the fields the engine supplies are specified
//! here; the wire format behind `AttestationClient` is the integration's
//! concern. The subsystem may be administratively disabled, in which case
//! the orchestrator skips the call entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AttestationError;

/// Fields the engine supplies for every attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationPayload {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub greeting: String,
    pub xp_awarded: i64,
    pub streak: u32,
}

/// One attestation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationRequest {
    /// Schema the attestation is created against
    pub schema_id: String,

    /// Recipient wallet address
    pub recipient: String,

    pub payload: AttestationPayload,

    /// Signing identity used by the attestation subsystem
    pub signer: String,
}

/// Reference returned by a successful attestation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationReceipt {
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

/// External attestation creator. Implementations are injected into the
/// engine; the orchestrator checks `is_enabled` before calling.
pub trait AttestationClient: Send + Sync {
    /// Whether the subsystem is administratively enabled.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Create one attestation.
    ///
    /// # Errors
    /// Returns an error if the external call fails; the orchestrator then
    /// aborts the whole check-in attempt.
    fn create_attestation(
        &self,
        request: &AttestationRequest,
    ) -> Result<AttestationReceipt, AttestationError>;
}

/// Administratively disabled attestor. `create_attestation` is never
/// reached when the orchestrator honors `is_enabled`.
#[derive(Debug, Default)]
pub struct DisabledAttestor;

impl AttestationClient for DisabledAttestor {
    fn is_enabled(&self) -> bool {
        false
    }

    fn create_attestation(
        &self,
        _request: &AttestationRequest,
    ) -> Result<AttestationReceipt, AttestationError> {
        Err(AttestationError::CreateFailed(
            "attestation subsystem is disabled".to_string(),
        ))
    }
}

/// Local attestor producing a sha256 digest of the signed payload as the
/// reference id. Useful for development and demos; the digest makes the
/// reference reproducible from the payload and signer.
#[derive(Debug)]
pub struct LocalAttestor {
    signer: String,
}

impl LocalAttestor {
    pub fn new(signer: impl Into<String>) -> Self {
        Self {
            signer: signer.into(),
        }
    }
}

impl AttestationClient for LocalAttestor {
    fn create_attestation(
        &self,
        request: &AttestationRequest,
    ) -> Result<AttestationReceipt, AttestationError> {
        let payload = serde_json::to_vec(&request.payload)
            .map_err(|e| AttestationError::CreateFailed(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(request.schema_id.as_bytes());
        hasher.update(request.recipient.as_bytes());
        hasher.update(&payload);
        hasher.update(self.signer.as_bytes());
        Ok(AttestationReceipt {
            reference_id: hex::encode(hasher.finalize()),
            created_at: Utc::now(),
        })
    }
}

/// Test double: records every request and can be made to fail.
#[derive(Default)]
pub struct RecordingAttestor {
    requests: std::sync::Mutex<Vec<AttestationRequest>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingAttestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<AttestationRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

impl AttestationClient for RecordingAttestor {
    fn create_attestation(
        &self,
        request: &AttestationRequest,
    ) -> Result<AttestationReceipt, AttestationError> {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(request.clone());
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AttestationError::CreateFailed(
                "injected attestation failure".to_string(),
            ));
        }
        Ok(AttestationReceipt {
            reference_id: format!("att-{}", uuid::Uuid::new_v4()),
            created_at: Utc::now(),
        })
    }
}
