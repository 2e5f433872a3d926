use serde::{Deserialize, Serialize};

use crate::metadata::{Metadata, ResourceKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSpec {
    pub devnet_ref: ResourceKey,
    pub tx_type: String,
    pub signer: String,
    #[serde(with = "serde_bytes_base64")]
    pub payload: Vec<u8>,
    pub gas_limit: u64,
    pub memo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPhase {
    Pending,
    Broadcast,
    Confirmed,
    Failed,
}

impl Default for TransactionPhase {
    fn default() -> Self {
        TransactionPhase::Pending
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub phase: TransactionPhase,
    pub tx_hash: Option<String>,
    pub height: u64,
    pub gas_used: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub metadata: Metadata,
    pub spec: TransactionSpec,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn new(metadata: Metadata, spec: TransactionSpec) -> Self {
        Self { metadata, spec, status: TransactionStatus::default() }
    }

    /// Failures are terminal; §4.4.4 requires a new Transaction to retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.phase, TransactionPhase::Confirmed | TransactionPhase::Failed)
    }
}

/// Opaque transaction payloads are stored as base64 in the on-disk JSON
/// representation so the Store's serialized form stays human-inspectable.
mod serde_bytes_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        base64::engine::general_purpose::STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        let tx = Transaction::new(
            crate::metadata::Metadata::new("tx-1", "default"),
            TransactionSpec {
                devnet_ref: crate::metadata::ResourceKey::new("default", "dev-1"),
                tx_type: "bank-send".to_string(),
                signer: "alice".to_string(),
                payload: vec![1, 2, 3],
                gas_limit: 200_000,
                memo: String::new(),
            },
        );
        assert!(!tx.is_terminal());
    }
}
