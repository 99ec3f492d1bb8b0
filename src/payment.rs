//! Lightning side of a swap: payment proofs and the watcher interface

use crate::error::ClientResult;
use crate::swap::SwapRecord;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Evidence that the Lightning leg settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    /// Hex encoded 32-byte preimage
    pub preimage: String,
    /// Settled amount in base units
    pub amount: u64,
}

impl PaymentProof {
    pub fn from_preimage(preimage: &[u8; 32], amount: u64) -> Self {
        Self {
            preimage: hex::encode(preimage),
            amount,
        }
    }

    /// True when sha256(preimage) is the given hex payment hash
    pub fn matches(&self, payment_hash: &str) -> bool {
        let (Ok(preimage), Ok(expected)) = (hex::decode(&self.preimage), hex::decode(payment_hash))
        else {
            return false;
        };
        preimage.len() == 32 && Sha256::digest(&preimage).as_slice() == expected.as_slice()
    }
}

/// Hex payment hash for a preimage
pub fn payment_hash(preimage: &[u8]) -> String {
    hex::encode(Sha256::digest(preimage))
}

/// Observes the Lightning leg.
///
/// For incoming swaps this reports the payment received on `payment_hash`; for
/// outgoing swaps it reports the intermediary's settlement proof.
#[async_trait]
pub trait PaymentWatcher: Send + Sync {
    async fn check_payment(&self, record: &SwapRecord) -> ClientResult<Option<PaymentProof>>;
}
