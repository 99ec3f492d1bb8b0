//! Intermediary quote accepted by the engine when creating a swap

use super::SwapKind;
use crate::error::ValidationError;
use crate::price::{Price, TradingPair};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub kind: SwapKind,
    /// Pair the intermediary priced the swap on
    pub pair: TradingPair,
    /// Hex sha256 payment hash of the Lightning leg
    pub payment_hash: String,
    pub input_amount: u64,
    pub output_amount: u64,
    /// Intermediary-reported fee, input-asset denominated
    pub fee: u64,
    pub proposed_price: Price,
    /// Deadline proposed by the intermediary, clamped by the configured expiry
    #[serde(default)]
    pub expiry_timestamp: Option<u64>,
}

impl SwapRequest {
    /// Check the fee accounting the intermediary reported
    pub fn validate_amounts(&self, max_fee_ppm: u64) -> Result<(), ValidationError> {
        if self.output_amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        if self.fee > self.input_amount {
            return Err(ValidationError::FeeExceedsInput {
                input: self.input_amount,
                fee: self.fee,
            });
        }

        let forwarded = self.input_amount - self.fee;
        if forwarded != self.output_amount {
            return Err(ValidationError::AmountMismatch {
                input: self.input_amount,
                output: self.output_amount,
                fee: self.fee,
            });
        }

        // fee / input <= max_fee_ppm / 1e6, in integers
        let fee_scaled = (self.fee as u128) * 1_000_000;
        let limit = (max_fee_ppm as u128) * (self.input_amount as u128);
        if fee_scaled > limit {
            return Err(ValidationError::FeeOutOfTolerance {
                fee_ppm: fee_scaled / self.input_amount as u128,
                max_ppm: max_fee_ppm,
            });
        }

        Ok(())
    }

    /// Decode the payment hash, requiring 32 bytes
    pub fn payment_hash_bytes(&self) -> Result<[u8; 32], ValidationError> {
        decode_payment_hash(&self.payment_hash)
    }

    pub fn validate_reference(&self) -> Result<(), ValidationError> {
        if let SwapKind::ToLightning { invoice, .. } = &self.kind {
            if invoice.trim().is_empty() {
                return Err(ValidationError::EmptyPaymentReference);
            }
        }
        Ok(())
    }
}

pub fn decode_payment_hash(payment_hash: &str) -> Result<[u8; 32], ValidationError> {
    let bytes = hex::decode(payment_hash)
        .map_err(|e| ValidationError::InvalidPaymentHash(format!("{payment_hash}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| ValidationError::InvalidPaymentHash(format!("{payment_hash}: expected 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(input: u64, output: u64, fee: u64) -> SwapRequest {
        SwapRequest {
            kind: SwapKind::FromLightning,
            pair: TradingPair::new("BTC", "SOL"),
            payment_hash: "11".repeat(32),
            input_amount: input,
            output_amount: output,
            fee,
            proposed_price: Price::from_scaled(1),
            expiry_timestamp: None,
        }
    }

    #[test]
    fn accepts_consistent_amounts() {
        assert_eq!(request(100_250, 100_000, 250).validate_amounts(10_000), Ok(()));
    }

    #[test]
    fn rejects_inconsistent_amounts() {
        assert_eq!(
            request(100_000, 100_000, 250).validate_amounts(10_000),
            Err(ValidationError::AmountMismatch {
                input: 100_000,
                output: 100_000,
                fee: 250
            })
        );
        assert_eq!(
            request(10, 0, 20).validate_amounts(10_000),
            Err(ValidationError::ZeroAmount)
        );
        assert!(matches!(
            request(10, 5, 20).validate_amounts(1_000_000),
            Err(ValidationError::FeeExceedsInput { .. })
        ));
    }

    #[test]
    fn fee_ratio_boundary() {
        // 1% of 100_000 is exactly 10_000 ppm
        assert_eq!(request(100_000, 99_000, 1_000).validate_amounts(10_000), Ok(()));
        assert!(matches!(
            request(100_000, 98_999, 1_001).validate_amounts(10_000),
            Err(ValidationError::FeeOutOfTolerance { .. })
        ));
    }

    #[test]
    fn payment_hash_must_be_32_bytes() {
        let mut r = request(100_250, 100_000, 250);
        assert!(r.payment_hash_bytes().is_ok());
        r.payment_hash = "abcd".to_string();
        assert!(r.payment_hash_bytes().is_err());
        r.payment_hash = "zz".repeat(32);
        assert!(r.payment_hash_bytes().is_err());
    }
}
