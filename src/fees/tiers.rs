//! Fee Tiers
//!
//! Flat protocol fees keyed by transfer size. Tiers are disjoint inclusive
//! ranges; an amount that no tier covers is an error, never a default.

use crate::error::{TransferError, TransferResult};
use crate::types::FeeTier;

/// Fee owed for a transfer of `amount` tokens
pub fn resolve_fee(tiers: &[FeeTier], amount: u64) -> TransferResult<u64> {
    tiers
        .iter()
        .find(|tier| tier.contains(amount))
        .map(|tier| tier.fee)
        .ok_or(TransferError::NoFeeTier { amount })
}

/// Reject malformed tier tables at load time
pub fn validate_tiers(tiers: &[FeeTier]) -> TransferResult<()> {
    if tiers.is_empty() {
        return Err(TransferError::config("Fee tier table is empty"));
    }

    for tier in tiers {
        if tier.min > tier.max {
            return Err(TransferError::config(format!(
                "Fee tier [{}, {}] has min above max",
                tier.min, tier.max
            )));
        }
    }

    let mut sorted: Vec<&FeeTier> = tiers.iter().collect();
    sorted.sort_by_key(|t| t.min);
    for pair in sorted.windows(2) {
        if pair[1].min <= pair[0].max {
            return Err(TransferError::config(format!(
                "Fee tiers [{}, {}] and [{}, {}] overlap",
                pair[0].min, pair[0].max, pair[1].min, pair[1].max
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> Vec<FeeTier> {
        vec![FeeTier::new(0, 100, 1), FeeTier::new(101, 100_000, 5)]
    }

    #[test]
    fn test_resolve_first_containing_tier() {
        assert_eq!(resolve_fee(&tiers(), 50).unwrap(), 1);
        assert_eq!(resolve_fee(&tiers(), 100).unwrap(), 1);
        assert_eq!(resolve_fee(&tiers(), 101).unwrap(), 5);
        assert_eq!(resolve_fee(&tiers(), 100_000).unwrap(), 5);
    }

    #[test]
    fn test_no_tier_is_an_error() {
        assert_eq!(
            resolve_fee(&tiers(), 100_001),
            Err(TransferError::NoFeeTier { amount: 100_001 })
        );
        assert!(resolve_fee(&[], 1).is_err());
    }

    #[test]
    fn test_validate_tiers() {
        assert!(validate_tiers(&tiers()).is_ok());
        assert!(validate_tiers(&[]).is_err());
        assert!(validate_tiers(&[FeeTier::new(10, 5, 1)]).is_err());
        assert!(validate_tiers(&[FeeTier::new(0, 100, 1), FeeTier::new(100, 200, 2)]).is_err());
        // gaps are allowed; lookups inside them fail at resolve time
        assert!(validate_tiers(&[FeeTier::new(0, 10, 1), FeeTier::new(20, 30, 2)]).is_ok());
    }
}
