//! UTXO Selection
//!
//! Greedy coin selection for token-bearing outputs. The heuristic favours
//! fewer inputs: an exact match for the remaining gap wins, then the
//! smallest output that still closes the gap, and only then the largest
//! remaining output. It is not globally optimal bin packing and makes no
//! promise of minimal transaction size.

use crate::error::{TransferError, TransferResult};
use crate::types::Utxo;
use serde::{Deserialize, Serialize};

/// Result of UTXO selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoSelection {
    /// Chosen outputs, in the order they will become inputs
    pub selected: Vec<Utxo>,
    /// Distinct owning addresses, in first-seen order
    pub addresses: Vec<String>,
    /// Sum of selected token amounts
    pub total: u64,
}

impl UtxoSelection {
    pub fn input_count(&self) -> usize {
        self.selected.len()
    }

    /// Tokens left over once `needed` is paid
    pub fn excess_over(&self, needed: u64) -> u64 {
        self.total.saturating_sub(needed)
    }
}

/// Select UTXOs whose token amounts cover `amount_needed`
pub fn select_utxos(utxos: &[Utxo], amount_needed: u64) -> TransferResult<UtxoSelection> {
    // Stable: equal amounts keep enumeration order
    let mut pool: Vec<&Utxo> = utxos.iter().collect();
    pool.sort_by(|a, b| b.amount.cmp(&a.amount));

    let mut selected: Vec<Utxo> = Vec::new();
    let mut total: u64 = 0;

    while total < amount_needed {
        let gap = amount_needed - total;
        let Some(pick) = pick_candidate(&pool, gap) else {
            return Err(TransferError::InsufficientFunds {
                available: total,
                required: amount_needed,
            });
        };

        let utxo = pool.remove(pick);
        total = total
            .checked_add(utxo.amount)
            .ok_or_else(|| TransferError::internal("Token amount overflow during selection"))?;
        selected.push(utxo.clone());
    }

    let mut addresses: Vec<String> = Vec::new();
    for utxo in &selected {
        if !addresses.contains(&utxo.address) {
            addresses.push(utxo.address.clone());
        }
    }

    Ok(UtxoSelection {
        selected,
        addresses,
        total,
    })
}

/// Index into a descending pool of the next UTXO to take for `gap`
fn pick_candidate(pool: &[&Utxo], gap: u64) -> Option<usize> {
    if pool.is_empty() {
        return None;
    }

    if let Some(exact) = pool.iter().position(|u| u.amount == gap) {
        return Some(exact);
    }

    // Pool is descending, so the last covering entry is the smallest one
    if let Some(smallest_cover) = pool.iter().rposition(|u| u.amount >= gap) {
        return Some(smallest_cover);
    }

    Some(0)
}

/// Sum of token amounts
pub fn total_amount(utxos: &[Utxo]) -> TransferResult<u64> {
    utxos
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.amount))
        .ok_or_else(|| TransferError::internal("Token balance overflow"))
}
