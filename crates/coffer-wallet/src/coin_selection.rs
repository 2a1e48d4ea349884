//! Coin selection: choose inputs covering a target amount plus fee.
//!
//! Automatic selection is greedy. Candidates are split into two tiers
//! (confirmed outputs, then unconfirmed change when allowed) and sorted by
//! value descending, confirmations descending, outpoint ascending, so the
//! same inputs always produce the same result. The fee is recomputed after
//! every added input because each input grows the transaction.
//!
//! Manual selection (coin control) spends exactly the pinned outputs.

use std::cmp::Reverse;
use std::collections::HashSet;

use coffer_core::types::OutPoint;

use crate::error::{ValidationError, WalletError};
use crate::fee::{compute_fee, dust_threshold, estimate_size, FeeRate};
use crate::ledger::UnspentOutput;

/// How inputs are chosen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SelectionMode {
    #[default]
    Automatic,
    /// Spend exactly these outputs, in this order.
    Manual(Vec<OutPoint>),
}

/// One transaction attempt's selection parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Sum of recipient amounts.
    pub target: u64,
    pub fee_rate: FeeRate,
    /// Number of recipient outputs, excluding change.
    pub recipient_count: usize,
    pub mode: SelectionMode,
}

/// Wallet settings that shape automatic selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub min_confirmations: u32,
    pub spend_unconfirmed_change: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            min_confirmations: 1,
            spend_unconfirmed_change: false,
        }
    }
}

/// Outcome of a successful selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionResult {
    pub selected: Vec<UnspentOutput>,
    pub total_input: u64,
    pub target: u64,
    pub fee_rate: FeeRate,
    pub recipient_count: usize,
    /// Estimated size of the final transaction, change included if any.
    pub size_bytes: usize,
    pub fee: u64,
    /// Zero when no change output is created.
    pub change: u64,
    /// A surplus existed but was at or below the dust threshold, so it went
    /// to the fee instead of a change output.
    pub change_below_dust: bool,
}

impl SelectionResult {
    pub fn has_change(&self) -> bool {
        self.change > 0
    }

    pub fn output_count(&self) -> usize {
        self.recipient_count + usize::from(self.has_change())
    }
}

/// Stateless selector configured with the wallet's selection policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoinSelector {
    policy: SelectionPolicy,
}

impl CoinSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Select inputs from `available` for `request`.
    pub fn select(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
    ) -> Result<SelectionResult, WalletError> {
        if request.target == 0 {
            return Err(ValidationError::ZeroAmount { index: 0 }.into());
        }
        if request.recipient_count == 0 {
            return Err(ValidationError::NoRecipients.into());
        }
        match &request.mode {
            SelectionMode::Automatic => self.select_automatic(request, available),
            SelectionMode::Manual(pinned) => self.select_manual(request, available, pinned),
        }
    }

    fn select_automatic(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
    ) -> Result<SelectionResult, WalletError> {
        let mut candidates: Vec<(u8, &UnspentOutput)> = available
            .iter()
            .filter(|u| u.is_spendable())
            .filter_map(|u| self.tier(u).map(|tier| (tier, u)))
            .collect();
        candidates.sort_by_key(|(tier, u)| {
            (*tier, Reverse(u.value), Reverse(u.confirmations), u.outpoint)
        });

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for (tier, utxo) in candidates {
            total = total
                .checked_add(utxo.value)
                .ok_or(ValidationError::AmountOverflow)?;
            selected.push(utxo.clone());
            tracing::debug!(
                outpoint = %utxo.outpoint,
                value = utxo.value,
                tier,
                total,
                "selection candidate added"
            );
            if let Some(result) = settle(request, &selected, total) {
                return Ok(result);
            }
        }

        let inputs = selected.len().max(1);
        let need = request
            .target
            .saturating_add(fee_for(inputs, request.recipient_count, request.fee_rate));
        tracing::debug!(have = total, need, "automatic selection exhausted candidates");
        Err(WalletError::InsufficientFunds { have: total, need })
    }

    fn select_manual(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
        pinned: &[OutPoint],
    ) -> Result<SelectionResult, WalletError> {
        if pinned.is_empty() {
            return Err(ValidationError::NoInputs.into());
        }
        let mut seen = HashSet::with_capacity(pinned.len());
        let mut selected = Vec::with_capacity(pinned.len());
        let mut total: u64 = 0;
        for outpoint in pinned {
            if !seen.insert(*outpoint) {
                return Err(ValidationError::DuplicateCoin(outpoint.to_string()).into());
            }
            let utxo = available
                .iter()
                .find(|u| u.outpoint == *outpoint)
                .ok_or_else(|| WalletError::UnknownOutput(outpoint.to_string()))?;
            if !utxo.is_spendable() {
                return Err(WalletError::UnspendableOutput(outpoint.to_string()));
            }
            total = total
                .checked_add(utxo.value)
                .ok_or(ValidationError::AmountOverflow)?;
            selected.push(utxo.clone());
        }

        settle(request, &selected, total).ok_or_else(|| WalletError::InsufficientFunds {
            have: total,
            need: request.target.saturating_add(fee_for(
                selected.len(),
                request.recipient_count,
                request.fee_rate,
            )),
        })
    }

    /// Confirmed outputs are tier 0, unconfirmed change tier 1 (if allowed).
    fn tier(&self, utxo: &UnspentOutput) -> Option<u8> {
        if utxo.confirmations >= self.policy.min_confirmations {
            Some(0)
        } else if utxo.is_change && self.policy.spend_unconfirmed_change {
            Some(1)
        } else {
            None
        }
    }
}

fn fee_for(inputs: usize, outputs: usize, rate: FeeRate) -> u64 {
    compute_fee(estimate_size(inputs, outputs), rate)
}

/// Decide fee and change for a fixed input set, or `None` if it falls short.
fn settle(request: &SelectionRequest, selected: &[UnspentOutput], total: u64) -> Option<SelectionResult> {
    let inputs = selected.len();
    let recipients = request.recipient_count;
    let rate = request.fee_rate;

    let fee_no_change = fee_for(inputs, recipients, rate);
    let need = request.target.checked_add(fee_no_change)?;
    if total < need {
        return None;
    }

    let fee_with_change = fee_for(inputs, recipients + 1, rate);
    let change = request
        .target
        .checked_add(fee_with_change)
        .and_then(|need_with_change| total.checked_sub(need_with_change))
        .filter(|change| *change > dust_threshold(rate));

    let (fee, change, size_bytes) = match change {
        Some(change) => (fee_with_change, change, estimate_size(inputs, recipients + 1)),
        None => (total - request.target, 0, estimate_size(inputs, recipients)),
    };
    let change_below_dust = change == 0 && total > need;
    if change_below_dust {
        tracing::debug!(surplus = total - need, "sub-dust change folded into fee");
    }

    Some(SelectionResult {
        selected: selected.to_vec(),
        total_input: total,
        target: request.target,
        fee_rate: rate,
        recipient_count: recipients,
        size_bytes,
        fee,
        change,
        change_below_dust,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::address::{Address, Network};
    use coffer_core::types::Hash256;

    const RATE: FeeRate = FeeRate::from_per_byte(10);

    fn utxo(n: u8, value: u64, confirmations: u32) -> UnspentOutput {
        UnspentOutput::new(
            OutPoint::new(Hash256([n; 32]), 0),
            value,
            Address::from_pubkey_hash(Hash256([0x42; 32]), Network::Testnet),
            confirmations,
        )
    }

    fn request(target: u64) -> SelectionRequest {
        SelectionRequest {
            target,
            fee_rate: RATE,
            recipient_count: 1,
            mode: SelectionMode::Automatic,
        }
    }

    #[test]
    fn single_input_with_change() {
        let result = CoinSelector::default()
            .select(&request(50_000), &[utxo(1, 60_000, 1)])
            .unwrap();
        assert_eq!(result.fee, 2_000);
        assert_eq!(result.change, 8_000);
        assert_eq!(result.size_bytes, 200);
        assert_eq!(result.output_count(), 2);
        assert!(!result.change_below_dust);
        assert_eq!(result.total_input, result.target + result.fee + result.change);
    }

    #[test]
    fn fee_uncoverable_is_insufficient() {
        let err = CoinSelector::default()
            .select(&request(50_000), &[utxo(1, 51_500, 1)])
            .unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 51_500, need: 51_580 });
    }

    #[test]
    fn sub_dust_change_folded_into_fee() {
        // 53_000 - 50_000 - 2_000 = 1_000, below the 1_460 dust threshold.
        let result = CoinSelector::default()
            .select(&request(50_000), &[utxo(1, 53_000, 1)])
            .unwrap();
        assert_eq!(result.change, 0);
        assert_eq!(result.fee, 3_000);
        assert_eq!(result.size_bytes, 158);
        assert!(result.change_below_dust);
    }

    #[test]
    fn exact_fit_has_no_dust_flag() {
        let result = CoinSelector::default()
            .select(&request(50_000), &[utxo(1, 51_580, 1)])
            .unwrap();
        assert_eq!(result.fee, 1_580);
        assert_eq!(result.change, 0);
        assert!(!result.change_below_dust);
    }

    #[test]
    fn largest_first_and_fee_recomputed_per_input() {
        let available = [utxo(1, 30_000, 1), utxo(2, 40_000, 1), utxo(3, 10_000, 1)];
        let result = CoinSelector::default().select(&request(60_000), &available).unwrap();
        let values: Vec<u64> = result.selected.iter().map(|u| u.value).collect();
        assert_eq!(values, vec![40_000, 30_000]);
        // 2 inputs, 2 outputs: 12 + 208 + 84 = 304 bytes
        assert_eq!(result.fee, 3_040);
        assert_eq!(result.change, 70_000 - 60_000 - 3_040);
    }

    #[test]
    fn unconfirmed_outputs_skipped_by_default() {
        let available = [utxo(1, 100_000, 0).as_change(), utxo(2, 20_000, 3)];
        let err = CoinSelector::default().select(&request(50_000), &available).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 20_000, .. }));
    }

    #[test]
    fn unconfirmed_change_used_after_confirmed_when_enabled() {
        let selector = CoinSelector::new(SelectionPolicy {
            min_confirmations: 1,
            spend_unconfirmed_change: true,
        });
        let available = [
            utxo(1, 100_000, 0).as_change(),
            utxo(2, 100_000, 0),
            utxo(3, 20_000, 3),
        ];
        let result = selector.select(&request(50_000), &available).unwrap();
        let values: Vec<u64> = result.selected.iter().map(|u| u.value).collect();
        // Confirmed first even though it is smaller; foreign unconfirmed never.
        assert_eq!(values, vec![20_000, 100_000]);
        assert!(result.selected[1].is_change);
    }

    #[test]
    fn frozen_outputs_excluded() {
        let mut frozen = utxo(1, 100_000, 5);
        frozen.frozen = true;
        let err = CoinSelector::default()
            .select(&request(10_000), &[frozen])
            .unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 0, need: 11_580 });
    }

    #[test]
    fn deterministic_under_input_permutation() {
        let a = [utxo(1, 5_000, 2), utxo(2, 5_000, 9), utxo(3, 5_000, 2), utxo(4, 7_000, 1)];
        let mut b = a.clone();
        b.reverse();
        let selector = CoinSelector::default();
        let ra = selector.select(&request(12_000), &a).unwrap();
        let rb = selector.select(&request(12_000), &b).unwrap();
        assert_eq!(ra, rb);
        let order: Vec<u8> = ra.selected.iter().map(|u| u.outpoint.txid.0[0]).collect();
        assert_eq!(order[..2], [4, 2]);
    }

    #[test]
    fn manual_uses_pinned_verbatim() {
        let available = [utxo(1, 100_000, 1), utxo(2, 30_000, 1), utxo(3, 30_000, 1)];
        let pins = vec![available[2].outpoint, available[1].outpoint];
        let req = SelectionRequest {
            mode: SelectionMode::Manual(pins.clone()),
            ..request(20_000)
        };
        let result = CoinSelector::default().select(&req, &available).unwrap();
        let chosen: Vec<OutPoint> = result.selected.iter().map(|u| u.outpoint).collect();
        assert_eq!(chosen, pins);
    }

    #[test]
    fn manual_insufficient() {
        let available = [utxo(1, 100_000, 1), utxo(2, 30_000, 1)];
        let req = SelectionRequest {
            mode: SelectionMode::Manual(vec![available[1].outpoint]),
            ..request(50_000)
        };
        let err = CoinSelector::default().select(&req, &available).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 30_000, need: 51_580 });
    }

    #[test]
    fn manual_ignores_confirmation_tiers() {
        let available = [utxo(1, 100_000, 0)];
        let req = SelectionRequest {
            mode: SelectionMode::Manual(vec![available[0].outpoint]),
            ..request(50_000)
        };
        assert!(CoinSelector::default().select(&req, &available).is_ok());
    }

    #[test]
    fn manual_rejects_unknown_frozen_and_duplicate_pins() {
        let mut frozen = utxo(2, 50_000, 1);
        frozen.frozen = true;
        let available = [utxo(1, 100_000, 1), frozen];
        let selector = CoinSelector::default();

        let unknown = SelectionRequest {
            mode: SelectionMode::Manual(vec![utxo(9, 0, 0).outpoint]),
            ..request(1_000)
        };
        assert!(matches!(
            selector.select(&unknown, &available).unwrap_err(),
            WalletError::UnknownOutput(_)
        ));

        let frozen_pin = SelectionRequest {
            mode: SelectionMode::Manual(vec![available[1].outpoint]),
            ..request(1_000)
        };
        assert!(matches!(
            selector.select(&frozen_pin, &available).unwrap_err(),
            WalletError::UnspendableOutput(_)
        ));

        let dup = SelectionRequest {
            mode: SelectionMode::Manual(vec![available[0].outpoint, available[0].outpoint]),
            ..request(1_000)
        };
        assert!(matches!(
            selector.select(&dup, &available).unwrap_err(),
            WalletError::Validation(ValidationError::DuplicateCoin(_))
        ));

        let empty = SelectionRequest {
            mode: SelectionMode::Manual(vec![]),
            ..request(1_000)
        };
        assert_eq!(
            selector.select(&empty, &available).unwrap_err(),
            WalletError::Validation(ValidationError::NoInputs)
        );
    }

    #[test]
    fn zero_target_rejected() {
        assert!(matches!(
            CoinSelector::default().select(&request(0), &[utxo(1, 1_000, 1)]).unwrap_err(),
            WalletError::Validation(ValidationError::ZeroAmount { .. })
        ));
    }
}
