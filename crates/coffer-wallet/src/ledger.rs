//! UTXO ledger: the wallet's view of its unspent outputs.
//!
//! The ledger holds an immutable [`BTreeMap`] behind an `Arc`. Readers take
//! a [`LedgerSnapshot`] (a cheap `Arc` clone) and never observe a partially
//! applied update; writers build a new map and swap it in. Entries are never
//! mutated in place, only replaced wholesale.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use coffer_core::address::Address;
use coffer_core::types::{OutPoint, TxOutput};

use crate::error::WalletError;

/// An output the wallet can (potentially) spend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    /// Value in minor units.
    pub value: u64,
    pub address: Address,
    pub confirmations: u32,
    /// Created as change by one of this wallet's own transactions.
    pub is_change: bool,
    /// False for immature or watch-only outputs.
    pub spendable: bool,
    /// Excluded from selection by the user.
    pub frozen: bool,
}

impl UnspentOutput {
    /// A confirmed-or-not, spendable, unfrozen output.
    pub fn new(outpoint: OutPoint, value: u64, address: Address, confirmations: u32) -> Self {
        Self {
            outpoint,
            value,
            address,
            confirmations,
            is_change: false,
            spendable: true,
            frozen: false,
        }
    }

    pub fn as_change(mut self) -> Self {
        self.is_change = true;
        self
    }

    pub fn is_spendable(&self) -> bool {
        self.spendable && !self.frozen
    }

    /// The on-chain output this entry describes.
    pub fn txout(&self) -> TxOutput {
        TxOutput {
            value: self.value,
            lock: self.address.lock(),
        }
    }
}

/// Selects entries by spendability, confirmations and/or identity.
#[derive(Clone, Debug, Default)]
pub struct UtxoFilter {
    spendable_only: bool,
    min_confirmations: Option<u32>,
    outpoints: Option<BTreeSet<OutPoint>>,
}

impl UtxoFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn spendable(mut self) -> Self {
        self.spendable_only = true;
        self
    }

    pub fn min_confirmations(mut self, confirmations: u32) -> Self {
        self.min_confirmations = Some(confirmations);
        self
    }

    pub fn outpoints(mut self, outpoints: impl IntoIterator<Item = OutPoint>) -> Self {
        self.outpoints = Some(outpoints.into_iter().collect());
        self
    }

    fn matches(&self, utxo: &UnspentOutput) -> bool {
        if self.spendable_only && !utxo.is_spendable() {
            return false;
        }
        if self.min_confirmations.is_some_and(|min| utxo.confirmations < min) {
            return false;
        }
        self.outpoints
            .as_ref()
            .is_none_or(|set| set.contains(&utxo.outpoint))
    }
}

/// Balance summary over one snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    /// Spendable with at least the requested confirmations.
    pub confirmed: u64,
    /// Spendable unconfirmed change.
    pub unconfirmed_change: u64,
    /// Spendable but unconfirmed outputs from others.
    pub unconfirmed_incoming: u64,
    /// Frozen, immature or watch-only.
    pub unspendable: u64,
    pub utxo_count: usize,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed
            .saturating_add(self.unconfirmed_change)
            .saturating_add(self.unconfirmed_incoming)
            .saturating_add(self.unspendable)
    }
}

/// A consistent, immutable view of the ledger at one point in time.
#[derive(Clone, Debug, Default)]
pub struct LedgerSnapshot {
    utxos: Arc<BTreeMap<OutPoint, UnspentOutput>>,
}

impl LedgerSnapshot {
    pub fn get(&self, outpoint: &OutPoint) -> Option<&UnspentOutput> {
        self.utxos.get(outpoint)
    }

    /// Matching entries in outpoint order.
    pub fn query(&self, filter: &UtxoFilter) -> Vec<UnspentOutput> {
        self.utxos
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentOutput> {
        self.utxos.values()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn balance(&self, min_confirmations: u32) -> Balance {
        let mut balance = Balance {
            utxo_count: self.utxos.len(),
            ..Balance::default()
        };
        for utxo in self.utxos.values() {
            let bucket = if !utxo.is_spendable() {
                &mut balance.unspendable
            } else if utxo.confirmations >= min_confirmations {
                &mut balance.confirmed
            } else if utxo.is_change {
                &mut balance.unconfirmed_change
            } else {
                &mut balance.unconfirmed_incoming
            };
            *bucket = bucket.saturating_add(utxo.value);
        }
        balance
    }
}

/// Shared, concurrently readable set of the wallet's unspent outputs.
#[derive(Debug, Default)]
pub struct UtxoLedger {
    current: RwLock<LedgerSnapshot>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from a persisted snapshot.
    pub fn from_outputs(outputs: Vec<UnspentOutput>) -> Result<Self, WalletError> {
        let ledger = Self::new();
        ledger.apply_update(outputs, &[])?;
        Ok(ledger)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.current.read().clone()
    }

    pub fn query(&self, filter: &UtxoFilter) -> Vec<UnspentOutput> {
        self.snapshot().query(filter)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<UnspentOutput> {
        self.snapshot().get(outpoint).cloned()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn balance(&self, min_confirmations: u32) -> Balance {
        self.snapshot().balance(min_confirmations)
    }

    /// Apply one chain update atomically: remove `spent`, then insert `added`.
    ///
    /// An outpoint listed in both replaces the old entry. Adding an outpoint
    /// that is already present (and not spent in the same update), or adding
    /// the same outpoint twice, fails with [`WalletError::DuplicateOutput`]
    /// and leaves the ledger unchanged. Unknown spent outpoints are ignored.
    pub fn apply_update(
        &self,
        added: Vec<UnspentOutput>,
        spent: &[OutPoint],
    ) -> Result<(), WalletError> {
        self.modify(|map| {
            let mut removed = 0usize;
            for outpoint in spent {
                if map.remove(outpoint).is_some() {
                    removed += 1;
                } else {
                    tracing::debug!(%outpoint, "spent outpoint not in ledger");
                }
            }
            let added_count = added.len();
            for utxo in added {
                let outpoint = utxo.outpoint;
                if map.insert(outpoint, utxo).is_some() {
                    return Err(WalletError::DuplicateOutput(outpoint.to_string()));
                }
            }
            tracing::debug!(added = added_count, removed, size = map.len(), "ledger updated");
            Ok(())
        })
    }

    /// Exclude an output from automatic and manual selection.
    pub fn freeze(&self, outpoint: &OutPoint) -> Result<(), WalletError> {
        self.set_frozen(outpoint, true)
    }

    pub fn unfreeze(&self, outpoint: &OutPoint) -> Result<(), WalletError> {
        self.set_frozen(outpoint, false)
    }

    fn set_frozen(&self, outpoint: &OutPoint, frozen: bool) -> Result<(), WalletError> {
        self.modify(|map| {
            let entry = map
                .get(outpoint)
                .ok_or_else(|| WalletError::UnknownOutput(outpoint.to_string()))?;
            let replacement = UnspentOutput {
                frozen,
                ..entry.clone()
            };
            map.insert(*outpoint, replacement);
            tracing::debug!(%outpoint, frozen, "coin control updated");
            Ok(())
        })
    }

    /// Copy-on-write update. Writers are serialized by the upgradable read;
    /// readers proceed against the old map until the final swap.
    fn modify<F>(&self, f: F) -> Result<(), WalletError>
    where
        F: FnOnce(&mut BTreeMap<OutPoint, UnspentOutput>) -> Result<(), WalletError>,
    {
        let guard = self.current.upgradable_read();
        let mut next = (*guard.utxos).clone();
        f(&mut next)?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.utxos = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::address::Network;
    use coffer_core::types::Hash256;

    fn addr() -> Address {
        Address::from_pubkey_hash(Hash256([0x42; 32]), Network::Testnet)
    }

    fn utxo(n: u8, value: u64, confirmations: u32) -> UnspentOutput {
        UnspentOutput::new(OutPoint::new(Hash256([n; 32]), 0), value, addr(), confirmations)
    }

    #[test]
    fn apply_update_adds_and_removes() {
        let ledger = UtxoLedger::new();
        ledger.apply_update(vec![utxo(1, 100, 1), utxo(2, 200, 3)], &[]).unwrap();
        assert_eq!(ledger.len(), 2);

        ledger
            .apply_update(vec![utxo(3, 300, 0)], &[utxo(1, 0, 0).outpoint])
            .unwrap();
        let all = ledger.query(&UtxoFilter::all());
        let values: Vec<u64> = all.iter().map(|u| u.value).collect();
        assert_eq!(values, vec![200, 300]);
    }

    #[test]
    fn duplicate_add_rejected_atomically() {
        let ledger = UtxoLedger::new();
        ledger.apply_update(vec![utxo(1, 100, 1)], &[]).unwrap();
        let err = ledger
            .apply_update(vec![utxo(2, 200, 1), utxo(1, 999, 1)], &[])
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateOutput(_)));
        // Nothing from the failed update is visible.
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&utxo(1, 0, 0).outpoint).unwrap().value, 100);
    }

    #[test]
    fn duplicate_within_one_update_rejected() {
        let ledger = UtxoLedger::new();
        let err = ledger
            .apply_update(vec![utxo(1, 100, 1), utxo(1, 100, 1)], &[])
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateOutput(_)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn spend_and_re_add_replaces_entry() {
        let ledger = UtxoLedger::new();
        ledger.apply_update(vec![utxo(1, 100, 0)], &[]).unwrap();
        let op = utxo(1, 0, 0).outpoint;
        ledger.apply_update(vec![utxo(1, 100, 6)], &[op]).unwrap();
        assert_eq!(ledger.get(&op).unwrap().confirmations, 6);
    }

    #[test]
    fn unknown_spent_ignored() {
        let ledger = UtxoLedger::new();
        ledger.apply_update(vec![], &[utxo(9, 0, 0).outpoint]).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_updates() {
        let ledger = UtxoLedger::new();
        ledger.apply_update(vec![utxo(1, 100, 1)], &[]).unwrap();
        let snap = ledger.snapshot();
        ledger.apply_update(vec![utxo(2, 200, 1)], &[utxo(1, 0, 0).outpoint]).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.iter().next().unwrap().value, 100);
        assert_eq!(ledger.snapshot().iter().next().unwrap().value, 200);
    }

    #[test]
    fn query_filters() {
        let ledger = UtxoLedger::new();
        ledger
            .apply_update(vec![utxo(1, 100, 0), utxo(2, 200, 1), utxo(3, 300, 6)], &[])
            .unwrap();
        ledger.freeze(&utxo(3, 0, 0).outpoint).unwrap();

        let confirmed = ledger.query(&UtxoFilter::all().min_confirmations(1));
        assert_eq!(confirmed.len(), 2);

        let spendable = ledger.query(&UtxoFilter::all().spendable().min_confirmations(1));
        assert_eq!(spendable.len(), 1);
        assert_eq!(spendable[0].value, 200);

        let pinned = ledger.query(&UtxoFilter::all().outpoints([utxo(1, 0, 0).outpoint]));
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].value, 100);
    }

    #[test]
    fn freeze_unfreeze_round_trip() {
        let ledger = UtxoLedger::new();
        let op = utxo(1, 0, 0).outpoint;
        ledger.apply_update(vec![utxo(1, 100, 1)], &[]).unwrap();
        let before = ledger.snapshot();

        ledger.freeze(&op).unwrap();
        assert!(!ledger.get(&op).unwrap().is_spendable());
        // Entries are replaced, not mutated: the old snapshot is untouched.
        assert!(before.get(&op).unwrap().is_spendable());

        ledger.unfreeze(&op).unwrap();
        assert!(ledger.get(&op).unwrap().is_spendable());
    }

    #[test]
    fn freeze_unknown_fails() {
        let ledger = UtxoLedger::new();
        assert!(matches!(
            ledger.freeze(&utxo(1, 0, 0).outpoint).unwrap_err(),
            WalletError::UnknownOutput(_)
        ));
    }

    #[test]
    fn balance_buckets() {
        let mut watch_only = utxo(4, 4_000, 10);
        watch_only.spendable = false;
        let ledger = UtxoLedger::from_outputs(vec![
            utxo(1, 1_000, 2),
            utxo(2, 2_000, 0).as_change(),
            utxo(3, 3_000, 0),
            watch_only,
        ])
        .unwrap();
        let balance = ledger.balance(1);
        assert_eq!(balance.confirmed, 1_000);
        assert_eq!(balance.unconfirmed_change, 2_000);
        assert_eq!(balance.unconfirmed_incoming, 3_000);
        assert_eq!(balance.unspendable, 4_000);
        assert_eq!(balance.utxo_count, 4);
        assert_eq!(balance.total(), 10_000);
    }

    #[test]
    fn txout_uses_address_lock() {
        let u = utxo(1, 500, 1);
        assert_eq!(u.txout(), TxOutput { value: 500, lock: addr().lock() });
    }
}
