//! Transaction builder: turns a selection and recipients into a draft.
//!
//! All validation happens here, before any signing cost is paid:
//! 1. Recipients are non-empty, positive, non-dust, unique and on the
//!    wallet's network
//! 2. The selection was made for exactly the recipients' total
//! 3. Inputs cover outputs plus fee, with nothing left over
//! 4. The fee sits between the relay floor and the absurd-fee ceiling
//! 5. Change goes to an owned address on the wallet's network, or to a
//!    custom address the caller explicitly confirmed

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use coffer_core::address::{Address, Network};
use coffer_core::constants::{money_range, CURRENT_TX_VERSION, MAX_INPUTS, MAX_OUTPUTS, SEQUENCE_FINAL};
use coffer_core::error::TransactionError;
use coffer_core::types::{Hash256, Transaction, TxInput, TxOutput, Witness};

use crate::coin_selection::SelectionResult;
use crate::error::{ValidationError, WalletError};
use crate::fee::{estimate_size, is_dust, FeePolicy, FeeRate};

/// A payment destination. Label and message are display-only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Recipient {
    pub fn new(address: Address, amount: u64) -> Self {
        Self {
            address,
            amount,
            label: None,
            message: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Where change goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDestination {
    /// A wallet-owned address; ownership is checked at build time.
    Wallet(Address),
    /// A user-supplied address, accepted only once the user confirmed it.
    Custom { address: Address, confirmed: bool },
}

impl ChangeDestination {
    pub fn address(&self) -> &Address {
        match self {
            ChangeDestination::Wallet(address) | ChangeDestination::Custom { address, .. } => address,
        }
    }
}

/// Answers whether an address belongs to the wallet.
pub trait AddressOwnership {
    fn is_mine(&self, address: &Address) -> bool;
}

/// Where to put the change output among the recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangePosition {
    /// Uniformly random slot, so change is not always last.
    #[default]
    Random,
    Last,
}

/// Lifecycle of a draft; only ever moves forward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DraftStage {
    Drafted,
    PartiallySigned,
    FullySigned,
    Finalized,
}

/// A built transaction together with the outputs its inputs spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftTransaction {
    tx: Transaction,
    spent: Vec<TxOutput>,
    fee: u64,
    change_index: Option<usize>,
    stage: DraftStage,
}

impl DraftTransaction {
    pub(crate) fn from_parts(
        tx: Transaction,
        spent: Vec<TxOutput>,
        fee: u64,
        change_index: Option<usize>,
        stage: DraftStage,
    ) -> Self {
        Self {
            tx,
            spent,
            fee,
            change_index,
            stage,
        }
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// The output spent by each input, index-aligned with `tx().inputs`.
    pub fn spent_outputs(&self) -> &[TxOutput] {
        &self.spent
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn change_index(&self) -> Option<usize> {
        self.change_index
    }

    pub fn change_amount(&self) -> u64 {
        self.change_index
            .and_then(|i| self.tx.outputs.get(i))
            .map_or(0, |out| out.value)
    }

    pub fn stage(&self) -> DraftStage {
        self.stage
    }

    pub fn txid(&self) -> Hash256 {
        self.tx.txid()
    }

    pub fn total_input(&self) -> u64 {
        self.spent.iter().map(|o| o.value).sum()
    }

    pub fn is_finalized(&self) -> bool {
        self.stage == DraftStage::Finalized
    }

    /// The broadcastable transaction. Only meaningful once finalized.
    pub fn into_transaction(self) -> Transaction {
        self.tx
    }
}

/// Assembles [`DraftTransaction`]s.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network: Network,
    fee_policy: FeePolicy,
    change_position: ChangePosition,
    change: Option<ChangeDestination>,
    lock_time: u32,
}

impl TransactionBuilder {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            fee_policy: FeePolicy::default(),
            change_position: ChangePosition::default(),
            change: None,
            lock_time: 0,
        }
    }

    pub fn fee_policy(mut self, policy: FeePolicy) -> Self {
        self.fee_policy = policy;
        self
    }

    pub fn change_position(mut self, position: ChangePosition) -> Self {
        self.change_position = position;
        self
    }

    pub fn change_destination(mut self, destination: ChangeDestination) -> Self {
        self.change = Some(destination);
        self
    }

    pub fn lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = lock_time;
        self
    }

    /// Check recipients on their own and return their total.
    ///
    /// Dust is judged at the selection's fee rate, so this takes it as input.
    pub fn validate_recipients(
        &self,
        recipients: &[Recipient],
        fee_rate: FeeRate,
    ) -> Result<u64, ValidationError> {
        if recipients.is_empty() {
            return Err(ValidationError::NoRecipients);
        }
        let mut seen = HashSet::with_capacity(recipients.len());
        let mut total: u64 = 0;
        for (index, r) in recipients.iter().enumerate() {
            if r.amount == 0 {
                return Err(ValidationError::ZeroAmount { index });
            }
            if is_dust(r.amount, fee_rate) {
                return Err(ValidationError::DustAmount { index, amount: r.amount });
            }
            if r.address.network() != self.network {
                return Err(ValidationError::WrongNetwork {
                    index,
                    expected: self.network.to_string(),
                    found: r.address.network().to_string(),
                });
            }
            if !seen.insert(r.address) {
                return Err(ValidationError::DuplicateRecipient(r.address.to_string()));
            }
            total = total
                .checked_add(r.amount)
                .filter(|t| money_range(*t))
                .ok_or(ValidationError::AmountOverflow)?;
        }
        Ok(total)
    }

    /// Check everything about a draft that does not depend on the change
    /// destination, and return the recipients' total.
    ///
    /// Callers that draw a change address from a pool run this first, so a
    /// doomed build consumes nothing.
    pub fn check_selection(
        &self,
        selection: &SelectionResult,
        recipients: &[Recipient],
    ) -> Result<u64, WalletError> {
        let recipients_total = self.validate_recipients(recipients, selection.fee_rate)?;
        if selection.target != recipients_total {
            return Err(ValidationError::SelectionMismatch {
                selected: selection.target,
                recipients: recipients_total,
            }
            .into());
        }
        if selection.selected.is_empty() {
            return Err(ValidationError::NoInputs.into());
        }

        let total_input = selection
            .selected
            .iter()
            .try_fold(0u64, |acc, u| acc.checked_add(u.value))
            .ok_or(ValidationError::AmountOverflow)?;
        let spent_total = recipients_total
            .checked_add(selection.fee)
            .and_then(|t| t.checked_add(selection.change))
            .ok_or(ValidationError::AmountOverflow)?;
        if total_input != spent_total {
            return Err(ValidationError::ValueNotConserved {
                inputs: total_input,
                outputs: recipients_total.saturating_add(selection.change),
                fee: selection.fee,
            }
            .into());
        }
        if selection.has_change() && is_dust(selection.change, selection.fee_rate) {
            return Err(ValidationError::DustChange(selection.change).into());
        }

        let output_count = recipients.len() + usize::from(selection.has_change());
        if selection.selected.len() > MAX_INPUTS {
            return Err(TransactionError::TooManyInputs(selection.selected.len()).into());
        }
        if output_count > MAX_OUTPUTS {
            return Err(TransactionError::TooManyOutputs(output_count).into());
        }
        let size = estimate_size(selection.selected.len(), output_count);
        self.fee_policy.check_fee(selection.fee, size)?;
        Ok(recipients_total)
    }

    /// Build a draft spending `selection` to `recipients`.
    pub fn build(
        &self,
        selection: &SelectionResult,
        recipients: &[Recipient],
        ownership: &dyn AddressOwnership,
    ) -> Result<DraftTransaction, WalletError> {
        self.check_selection(selection, recipients)?;
        let change_output = if selection.has_change() {
            Some(self.change_output(selection, ownership)?)
        } else {
            None
        };

        let mut outputs: Vec<TxOutput> = recipients
            .iter()
            .map(|r| TxOutput {
                value: r.amount,
                lock: r.address.lock(),
            })
            .collect();
        let change_index = change_output.map(|out| {
            let index = match self.change_position {
                ChangePosition::Last => outputs.len(),
                ChangePosition::Random => rand::thread_rng().gen_range(0..=outputs.len()),
            };
            outputs.insert(index, out);
            index
        });

        let inputs = selection
            .selected
            .iter()
            .map(|u| TxInput {
                previous_output: u.outpoint,
                sequence: SEQUENCE_FINAL,
                witness: Witness::default(),
            })
            .collect();
        let tx = Transaction {
            version: CURRENT_TX_VERSION,
            inputs,
            outputs,
            lock_time: self.lock_time,
        };
        tx.check_structure()?;

        let spent = selection.selected.iter().map(|u| u.txout()).collect();
        let draft = DraftTransaction::from_parts(tx, spent, selection.fee, change_index, DraftStage::Drafted);
        tracing::debug!(
            txid = %draft.txid(),
            inputs = draft.tx().inputs.len(),
            outputs = draft.tx().outputs.len(),
            fee = draft.fee(),
            change_index = ?draft.change_index(),
            "draft built"
        );
        Ok(draft)
    }

    fn change_output(
        &self,
        selection: &SelectionResult,
        ownership: &dyn AddressOwnership,
    ) -> Result<TxOutput, ValidationError> {
        let destination = self.change.as_ref().ok_or(ValidationError::MissingChangeAddress)?;
        let address = destination.address();
        if address.network() != self.network {
            return Err(ValidationError::ChangeWrongNetwork {
                expected: self.network.to_string(),
                found: address.network().to_string(),
            });
        }
        match destination {
            ChangeDestination::Wallet(address) if !ownership.is_mine(address) => {
                return Err(ValidationError::ChangeNotOwned(address.to_string()));
            }
            ChangeDestination::Custom { confirmed: false, .. } => {
                return Err(ValidationError::UnconfirmedCustomChange);
            }
            _ => {}
        }
        Ok(TxOutput {
            value: selection.change,
            lock: address.lock(),
        })
    }
}
