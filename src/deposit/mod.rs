//! Deposit confirmation pipeline: turns an externally verified transfer into
//! an active investment lot and, when a referrer exists, the matching
//! commission, all in one critical step. Verification itself runs outside
//! the write gate; only its resolved result is submitted here.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ledger::{
    Amount, InvestmentLot, Ledger, LedgerError, Plan, TxId, UserId, AMOUNT_EPSILON, LOCK_MS,
};
use crate::referral;

/// An observed on-chain transfer as reported by the verification collaborator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub confirmed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Found(Transfer),
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("transfer verification timed out")]
    Timeout,
    #[error("transfer record unreadable: {0}")]
    Unreadable(String),
}

/// Collaborator contract for the blockchain transfer lookup. Implementations
/// must bound their own latency; the pipeline never retries, callers
/// resubmit. The call is issued before entering the write gate so one slow
/// lookup cannot block unrelated mutations.
pub trait TransferVerifier {
    fn verify(&self, tx_id: &str) -> Result<Verification, VerifyError>;
}

/// Why a deposit claim was turned down. Stable machine-checkable codes;
/// timeouts, lookup failures and unconfirmed transfers all collapse into
/// `NotVerifiable`, and the user may resubmit once the transfer settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepositRejection {
    NotVerifiable,
    WrongRecipient,
    AmountBelowPlan,
    DuplicateTx,
}

impl DepositRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            DepositRejection::NotVerifiable => "not_verifiable",
            DepositRejection::WrongRecipient => "wrong_recipient",
            DepositRejection::AmountBelowPlan => "amount_below_plan",
            DepositRejection::DuplicateTx => "duplicate_tx",
        }
    }
}

impl std::fmt::Display for DepositRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferralCredit {
    pub referrer: UserId,
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositOutcome {
    Confirmed {
        lot_id: String,
        amount: Amount,
        referral_credited: Option<ReferralCredit>,
    },
    Rejected {
        reason: DepositRejection,
    },
}

/// Validates a deposit claim and, when every check passes, materializes the
/// lot and the referral credit atomically. Checks run in order and the first
/// failure short-circuits with no mutation at all:
/// 1. the transfer exists and is confirmed;
/// 2. it was sent to the program's deposit address;
/// 3. it covers the plan price (1-cent tolerance);
/// 4. its transaction id has never been consumed before.
pub fn confirm(
    ledger: &mut Ledger,
    deposit_address: &str,
    user_id: UserId,
    plan: Plan,
    tx_id: &str,
    verification: Result<Verification, VerifyError>,
    now_ms: u64,
) -> Result<DepositOutcome, LedgerError> {
    if !ledger.contains_account(user_id) {
        return Err(LedgerError::UnknownAccount { user_id });
    }

    let transfer = match verification {
        Ok(Verification::Found(t)) if t.confirmed => t,
        _ => return Ok(rejected(DepositRejection::NotVerifiable)),
    };
    if transfer.to != deposit_address {
        return Ok(rejected(DepositRejection::WrongRecipient));
    }
    if transfer.amount + AMOUNT_EPSILON < plan.price() {
        return Ok(rejected(DepositRejection::AmountBelowPlan));
    }
    if ledger.consumed_tx_ids.contains(tx_id) {
        return Ok(rejected(DepositRejection::DuplicateTx));
    }

    ledger.consumed_tx_ids.insert(tx_id.to_string());
    let lot_id = ledger.mint_lot_id();
    let account = ledger.account_mut(user_id)?;
    account.investments.push(InvestmentLot {
        id: lot_id.clone(),
        plan,
        amount: plan.price(),
        start_at_ms: now_ms,
        lock_until_ms: now_ms + LOCK_MS,
        active: true,
        source_tx_id: tx_id.to_string(),
    });
    let referrer = account.referrer;

    let referral_credited = referrer.and_then(|sponsor_id| {
        ledger.accounts.get_mut(&sponsor_id).map(|sponsor| ReferralCredit {
            referrer: sponsor_id,
            amount: referral::credit(sponsor, plan),
        })
    });

    Ok(DepositOutcome::Confirmed {
        lot_id,
        amount: plan.price(),
        referral_credited,
    })
}

fn rejected(reason: DepositRejection) -> DepositOutcome {
    DepositOutcome::Rejected { reason }
}

/// Verifier backed by a local JSON document of observed transfers, keyed by
/// transaction id. Stands in for the chain-lookup client when operating the
/// CLI; tests use in-memory maps directly.
pub struct FileVerifier {
    transfers: BTreeMap<TxId, Transfer>,
}

impl FileVerifier {
    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let bytes =
            fs::read(path).map_err(|e| VerifyError::Unreadable(format!("{}: {e}", path.display())))?;
        let transfers = serde_json::from_slice(&bytes)
            .map_err(|e| VerifyError::Unreadable(format!("{}: {e}", path.display())))?;
        Ok(Self { transfers })
    }

    pub fn from_map(transfers: BTreeMap<TxId, Transfer>) -> Self {
        Self { transfers }
    }
}

impl TransferVerifier for FileVerifier {
    fn verify(&self, tx_id: &str) -> Result<Verification, VerifyError> {
        Ok(match self.transfers.get(tx_id) {
            Some(transfer) => Verification::Found(transfer.clone()),
            None => Verification::NotFound,
        })
    }
}
