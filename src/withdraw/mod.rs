//! Withdrawal engine: profit and principal request validation, the optimistic
//! debit, admin resolution, and the archival drain. Every attempt leaves a
//! queue record: accepted requests enter as `Pending`, ineligible ones as
//! terminal `Rejected` with the reason code, so the queue doubles as the
//! audit trail.

use crate::ledger::{
    Account, AccountSnapshot, Amount, Ledger, LedgerError, Plan, RequestStatus, UserId,
    WithdrawalKind, WithdrawalRequest, DAY_MS, MIN_PROFIT_WITHDRAW,
};

/// Why a request was turned down. Stable machine-checkable codes, stored as
/// the rejected record's `reason`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawRejection {
    BelowMinimum,
    InsufficientProfit,
    NoPayoutAddress,
    NoActivePrincipal,
    LockNotElapsed,
    ReferralRequired,
    ExceedsActivePrincipal,
}

impl WithdrawRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawRejection::BelowMinimum => "below_minimum",
            WithdrawRejection::InsufficientProfit => "insufficient_profit",
            WithdrawRejection::NoPayoutAddress => "no_payout_address",
            WithdrawRejection::NoActivePrincipal => "no_active_principal",
            WithdrawRejection::LockNotElapsed => "lock_not_elapsed",
            WithdrawRejection::ReferralRequired => "referral_required",
            WithdrawRejection::ExceedsActivePrincipal => "exceeds_active_principal",
        }
    }
}

impl std::fmt::Display for WithdrawRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Queued { request_id: String, amount: Amount },
    Rejected { reason: WithdrawRejection },
}

/// Admin decision on a pending request. All three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    Paid,
}

impl Decision {
    fn status(self) -> RequestStatus {
        match self {
            Decision::Approved => RequestStatus::Approved,
            Decision::Rejected => RequestStatus::Rejected,
            Decision::Paid => RequestStatus::Paid,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            "paid" => Ok(Decision::Paid),
            other => Err(format!(
                "unknown decision {other:?} (expected approved, rejected or paid)"
            )),
        }
    }
}

fn snapshot_of(account: &Account, plan: Option<Plan>, now_ms: u64) -> AccountSnapshot {
    // Age of the gating deposit: the oldest active lot of the requested plan,
    // or the account's first lot for profit requests.
    let reference_lot = match plan {
        Some(p) => account.oldest_active_lot(p),
        None => account.investments.first(),
    };
    AccountSnapshot {
        profit_balance: account.balances.profit,
        referral_balance: account.balances.referral,
        active_principal: account.active_principal(),
        days_since_deposit: reference_lot
            .map(|lot| now_ms.saturating_sub(lot.start_at_ms) / DAY_MS),
        referral_counts: account.referral_count_by_plan.clone(),
    }
}

fn push_request(
    ledger: &mut Ledger,
    user_id: UserId,
    kind: WithdrawalKind,
    amount: Amount,
    destination: String,
    plan: Option<Plan>,
    snapshot: AccountSnapshot,
    rejection: Option<WithdrawRejection>,
    now_ms: u64,
) -> WithdrawOutcome {
    let request_id = ledger.mint_request_id();
    let (status, reason) = match rejection {
        Some(r) => (RequestStatus::Rejected, Some(r.as_str().to_string())),
        None => (RequestStatus::Pending, None),
    };
    ledger.withdrawal_queue.push(WithdrawalRequest {
        id: request_id.clone(),
        user_id,
        kind,
        amount,
        destination,
        status,
        reason,
        created_at_ms: now_ms,
        plan,
        snapshot,
    });
    match rejection {
        Some(reason) => WithdrawOutcome::Rejected { reason },
        None => WithdrawOutcome::Queued { request_id, amount },
    }
}

/// Profit withdrawal: needs the minimum amount, sufficient profit balance and
/// a payout address. Accepted requests debit the balance immediately, before
/// admin resolution.
pub fn request_profit(
    ledger: &mut Ledger,
    user_id: UserId,
    amount: Amount,
    now_ms: u64,
) -> Result<WithdrawOutcome, LedgerError> {
    let account = ledger.account(user_id)?;
    let snapshot = snapshot_of(account, None, now_ms);
    let destination = account.payout_address.clone();

    let rejection = if amount < MIN_PROFIT_WITHDRAW {
        Some(WithdrawRejection::BelowMinimum)
    } else if amount > account.balances.profit {
        Some(WithdrawRejection::InsufficientProfit)
    } else if destination.is_empty() {
        Some(WithdrawRejection::NoPayoutAddress)
    } else {
        None
    };

    if rejection.is_none() {
        ledger.account_mut(user_id)?.balances.profit -= amount;
    }
    Ok(push_request(
        ledger,
        user_id,
        WithdrawalKind::Profit,
        amount,
        destination,
        None,
        snapshot,
        rejection,
        now_ms,
    ))
}

/// Principal withdrawal for one plan: needs active principal in that plan, an
/// elapsed lock on its oldest lot, at least one confirmed referral in the
/// plan, and a payout address. On acceptance every active lot of the plan
/// flips inactive (one-way) and the queued amount is their sum.
pub fn request_principal(
    ledger: &mut Ledger,
    user_id: UserId,
    plan: Plan,
    amount: Amount,
    now_ms: u64,
) -> Result<WithdrawOutcome, LedgerError> {
    let account = ledger.account(user_id)?;
    let snapshot = snapshot_of(account, Some(plan), now_ms);
    let destination = account.payout_address.clone();
    let available = account.active_principal_by_plan(plan);

    let rejection = if available == 0 {
        Some(WithdrawRejection::NoActivePrincipal)
    } else if account
        .oldest_active_lot(plan)
        .is_some_and(|lot| lot.lock_until_ms > now_ms)
    {
        Some(WithdrawRejection::LockNotElapsed)
    } else if account.referral_count(plan) < 1 {
        Some(WithdrawRejection::ReferralRequired)
    } else if amount > available {
        Some(WithdrawRejection::ExceedsActivePrincipal)
    } else if destination.is_empty() {
        Some(WithdrawRejection::NoPayoutAddress)
    } else {
        None
    };

    let queued_amount = match rejection {
        Some(_) => amount,
        None => {
            let account = ledger.account_mut(user_id)?;
            let mut released = 0;
            for lot in account
                .investments
                .iter_mut()
                .filter(|lot| lot.active && lot.plan == plan)
            {
                lot.active = false;
                released += lot.amount;
            }
            released
        }
    };
    Ok(push_request(
        ledger,
        user_id,
        WithdrawalKind::Principal,
        queued_amount,
        destination,
        Some(plan),
        snapshot,
        rejection,
        now_ms,
    ))
}

/// Admin resolution: pending requests move forward to exactly one terminal
/// status; anything else is an error. The optimistic debit is never reversed
/// here; a rejected request's funds stay withdrawn (see DESIGN.md).
pub fn resolve<'a>(
    ledger: &'a mut Ledger,
    request_id: &str,
    decision: Decision,
    reason: Option<String>,
) -> Result<&'a WithdrawalRequest, LedgerError> {
    let request = ledger
        .withdrawal_queue
        .iter_mut()
        .find(|r| r.id == request_id)
        .ok_or_else(|| LedgerError::UnknownRequest {
            id: request_id.to_string(),
        })?;
    if request.status != RequestStatus::Pending {
        return Err(LedgerError::RequestNotPending {
            id: request_id.to_string(),
        });
    }
    request.status = decision.status();
    request.reason = reason;
    Ok(request)
}

/// Drains terminal requests created before the cutoff so the store can append
/// them to the archive. Pending requests always stay in the queue.
pub fn archive_resolved(ledger: &mut Ledger, before_ms: u64) -> Vec<WithdrawalRequest> {
    let mut drained = Vec::new();
    ledger.withdrawal_queue.retain(|request| {
        if request.status.is_terminal() && request.created_at_ms < before_ms {
            drained.push(request.clone());
            false
        } else {
            true
        }
    });
    drained
}
