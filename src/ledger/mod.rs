use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type TxId = String;
pub type Amount = u64;

pub const USD_SCALE: u64 = 100; // 1 USDT = 100 minimal units

/// Daily mining profit, applied to the total active principal on each tap.
pub const DAILY_RATE_BPS: u64 = 400;
/// One-time commission credited to a referrer when a referred deposit confirms.
pub const REFERRAL_RATE_BPS: u64 = 1000;
/// Smallest profit amount a withdrawal request may ask for.
pub const MIN_PROFIT_WITHDRAW: Amount = 10 * USD_SCALE;
/// Principal lock period, counted from deposit confirmation.
pub const LOCK_DAYS: u64 = 15;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;
pub const LOCK_MS: u64 = LOCK_DAYS * DAY_MS;
pub const TAP_COOLDOWN_MS: u64 = DAY_MS;

/// Tolerance when comparing an observed transfer against a plan price.
pub const AMOUNT_EPSILON: Amount = 1;
/// Shorter payout addresses are rejected as malformed (TRC20 addresses are 34).
pub const MIN_ADDRESS_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown account {user_id}")]
    UnknownAccount { user_id: UserId },
    #[error("unknown withdrawal request {id}")]
    UnknownRequest { id: String },
    #[error("withdrawal request {id} is not pending")]
    RequestNotPending { id: String },
    #[error("payout address is {len} characters, minimum is {min}", min = MIN_ADDRESS_LEN)]
    AddressTooShort { len: usize },
    #[error("malformed amount {0:?} (expected a positive value with at most 2 decimals)")]
    MalformedAmount(String),
    #[error("no plan priced at {0} USDT")]
    UnknownPlan(u64),
}

/// Fixed price tiers of the program. Every confirmed deposit buys exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Plan {
    #[serde(rename = "10")]
    P10,
    #[serde(rename = "50")]
    P50,
    #[serde(rename = "100")]
    P100,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::P10, Plan::P50, Plan::P100];

    /// Price of the tier in minimal units.
    pub fn price(self) -> Amount {
        match self {
            Plan::P10 => 10 * USD_SCALE,
            Plan::P50 => 50 * USD_SCALE,
            Plan::P100 => 100 * USD_SCALE,
        }
    }

    /// Looks a tier up by its whole-USDT price, as users name plans.
    pub fn from_price(usd: u64) -> Result<Plan, LedgerError> {
        Plan::ALL
            .into_iter()
            .find(|p| p.price() == usd * USD_SCALE)
            .ok_or(LedgerError::UnknownPlan(usd))
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.price() / USD_SCALE)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balances {
    pub profit: Amount,
    pub referral: Amount,
}

/// One confirmed deposit. Immutable except the one-way `active` flip performed
/// by a principal withdrawal; never reactivated, never deleted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvestmentLot {
    pub id: String,
    pub plan: Plan,
    pub amount: Amount,
    pub start_at_ms: u64,
    pub lock_until_ms: u64,
    pub active: bool,
    pub source_tx_id: TxId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub user_id: UserId,
    /// Empty until the user sets one; withdrawal requests require it.
    pub payout_address: String,
    pub balances: Balances,
    pub investments: Vec<InvestmentLot>,
    /// Assigned at most once, at first contact. Never reassigned, never self.
    pub referrer: Option<UserId>,
    pub referrals: BTreeSet<UserId>,
    /// Confirmed referred deposits per plan. Monotonic; later withdrawals by
    /// the referee never decrement it.
    pub referral_count_by_plan: BTreeMap<Plan, u32>,
    /// 0 = never tapped.
    pub last_mine_at_ms: u64,
    pub terms_accepted: bool,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            payout_address: String::new(),
            balances: Balances::default(),
            investments: Vec::new(),
            referrer: None,
            referrals: BTreeSet::new(),
            referral_count_by_plan: BTreeMap::new(),
            last_mine_at_ms: 0,
            terms_accepted: false,
        }
    }

    /// Sum of `amount` over active lots, across all plans.
    pub fn active_principal(&self) -> Amount {
        self.investments
            .iter()
            .filter(|lot| lot.active)
            .map(|lot| lot.amount)
            .sum()
    }

    /// Sum of `amount` over active lots of one plan.
    pub fn active_principal_by_plan(&self, plan: Plan) -> Amount {
        self.investments
            .iter()
            .filter(|lot| lot.active && lot.plan == plan)
            .map(|lot| lot.amount)
            .sum()
    }

    /// Earliest-started active lot of a plan, the one whose lock gates
    /// principal withdrawal. Lots are appended in confirmation order, so the
    /// first match is the oldest.
    pub fn oldest_active_lot(&self, plan: Plan) -> Option<&InvestmentLot> {
        self.investments
            .iter()
            .find(|lot| lot.active && lot.plan == plan)
    }

    pub fn referral_count(&self, plan: Plan) -> u32 {
        self.referral_count_by_plan.get(&plan).copied().unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalKind {
    Profit,
    Principal,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        self != RequestStatus::Pending
    }
}

/// Audit copy of the requesting account's financial state, frozen at request
/// time before any optimistic debit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub profit_balance: Amount,
    pub referral_balance: Amount,
    pub active_principal: Amount,
    pub days_since_deposit: Option<u64>,
    pub referral_counts: BTreeMap<Plan, u32>,
}

/// A queued withdrawal. `amount`, `kind` and `user_id` are immutable once
/// created; only `status` and `reason` move, and only forward out of
/// `Pending`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub id: String,
    pub user_id: UserId,
    pub kind: WithdrawalKind,
    pub amount: Amount,
    pub destination: String,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub created_at_ms: u64,
    pub plan: Option<Plan>,
    pub snapshot: AccountSnapshot,
}

/// The in-memory aggregate behind the write gate: every account, the consumed
/// transaction identifiers, and the withdrawal queue. Persisted wholesale as
/// one document after each accepted mutation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    pub accounts: BTreeMap<UserId, Account>,
    pub consumed_tx_ids: BTreeSet<TxId>,
    pub withdrawal_queue: Vec<WithdrawalRequest>,
    #[serde(default)]
    pub next_lot_seq: u64,
    #[serde(default)]
    pub next_request_seq: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_account(&self, user_id: UserId) -> bool {
        self.accounts.contains_key(&user_id)
    }

    /// First contact creates the record; later contacts return it unchanged.
    pub fn ensure_account(&mut self, user_id: UserId) -> &mut Account {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id))
    }

    pub fn account(&self, user_id: UserId) -> Result<&Account, LedgerError> {
        self.accounts
            .get(&user_id)
            .ok_or(LedgerError::UnknownAccount { user_id })
    }

    pub fn account_mut(&mut self, user_id: UserId) -> Result<&mut Account, LedgerError> {
        self.accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::UnknownAccount { user_id })
    }

    pub fn set_payout_address(
        &mut self,
        user_id: UserId,
        address: &str,
    ) -> Result<(), LedgerError> {
        if address.len() < MIN_ADDRESS_LEN {
            return Err(LedgerError::AddressTooShort {
                len: address.len(),
            });
        }
        let account = self.ensure_account(user_id);
        account.payout_address = address.to_string();
        Ok(())
    }

    pub fn accept_terms(&mut self, user_id: UserId) {
        self.ensure_account(user_id).terms_accepted = true;
    }

    pub fn mint_lot_id(&mut self) -> String {
        self.next_lot_seq += 1;
        format!("lot-{:06}", self.next_lot_seq)
    }

    pub fn mint_request_id(&mut self) -> String {
        self.next_request_seq += 1;
        format!("wd-{:06}", self.next_request_seq)
    }
}

/// Parses a user-facing decimal amount ("15", "15.5", "15.50") into minimal
/// units. At most two decimals; zero and malformed input are rejected.
pub fn parse_amount(s: &str) -> Result<Amount, LedgerError> {
    let malformed = || LedgerError::MalformedAmount(s.to_string());
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() || frac.len() > 2 {
        return Err(malformed());
    }
    let whole: u64 = whole.parse().map_err(|_| malformed())?;
    let frac_cents: u64 = if frac.is_empty() {
        0
    } else {
        let parsed: u64 = frac.parse().map_err(|_| malformed())?;
        if frac.len() == 1 {
            parsed * 10
        } else {
            parsed
        }
    };
    let cents = whole
        .checked_mul(USD_SCALE)
        .and_then(|c| c.checked_add(frac_cents))
        .ok_or_else(malformed)?;
    if cents == 0 {
        return Err(malformed());
    }
    Ok(cents)
}

/// Renders minimal units back as a two-decimal string.
pub fn format_amount(cents: Amount) -> String {
    format!("{}.{:02}", cents / USD_SCALE, cents % USD_SCALE)
}
