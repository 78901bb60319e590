//! Daily mining tap: the only way profit accrues. Each account is either in
//! cooldown (tapped less than 24h ago) or ready; a successful tap credits one
//! day of profit on the total active principal and restarts the cooldown.

use crate::ledger::{Account, Amount, DAILY_RATE_BPS, HOUR_MS, TAP_COOLDOWN_MS};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapOutcome {
    /// Profit credited; cooldown restarted.
    Mined {
        earned: Amount,
        profit_balance: Amount,
    },
    /// Ready, but nothing to mine on. No state change.
    NoActiveInvestment,
    /// Tapped during cooldown. No state change; wait is rounded up to whole
    /// hours.
    Cooldown { remaining_hours: u64 },
}

pub fn tap(account: &mut Account, now_ms: u64) -> TapOutcome {
    if account.last_mine_at_ms > 0 {
        let elapsed = now_ms.saturating_sub(account.last_mine_at_ms);
        if elapsed < TAP_COOLDOWN_MS {
            let remaining = TAP_COOLDOWN_MS - elapsed;
            return TapOutcome::Cooldown {
                remaining_hours: remaining.div_ceil(HOUR_MS),
            };
        }
    }
    let principal = account.active_principal();
    if principal == 0 {
        return TapOutcome::NoActiveInvestment;
    }
    let earned = principal * DAILY_RATE_BPS / 10_000;
    account.balances.profit += earned;
    account.last_mine_at_ms = now_ms;
    TapOutcome::Mined {
        earned,
        profit_balance: account.balances.profit,
    }
}
