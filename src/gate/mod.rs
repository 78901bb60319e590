//! The single-writer discipline: every mutation enters through one mutex,
//! runs validate → mutate → synchronous save, and releases. No event ever
//! observes an intermediate state, and an accepted mutation is on disk before
//! the gate opens again. Transfer verification happens before the lock is
//! taken; only resolved results come through here.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, warn};

use crate::accrual::{self, TapOutcome};
use crate::deposit::{self, DepositOutcome, Verification, VerifyError};
use crate::ledger::{
    Account, Ledger, LedgerError, Plan, UserId, WithdrawalRequest,
};
use crate::referral;
use crate::store::{JsonStore, StoreError};
use crate::withdraw::{self, Decision, WithdrawOutcome};

#[derive(Clone)]
pub struct Gate {
    inner: Arc<Mutex<Ledger>>,
    store: Arc<JsonStore>,
    deposit_address: String,
}

impl Gate {
    /// Loads the persisted ledger once and takes ownership of the store.
    pub fn open(store: JsonStore, deposit_address: String) -> Self {
        let ledger = store.load();
        Self {
            inner: Arc::new(Mutex::new(ledger)),
            store: Arc::new(store),
            deposit_address,
        }
    }

    /// A poisoned lock means a writer panicked mid-section; the ledger itself
    /// is still the last consistent snapshot, so recover rather than cascade.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("ledger lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Save failures do not roll back the in-memory mutation; memory runs
    /// ahead of disk until the next successful save.
    fn commit(&self, ledger: &Ledger) {
        if let Err(err) = self.store.save(ledger) {
            error!("ledger save failed, in-memory state is ahead of disk: {err}");
        }
    }

    /// First contact creates the account; a referral code only takes effect
    /// on that first contact and is ignored afterwards. Returns whether a new
    /// account was created.
    pub fn create_account(&self, user_id: UserId, referral_code: Option<UserId>) -> bool {
        let mut ledger = self.lock();
        let created = !ledger.contains_account(user_id);
        ledger.ensure_account(user_id);
        if created {
            if let Some(code) = referral_code {
                referral::try_link(&mut ledger.accounts, user_id, code);
            }
            self.commit(&ledger);
        }
        created
    }

    pub fn tap(&self, user_id: UserId, now_ms: u64) -> TapOutcome {
        let mut ledger = self.lock();
        let created = !ledger.contains_account(user_id);
        let account = ledger.ensure_account(user_id);
        let outcome = accrual::tap(account, now_ms);
        if created || matches!(outcome, TapOutcome::Mined { .. }) {
            self.commit(&ledger);
        }
        outcome
    }

    pub fn submit_deposit(
        &self,
        user_id: UserId,
        plan: Plan,
        tx_id: &str,
        verification: Result<Verification, VerifyError>,
        now_ms: u64,
    ) -> Result<DepositOutcome, LedgerError> {
        let mut ledger = self.lock();
        let created = !ledger.contains_account(user_id);
        ledger.ensure_account(user_id);
        let outcome = deposit::confirm(
            &mut ledger,
            &self.deposit_address,
            user_id,
            plan,
            tx_id,
            verification,
            now_ms,
        )?;
        if created || matches!(outcome, DepositOutcome::Confirmed { .. }) {
            self.commit(&ledger);
        }
        Ok(outcome)
    }

    pub fn set_payout_address(&self, user_id: UserId, address: &str) -> Result<(), LedgerError> {
        let mut ledger = self.lock();
        ledger.set_payout_address(user_id, address)?;
        self.commit(&ledger);
        Ok(())
    }

    pub fn accept_terms(&self, user_id: UserId) {
        let mut ledger = self.lock();
        ledger.accept_terms(user_id);
        self.commit(&ledger);
    }

    /// Withdrawal attempts always append a queue record (pending or
    /// rejected), so they always persist.
    pub fn request_profit_withdrawal(
        &self,
        user_id: UserId,
        amount: u64,
        now_ms: u64,
    ) -> Result<WithdrawOutcome, LedgerError> {
        let mut ledger = self.lock();
        ledger.ensure_account(user_id);
        let outcome = withdraw::request_profit(&mut ledger, user_id, amount, now_ms)?;
        self.commit(&ledger);
        Ok(outcome)
    }

    pub fn request_principal_withdrawal(
        &self,
        user_id: UserId,
        plan: Plan,
        amount: u64,
        now_ms: u64,
    ) -> Result<WithdrawOutcome, LedgerError> {
        let mut ledger = self.lock();
        ledger.ensure_account(user_id);
        let outcome = withdraw::request_principal(&mut ledger, user_id, plan, amount, now_ms)?;
        self.commit(&ledger);
        Ok(outcome)
    }

    pub fn admin_resolve(
        &self,
        request_id: &str,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, LedgerError> {
        let mut ledger = self.lock();
        let resolved = withdraw::resolve(&mut ledger, request_id, decision, reason)?.clone();
        self.commit(&ledger);
        Ok(resolved)
    }

    /// Drains old terminal requests into the archive file. When the archive
    /// append fails the drained records are put back so nothing is lost.
    pub fn archive_terminal(&self, before_ms: u64) -> Result<usize, StoreError> {
        let mut ledger = self.lock();
        let drained = withdraw::archive_resolved(&mut ledger, before_ms);
        if drained.is_empty() {
            return Ok(0);
        }
        match self.store.append_archive(&drained) {
            Ok(()) => {
                let count = drained.len();
                self.commit(&ledger);
                Ok(count)
            }
            Err(err) => {
                ledger.withdrawal_queue.extend(drained);
                Err(err)
            }
        }
    }

    pub fn account(&self, user_id: UserId) -> Option<Account> {
        self.lock().accounts.get(&user_id).cloned()
    }

    pub fn queue(&self) -> Vec<WithdrawalRequest> {
        self.lock().withdrawal_queue.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    const WALLET: &str = "TXRu4QXGhgMtqNF8NaPLSkDU6GPFRnPyA1";

    fn temp_gate(tag: &str) -> Gate {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "miner-ledger-gate-{}-{}-{}",
            tag,
            std::process::id(),
            seq
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        Gate::open(JsonStore::new(dir.join("ledger.json")), WALLET.to_string())
    }

    fn fund(gate: &Gate, user: UserId, plan: Plan, tx: &str, now_ms: u64) {
        let verification = Ok(Verification::Found(crate::deposit::Transfer {
            from: "TSenderAddressAAAAAAAAAAAAAAAAAAAA".into(),
            to: WALLET.into(),
            amount: plan.price(),
            confirmed: true,
        }));
        let outcome = gate
            .submit_deposit(user, plan, tx, verification, now_ms)
            .expect("deposit");
        assert!(matches!(outcome, DepositOutcome::Confirmed { .. }));
    }

    #[test]
    fn referral_code_only_counts_on_first_contact() {
        let gate = temp_gate("first-contact");
        assert!(gate.create_account(2, None));
        assert!(gate.create_account(1, Some(2)));
        assert!(!gate.create_account(1, Some(99)));
        let account = gate.account(1).expect("account");
        assert_eq!(account.referrer, Some(2));
    }

    #[test]
    fn concurrent_taps_mine_exactly_once() {
        let gate = temp_gate("racing-taps");
        gate.create_account(1, None);
        fund(&gate, 1, Plan::P100, "tx-1", 0);

        let now = 1_000_000;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(thread::spawn(move || gate.tap(1, now)));
        }
        let outcomes: Vec<TapOutcome> =
            handles.into_iter().map(|h| h.join().expect("join")).collect();

        let mined = outcomes
            .iter()
            .filter(|o| matches!(o, TapOutcome::Mined { .. }))
            .count();
        assert_eq!(mined, 1);
        assert_eq!(gate.account(1).expect("account").balances.profit, 400);
    }

    #[test]
    fn tap_racing_a_profit_withdrawal_stays_consistent() {
        let gate = temp_gate("racing-mixed");
        gate.create_account(1, None);
        gate.set_payout_address(1, WALLET).expect("address");
        fund(&gate, 1, Plan::P100, "tx-1", 0);
        gate.tap(1, 1_000);
        // Profit is 4.00; the withdrawal wants all of it while taps hammer on.
        let w = {
            let gate = gate.clone();
            thread::spawn(move || gate.request_profit_withdrawal(1, 400, 2_000))
        };
        let t = {
            let gate = gate.clone();
            thread::spawn(move || gate.tap(1, 2_000))
        };
        let outcome = w.join().expect("join").expect("request");
        t.join().expect("join");
        // Below the 10.00 minimum: rejected, nothing debited, tap unaffected.
        assert!(matches!(outcome, WithdrawOutcome::Rejected { .. }));
        assert_eq!(gate.account(1).expect("account").balances.profit, 400);
    }

    #[test]
    fn mutations_survive_a_reopened_gate() {
        let gate = temp_gate("reopen");
        let path = gate.store.path().to_path_buf();
        gate.create_account(2, None);
        gate.create_account(1, Some(2));
        fund(&gate, 1, Plan::P100, "tx-1", 0);
        drop(gate);

        let reopened = Gate::open(JsonStore::new(path), WALLET.to_string());
        let account = reopened.account(1).expect("account");
        assert_eq!(account.active_principal(), 10_000);
        let sponsor = reopened.account(2).expect("sponsor");
        assert_eq!(sponsor.balances.referral, 1_000);
        // The duplicate guard also survived.
        let outcome = reopened
            .submit_deposit(
                1,
                Plan::P100,
                "tx-1",
                Ok(Verification::Found(crate::deposit::Transfer {
                    from: "TSenderAddressAAAAAAAAAAAAAAAAAAAA".into(),
                    to: WALLET.into(),
                    amount: 10_000,
                    confirmed: true,
                })),
                1,
            )
            .expect("deposit");
        assert!(matches!(
            outcome,
            DepositOutcome::Rejected {
                reason: crate::deposit::DepositRejection::DuplicateTx
            }
        ));
    }
}
