//! Ledger & withdrawal-eligibility engine for a daily-mining investment
//! program.
//!
//! The crate is organized as a small set of focused modules, leaves first:
//!
//! * [`ledger`] — the account data model and the in-memory aggregate: plans,
//!   balances, investment lots, the withdrawal queue, consumed transaction
//!   ids.
//! * [`referral`] — referrer assignment and deposit-time commissions.
//! * [`accrual`] — the daily mining tap state machine.
//! * [`deposit`] — the deposit confirmation pipeline and the transfer
//!   verification collaborator contract.
//! * [`withdraw`] — profit/principal withdrawal requests, admin resolution,
//!   archival.
//! * [`store`] — the persisted JSON document behind all of it.
//! * [`gate`] — the single-writer critical section every mutation goes
//!   through.
//!
//! Engines take the current time as an explicit argument and never read the
//! clock themselves; the binary samples it once per inbound event.

pub mod accrual;
pub mod deposit;
pub mod gate;
pub mod ledger;
pub mod referral;
pub mod store;
pub mod withdraw;

pub use ledger::LedgerError;
