use std::error::Error;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};

use miner_ledger::accrual::TapOutcome;
use miner_ledger::deposit::{DepositOutcome, FileVerifier, TransferVerifier};
use miner_ledger::gate::Gate;
use miner_ledger::ledger::{format_amount, parse_amount, Plan, UserId, DAY_MS};
use miner_ledger::store::JsonStore;
use miner_ledger::withdraw::{Decision, WithdrawOutcome};

#[derive(Parser)]
#[command(
    name = "miner-ledger",
    version,
    about = "Ledger and withdrawal-eligibility engine for a daily-mining investment program"
)]
struct Cli {
    /// Path of the persisted ledger document.
    #[arg(long, default_value = "ledger.json")]
    store: PathBuf,
    /// Deposit wallet address confirmed transfers must arrive at.
    #[arg(long, default_value = "TXRu4QXGhgMtqNF8NaPLSkDU6GPFRnPyA1")]
    wallet: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an account, optionally under a referrer's code.
    CreateAccount {
        user: UserId,
        #[arg(long)]
        referrer: Option<UserId>,
    },
    /// Collect the daily mining profit.
    Tap { user: UserId },
    /// Claim a deposit: the transaction id is verified against the transfers
    /// document first, then the resolved result is submitted to the gate.
    Deposit {
        user: UserId,
        /// Plan price in whole USDT (10, 50 or 100).
        plan: u64,
        tx: String,
        /// Observed-transfers document the verifier reads.
        #[arg(long, default_value = "transfers.json")]
        transfers: PathBuf,
    },
    /// Set the payout address used by withdrawal requests.
    SetAddress { user: UserId, address: String },
    /// Record acceptance of the program terms.
    AcceptTerms { user: UserId },
    /// Request a profit withdrawal.
    WithdrawProfit { user: UserId, amount: String },
    /// Request a principal withdrawal for one plan.
    WithdrawPrincipal {
        user: UserId,
        /// Plan price in whole USDT (10, 50 or 100).
        plan: u64,
        amount: String,
    },
    /// Resolve a pending withdrawal request.
    Resolve {
        request: String,
        /// approved, rejected or paid.
        decision: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Print one account as JSON.
    Show { user: UserId },
    /// Print the withdrawal queue, one JSON object per line.
    Queue,
    /// Move resolved requests older than the cutoff to the archive file.
    Archive {
        #[arg(long, default_value_t = 30)]
        days: u64,
    },
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let gate = Gate::open(JsonStore::new(&cli.store), cli.wallet.clone());
    let now = now_ms();

    match cli.command {
        Command::CreateAccount { user, referrer } => {
            if gate.create_account(user, referrer) {
                println!("account {user} created");
            } else {
                println!("account {user} already exists; referral code ignored");
            }
        }
        Command::Tap { user } => match gate.tap(user, now) {
            TapOutcome::Mined {
                earned,
                profit_balance,
            } => println!(
                "mined → earned {}, profit balance {}",
                format_amount(earned),
                format_amount(profit_balance)
            ),
            TapOutcome::NoActiveInvestment => {
                println!("tap rejected: no active investment")
            }
            TapOutcome::Cooldown { remaining_hours } => {
                println!("tap on cooldown: ready in {remaining_hours}h")
            }
        },
        Command::Deposit {
            user,
            plan,
            tx,
            transfers,
        } => {
            let plan = Plan::from_price(plan)?;
            // Verification runs before the gate so a slow lookup never holds
            // the write lock.
            let verification =
                FileVerifier::load(&transfers).and_then(|verifier| verifier.verify(&tx));
            match gate.submit_deposit(user, plan, &tx, verification, now)? {
                DepositOutcome::Confirmed {
                    lot_id,
                    amount,
                    referral_credited,
                } => {
                    println!(
                        "deposit confirmed → {} ({} USDT plan, lot {})",
                        format_amount(amount),
                        plan,
                        lot_id
                    );
                    if let Some(credit) = referral_credited {
                        println!(
                            "referral commission → {} to {}",
                            format_amount(credit.amount),
                            credit.referrer
                        );
                    }
                }
                DepositOutcome::Rejected { reason } => {
                    println!("deposit rejected: {reason}")
                }
            }
        }
        Command::SetAddress { user, address } => {
            gate.set_payout_address(user, &address)?;
            println!("payout address set for {user}");
        }
        Command::AcceptTerms { user } => {
            gate.accept_terms(user);
            println!("terms accepted by {user}");
        }
        Command::WithdrawProfit { user, amount } => {
            let amount = parse_amount(&amount)?;
            report_withdrawal(gate.request_profit_withdrawal(user, amount, now)?);
        }
        Command::WithdrawPrincipal { user, plan, amount } => {
            let plan = Plan::from_price(plan)?;
            let amount = parse_amount(&amount)?;
            report_withdrawal(gate.request_principal_withdrawal(user, plan, amount, now)?);
        }
        Command::Resolve {
            request,
            decision,
            reason,
        } => {
            let decision: Decision = decision.parse()?;
            let resolved = gate.admin_resolve(&request, decision, reason)?;
            let status = format!("{:?}", resolved.status).to_lowercase();
            println!("request {} → {status}", resolved.id);
        }
        Command::Show { user } => match gate.account(user) {
            Some(account) => println!("{}", serde_json::to_string_pretty(&account)?),
            None => println!("no account {user}"),
        },
        Command::Queue => {
            for request in gate.queue() {
                println!("{}", serde_json::to_string(&request)?);
            }
        }
        Command::Archive { days } => {
            let cutoff = now.saturating_sub(days * DAY_MS);
            let archived = gate.archive_terminal(cutoff)?;
            println!("archived {archived} resolved requests");
        }
    }
    Ok(())
}

fn report_withdrawal(outcome: WithdrawOutcome) {
    match outcome {
        WithdrawOutcome::Queued { request_id, amount } => {
            println!(
                "withdrawal queued → {} for {}",
                request_id,
                format_amount(amount)
            )
        }
        WithdrawOutcome::Rejected { reason } => {
            println!("withdrawal rejected: {reason}")
        }
    }
}
