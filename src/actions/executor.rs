//! Sequential action executor.

use anyhow::{bail, Result};
use tracing::{error, info};

use super::workflows::{big_three, bulk_trade};
use super::Action;
use crate::session::{FidelitySession, TransferPlan};

/// Operator decisions needed while actions run.
pub trait Operator {
    /// Approve the plan of a many-to-one transfer before money moves.
    fn confirm_transfer_plan(&mut self, plan: &TransferPlan) -> bool;
}

/// What happened to a batch of actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSummary {
    pub completed: usize,
    /// Action description and error.
    pub failed: Vec<(String, String)>,
    /// An `Exit` action was reached.
    pub exited: bool,
}

impl ExecutionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One step of a batch. The session is the real runner.
trait StepRunner {
    async fn run_step(&mut self, action: &Action, operator: &mut dyn Operator) -> Result<()>;
}

impl StepRunner for FidelitySession {
    async fn run_step(&mut self, action: &Action, operator: &mut dyn Operator) -> Result<()> {
        run_one(self, action, operator).await
    }
}

/// Run `actions` in order. A failing action is logged and reported but
/// does not stop the rest; `Exit` does.
pub async fn execute(
    session: &mut FidelitySession,
    actions: &[Action],
    operator: &mut dyn Operator,
) -> ExecutionSummary {
    run_steps(session, actions, operator).await
}

async fn run_steps<R: StepRunner>(
    runner: &mut R,
    actions: &[Action],
    operator: &mut dyn Operator,
) -> ExecutionSummary {
    let mut summary = ExecutionSummary::default();
    for action in actions {
        if *action == Action::Exit {
            summary.exited = true;
            break;
        }
        info!(%action, "Running action");
        match runner.run_step(action, operator).await {
            Ok(()) => summary.completed += 1,
            Err(e) => {
                let reason = format!("{e:#}");
                error!(%action, error = %reason, "Action failed");
                println!("✗ {action} failed: {reason}");
                summary.failed.push((action.to_string(), reason));
            }
        }
    }
    summary
}

async fn run_one(
    session: &mut FidelitySession,
    action: &Action,
    operator: &mut dyn Operator,
) -> Result<()> {
    match action {
        Action::OpenAccount(account_type) => {
            let account = session.open_account(*account_type).await?;
            println!("Opened {account_type} account {account}");
        }
        Action::Transfer {
            source,
            destination,
            amount,
        } => {
            session.transfer_acc_to_acc(source, destination, *amount).await?;
            println!("✓ Transferred ${amount:.2} from {source} to {destination}");
        }
        Action::EnablePennyStock(account) => {
            session.enable_pennystock_trading(account).await?;
            println!("✓ Penny stock trading enabled for {account}");
        }
        Action::EnableAllPennyStock => {
            let enabled = session.enable_all_pennystock_trading().await?;
            for account in enabled {
                println!("✓ Penny stock trading enabled for {account}");
            }
        }
        Action::ListPositions => {
            session.get_account_info().await?;
            print_holdings(session);
        }
        Action::ListAccounts => {
            let store = session.get_list_of_accounts(false).await?;
            println!("\nAccounts:");
            for (account, record) in store.iter() {
                println!(
                    "  {account}  {}",
                    record.nickname.as_deref().unwrap_or("(no nickname)")
                );
            }
        }
        Action::Nickname { account, nickname } => {
            session.nickname_account(account, nickname).await?;
            println!("✓ {account} renamed to {nickname}");
        }
        Action::TransferSourceToAll { source, amount } => {
            let report = session.transfer_from_source_to_all(source, *amount).await?;
            println!("\n{report}");
            if !report.all_succeeded() {
                bail!("{} transfer(s) failed", report.failed.len());
            }
        }
        Action::TransferAllToSource {
            destination,
            amount,
        } => {
            let report = session
                .transfer_from_all_to_source(destination, *amount, |plan| {
                    operator.confirm_transfer_plan(plan)
                })
                .await?;
            println!("\n{report}");
            if !report.all_succeeded() {
                bail!("{} transfer(s) failed", report.failed.len());
            }
        }
        Action::BulkTrade {
            side,
            ticker,
            quantity,
        } => {
            let report = bulk_trade(session, *side, ticker, *quantity).await?;
            if !report.all_succeeded() {
                bail!("{} order(s) failed", report.failed.len());
            }
        }
        Action::BigThree {
            account_type,
            transfer_amount,
        } => {
            big_three(session, *account_type, *transfer_amount).await?;
        }
        Action::DownloadStatement(period) => {
            let path = session.download_prev_statement(*period).await?;
            println!("Statement saved to {}", path.display());
        }
        Action::Pause => session.pause().await?,
        Action::Exit => {}
    }
    Ok(())
}

fn print_holdings(session: &FidelitySession) {
    let holdings = session.summary_holdings();
    if holdings.is_empty() {
        println!("\nNo positions found");
        return;
    }
    println!("\nHoldings across all accounts:");
    for (ticker, h) in &holdings {
        println!(
            "  {ticker:<8} qty {:>12.4}  last ${:>10.2}  value ${:>12.2}",
            h.quantity, h.last_price, h.value
        );
    }
    println!("Total balance: ${:.2}", session.store().total_balance());
}
