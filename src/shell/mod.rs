//! Interactive menu shell.
//!
//! The menus build one [`Action`] at a time. [`run_credential_set`] opens a
//! browser session the first time an action needs one, logs in, runs each
//! new action and keeps the session until the operator exits.

pub mod prompt;

use anyhow::Result;
use tracing::{info, warn};

use crate::actions::{self, Action, Operator};
use crate::config::{AppConfig, Credentials};
use crate::login::LoginStatus;
use crate::session::{FidelitySession, StatementPeriod, TransferPlan};
use crate::types::{AccountType, TradeSide};

use prompt::{prompt, prompt_positive_amount, prompt_select, prompt_yes_no};

const MAIN_MENU: [&str; 7] = [
    "Account Management",
    "Transfer Operations",
    "Trading Operations",
    "Account Information",
    "Quick Actions",
    "Pause Browser",
    "Exit",
];

const ACCOUNT_MANAGEMENT_MENU: [&str; 5] = [
    "Create New Account",
    "Nickname Account",
    "Enable Penny Stock Trading",
    "Enable All Penny Stock Trading",
    "Back to Main Menu",
];

const TRANSFER_MENU: [&str; 4] = [
    "Transfer Between Accounts",
    "Transfer from Source to All Accounts",
    "Transfer from All Accounts to Source",
    "Back to Main Menu",
];

const ACCOUNT_INFO_MENU: [&str; 4] = [
    "List Account Positions",
    "Get List of Accounts",
    "Download Monthly Statement",
    "Back to Main Menu",
];

const QUICK_ACTIONS_MENU: [&str; 3] = [
    "The Big Three (Roth)",
    "The Big Three (Brokerage)",
    "Back to Main Menu",
];

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{title:^60}");
    println!("{}", "=".repeat(60));
}

/// Menu front end for one credential set.
pub struct Shell {
    source_account: Option<String>,
}

impl Shell {
    pub fn new(source_account: Option<String>) -> Self {
        Self { source_account }
    }

    /// Show the menus until the operator picks a complete action.
    pub fn next_action(&self) -> Result<Action> {
        if let Some(source) = &self.source_account {
            println!("\nUsing source account: {source}");
        }
        loop {
            print_header("FIDELITY AUTOMATION MENU");
            let choice = prompt_select("Select a category", &MAIN_MENU, 0)?;
            let action = match choice {
                0 => self.account_management()?,
                1 => self.transfer_operations()?,
                2 => self.trading_operations()?,
                3 => self.account_information()?,
                4 => self.quick_actions()?,
                5 => Some(Action::Pause),
                _ => Some(Action::Exit),
            };
            if let Some(action) = action {
                return Ok(action);
            }
        }
    }

    fn account_management(&self) -> Result<Option<Action>> {
        loop {
            print_header("ACCOUNT MANAGEMENT");
            let action = match prompt_select("Select an option", &ACCOUNT_MANAGEMENT_MENU, 0)? {
                0 => {
                    let answer = prompt("Enter account type (roth/brokerage)")?;
                    match answer.parse::<AccountType>() {
                        Ok(account_type) => Action::OpenAccount(account_type),
                        Err(e) => {
                            println!("{e}");
                            continue;
                        }
                    }
                }
                1 => Action::Nickname {
                    account: prompt("Enter account number")?,
                    nickname: prompt("Enter new nickname")?,
                },
                2 => Action::EnablePennyStock(prompt("Enter account number")?),
                3 => Action::EnableAllPennyStock,
                _ => return Ok(None),
            };
            return Ok(Some(action));
        }
    }

    fn source_or_prompt(&self, question: &str) -> Result<String> {
        match &self.source_account {
            Some(source) => Ok(source.clone()),
            None => prompt(question),
        }
    }

    fn transfer_operations(&self) -> Result<Option<Action>> {
        loop {
            print_header("TRANSFER OPERATIONS");
            let action = match prompt_select("Select an option", &TRANSFER_MENU, 0)? {
                0 => {
                    let source = self.source_or_prompt("Enter source account")?;
                    let destination = prompt("Enter destination account")?;
                    let amount = prompt_positive_amount("Enter transfer amount: $")?;
                    Action::Transfer {
                        source,
                        destination,
                        amount,
                    }
                }
                1 => {
                    let source = self.source_or_prompt("Enter source account")?;
                    let amount = prompt_positive_amount("Enter amount per account: $")?;
                    if !prompt_yes_no(&format!(
                        "Confirm transfer of ${amount:.2} from {source} to each eligible account?"
                    ))? {
                        continue;
                    }
                    Action::TransferSourceToAll { source, amount }
                }
                2 => {
                    let destination = self.source_or_prompt("Enter destination account")?;
                    let amount =
                        prompt_positive_amount("Enter amount to transfer from each account: $")?;
                    if !prompt_yes_no(&format!(
                        "Confirm transfer of ${amount:.2} from each eligible account to {destination}?"
                    ))? {
                        continue;
                    }
                    Action::TransferAllToSource {
                        destination,
                        amount,
                    }
                }
                _ => return Ok(None),
            };
            return Ok(Some(action));
        }
    }

    fn trading_operations(&self) -> Result<Option<Action>> {
        print_header("TRADING OPERATIONS");
        let side = match prompt("Enter action (buy/sell)")?.parse::<TradeSide>() {
            Ok(side) => side,
            Err(_) => {
                println!("Invalid action. Please enter 'buy' or 'sell'");
                return Ok(None);
            }
        };
        let ticker = prompt("Enter stock symbol")?.to_uppercase();
        let quantity = prompt_positive_amount(&format!(
            "Enter quantity to {} per account",
            side.ticket_label().to_lowercase()
        ))?;
        let confirmed = prompt_yes_no(&format!(
            "Confirm bulk {side} of {quantity} shares of {ticker} in all eligible accounts?"
        ))?;
        Ok(confirmed.then_some(Action::BulkTrade {
            side,
            ticker,
            quantity,
        }))
    }

    fn account_information(&self) -> Result<Option<Action>> {
        loop {
            print_header("ACCOUNT INFORMATION");
            let action = match prompt_select("Select an option", &ACCOUNT_INFO_MENU, 0)? {
                0 => Action::ListPositions,
                1 => Action::ListAccounts,
                2 => match StatementPeriod::parse(&prompt("Enter statement month (MM/YYYY)")?) {
                    Ok(period) => Action::DownloadStatement(period),
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                },
                _ => return Ok(None),
            };
            return Ok(Some(action));
        }
    }

    fn quick_actions(&self) -> Result<Option<Action>> {
        print_header("QUICK ACTIONS");
        let account_type = match prompt_select("Select an option", &QUICK_ACTIONS_MENU, 0)? {
            0 => AccountType::Roth,
            1 => AccountType::Brokerage,
            _ => return Ok(None),
        };
        let transfer_amount = if prompt_yes_no("Transfer money?")? {
            Some(prompt_positive_amount("How much to transfer?")?)
        } else {
            None
        };
        Ok(Some(Action::BigThree {
            account_type,
            transfer_amount,
        }))
    }
}

impl Operator for Shell {
    fn confirm_transfer_plan(&mut self, plan: &TransferPlan) -> bool {
        println!("\n{plan}");
        match prompt_yes_no("Proceed with transfers?") {
            Ok(true) => true,
            Ok(false) => {
                println!("Transfers cancelled");
                false
            }
            Err(e) => {
                warn!(error = %e, "Could not read confirmation");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

/// A session that has to be shut down before an error propagates, so
/// cookies get saved.
trait Shutdown {
    async fn shut_down(self) -> Result<()>;
}

impl Shutdown for FidelitySession {
    async fn shut_down(self) -> Result<()> {
        self.close().await
    }
}

/// Shut `session` down and hand back `err`. A failing shutdown is only
/// logged; the original error is what gets reported.
async fn close_after_error<S: Shutdown>(session: S, err: anyhow::Error) -> anyhow::Error {
    if let Err(e) = session.shut_down().await {
        warn!(error = %e, "Closing the session failed");
    }
    err
}

/// Open a session and log in, asking for an SMS code when the site sends one.
async fn open_logged_in(cfg: &AppConfig, creds: &Credentials) -> Result<Option<FidelitySession>> {
    let mut session = FidelitySession::open(cfg, creds.source_account.clone()).await?;
    let status = session.login(creds).await;

    let authenticated = if status == LoginStatus::AUTHENTICATED {
        true
    } else if status == LoginStatus::NEEDS_CODE {
        match prompt("Enter the code sent to your phone") {
            Ok(code) => session.login_2fa(&code).await,
            Err(e) => return Err(close_after_error(session, e).await),
        }
    } else {
        false
    };

    if authenticated {
        session.save_storage_state().await?;
        println!("\nSuccessfully logged in as: {}...", creds.masked_username());
        Ok(Some(session))
    } else {
        println!("\nLogin failed!");
        session.close().await?;
        Ok(None)
    }
}

/// Menu loop for one credential set. The browser opens on the first
/// action and stays up until the operator exits.
pub async fn run_credential_set(cfg: &AppConfig, creds: &Credentials) -> Result<()> {
    let mut shell = Shell::new(creds.source_account.clone());
    let mut session: Option<FidelitySession> = None;

    loop {
        let action = match shell.next_action() {
            Ok(action) => action,
            Err(e) => {
                return Err(match session.take() {
                    Some(active) => close_after_error(active, e).await,
                    None => e,
                });
            }
        };
        if action == Action::Exit {
            println!("\nExiting...");
            break;
        }

        if session.is_none() {
            session = match open_logged_in(cfg, creds).await {
                Ok(s) => s,
                Err(e) => {
                    println!("\nError during execution: {e:#}");
                    None
                }
            };
        }
        let Some(active) = session.as_mut() else {
            continue;
        };

        let summary = actions::execute(active, std::slice::from_ref(&action), &mut shell).await;
        info!(
            completed = summary.completed,
            failed = summary.failed.len(),
            "Actions finished"
        );
    }

    if let Some(active) = session {
        active.close().await?;
    }
    Ok(())
}
