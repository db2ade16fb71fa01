//! Fidelity Automation
//!
//! Entry point. Loads `.env` and the optional config file, initialises
//! structured logging, then runs the interactive menu once per credential
//! set in `FIDELITY`, strictly one after another.

use anyhow::Result;
use tracing::{error, info};

use fidelity_automation::config::{AppConfig, Credentials};
use fidelity_automation::shell::{self, prompt::prompt_yes_no};

const BANNER: &str = r#"
 _____ _     _      _ _ _
|  ___(_) __| | ___| (_) |_ _   _
| |_  | |/ _` |/ _ \ | | __| | | |
|  _| | | (_| |  __/ | | |_| |_| |
|_|   |_|\__,_|\___|_|_|\__|\__, |
                            |___/
  Brokerage automation v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_or_default()?;
    init_logging();

    let credentials = Credentials::from_env()?;

    println!("{BANNER}");
    println!("Welcome to Fidelity Automation!");
    info!(
        logins = credentials.len(),
        headless = cfg.browser.headless,
        save_state = cfg.session.save_state,
        "Starting up"
    );

    for (i, creds) in credentials.iter().enumerate() {
        println!("\nProcessing account: {}...", creds.masked_username());

        if let Err(e) = shell::run_credential_set(&cfg, creds).await {
            let reason = format!("{e:#}");
            error!(user = %creds.masked_username(), error = %reason, "Session ended with an error");
            println!("\nError: {reason}");
        }

        let more = i + 1 < credentials.len();
        if more && !prompt_yes_no("Continue to next account?")? {
            break;
        }
    }

    println!("\nThank you for using Fidelity Automation!");
    Ok(())
}

/// Initialise the tracing subscriber.
///
/// Uses `RUST_LOG` for filtering (defaults to `fidelity_automation=info`).
/// Set `FIDELITY_LOG_JSON=1` for JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fidelity_automation=info"));

    let json_logging = std::env::var("FIDELITY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
