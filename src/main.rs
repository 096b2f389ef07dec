//! corebank_ledger operator tool
//!
//! Usage:
//!   corebank_ledger migrate                 apply the ledger schema
//!   corebank_ledger check                   verify connectivity and schema
//!   corebank_ledger reconcile <account_id>  replay an account's history

use corebank_ledger::{db, Config, Ledger};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const USAGE: &str = "usage: corebank_ledger <migrate | check | reconcile <account_id>>";

/// Initialize tracing/logging. Production logs are JSON lines.
fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "corebank_ledger=debug".into()),
    );

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

enum Command {
    Migrate,
    Check,
    Reconcile(Uuid),
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    match args {
        [cmd] if cmd == "migrate" => Ok(Command::Migrate),
        [cmd] if cmd == "check" => Ok(Command::Check),
        [cmd, account_id] if cmd == "reconcile" => {
            let account_id = account_id
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid account id '{}': {}", account_id, e))?;
            Ok(Command::Reconcile(account_id))
        }
        _ => Err(anyhow::anyhow!(USAGE)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config = Config::from_env()?;
    init_tracing(config.is_production());
    tracing::info!(environment = %config.environment, "Connecting to database...");
    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    match command {
        Command::Migrate => {
            db::apply_schema(&pool).await?;
        }
        Command::Check => {
            if !db::check_schema(&pool).await? {
                pool.close().await;
                return Err(anyhow::anyhow!(
                    "Database schema incomplete. Run `corebank_ledger migrate`."
                ));
            }
            tracing::info!("Database schema OK");
        }
        Command::Reconcile(account_id) => {
            let ledger = Ledger::postgres(pool.clone(), config.ledger.clone());
            let report = ledger.audit.reconcile_account(account_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.is_clean() {
                pool.close().await;
                return Err(anyhow::anyhow!(
                    "{} anomalies found on account {}",
                    report.anomalies.len(),
                    account_id
                ));
            }
        }
    }

    pool.close().await;
    Ok(())
}
