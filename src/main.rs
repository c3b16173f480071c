use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pairledger::config::{CliArgs, Command, Config, LoggingConfig};
use pairledger::storage::open_backend;
use pairledger::{LedgerEntry, TransactionBatch, TransactionCoordinator};

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn describe(entry: &LedgerEntry) -> String {
    format!(
        "#{} {} {} '{}' (pair #{}, batch {})",
        entry.identity().map_or_else(|| "-".to_string(), |id| id.to_string()),
        entry.account(),
        entry.amount(),
        entry.description(),
        entry.pair_id().map_or_else(|| "-".to_string(), |id| id.to_string()),
        entry.batch_id().map_or_else(|| "-".to_string(), |id| id.to_string()),
    )
}

fn run(cli: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&cli)?;
    init_logging(&config.logging);

    let storage = open_backend(&config.storage, &config.schema)?;
    let coordinator = TransactionCoordinator::from_config(storage.clone(), config.schema.clone(), &config.ledger)?;

    match cli.command {
        Command::Post { debit, credit, amount, description } => {
            let mut batch = TransactionBatch::new();
            batch.transfer(&debit, &credit, amount, &description);
            let (committed, receipt) = coordinator.commit_with_retry(&batch)?;
            println!("batch {} committed in transaction {}", receipt.batch_id, receipt.transaction_id);
            for pair in committed.pairs() {
                println!("  {}", describe(pair.first()));
                println!("  {}", describe(pair.second()));
            }
            if receipt.created_accounts > 0 {
                println!("  {} new account(s)", receipt.created_accounts);
            }
        }
        Command::Entry { id } => {
            let (entry, pair) = coordinator.repository().fetch_pair(id)?;
            println!("{}", describe(&entry));
            println!("{}", describe(&pair));
        }
        Command::Account { key } => {
            let (account, created) = coordinator.finder().find_or_create_account(&key)?;
            let id = account.identity().map_or_else(|| "-".to_string(), |id| id.to_string());
            if created {
                println!("created account '{}' as #{}", account.key(), id);
            } else {
                println!("account '{}' is #{}", account.key(), id);
            }
        }
        Command::Stats => {
            println!("ledger entries: {}", storage.count_ledger_entries(None)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
