pub mod commands;

use clap::{Parser, Subcommand};
use concord_core::config::{AppConfig, LoadOptions};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "concord",
    about = "Concord coordination CLI",
    long_about = "Operate the Concord approval, lease, quota and sequence store: migrations, config inspection, chain setup and maintenance.",
    after_help = "Examples:\n  concord migrate\n  concord chain --entity-type quotation --approvers lead,finance\n  concord sequence --prefix QT"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Issue the next value of a period sequence, optionally as a document code")]
    Sequence {
        #[arg(long, help = "Period key; defaults to the current two-digit year")]
        period: Option<String>,
        #[arg(long, help = "Render a document code such as QT-25-0001 with this prefix")]
        prefix: Option<String>,
    },
    #[command(about = "Delete expired lock leases")]
    ReapLeases,
    #[command(about = "Configure the approval chain for an entity type")]
    Chain {
        #[arg(long, help = "quotation | purchase_order | delivery | payment")]
        entity_type: String,
        #[arg(long, value_delimiter = ',', required = true, help = "Approver ids, level 1 first")]
        approvers: Vec<String>,
        #[arg(long, help = "Store the chain without activating it")]
        inactive: bool,
    },
}

/// Installs the fmt subscriber on stderr so command output on stdout stays parseable.
pub fn init_logging(config: &AppConfig) {
    use concord_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded; keep it.
    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Sequence { period, prefix } => {
            commands::sequence::run(period.as_deref(), prefix.as_deref())
        }
        Command::ReapLeases => commands::reap_leases::run(),
        Command::Chain { entity_type, approvers, inactive } => {
            commands::chain::run(&entity_type, &approvers, inactive)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chain_approvers_split_on_commas() {
        let cli = Cli::try_parse_from([
            "concord",
            "chain",
            "--entity-type",
            "quotation",
            "--approvers",
            "lead,finance,cfo",
        ])
        .expect("parse");

        match cli.command {
            Command::Chain { entity_type, approvers, inactive } => {
                assert_eq!(entity_type, "quotation");
                assert_eq!(approvers, vec!["lead", "finance", "cfo"]);
                assert!(!inactive);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
