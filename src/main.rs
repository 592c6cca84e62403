use clap::{Parser, Subcommand};
use ilp_service::config::ServiceConfig;
use ilp_service::domain::addressing::is_valid_address;
use ilp_service::domain::ipr::Ipr;
use ilp_service::error::ServiceError;
use miette::{IntoDiagnostic, Result, miette};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ServiceConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and exit
    CheckConfig,
    /// Decode a base64url payment request and print it as JSON
    DecodeIpr {
        ipr: String,
    },
    /// Print the ILP address of a ledger username under the configured prefix
    IlpAddress {
        username: String,
    },
}

fn init_tracing() {
    // Logs go to stderr so command output stays machine readable.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "ilp_service=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig => {
            cli.config.validate().into_diagnostic()?;
            let secret = if cli.config.secret.is_some() {
                "<configured>"
            } else {
                "<generated>"
            };
            println!(
                "configuration ok: prefix={} backend={} secret={} connector={}",
                cli.config.prefix().into_diagnostic()?,
                cli.config.backend_url().into_diagnostic()?,
                secret,
                cli.config.connector.as_deref().unwrap_or("-")
            );
        }
        Command::DecodeIpr { ipr } => {
            let decoded = Ipr::from_base64url(&ipr).map_err(|e| miette!("ipr ({ipr}) {e}"))?;
            debug!(packet_len = decoded.packet.as_bytes().len(), "decoded payment request");
            let output = json!({
                "condition": decoded.condition,
                "packet": decoded.packet,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).into_diagnostic()?
            );
        }
        Command::IlpAddress { username } => {
            let prefix = cli.config.prefix().into_diagnostic()?;
            if !is_valid_address(&username) || username.contains('.') {
                return Err(ServiceError::validation(format!(
                    "username ({username}) is not a valid ledger username"
                )))
                .into_diagnostic();
            }
            println!("{prefix}{username}");
        }
    }

    Ok(())
}
