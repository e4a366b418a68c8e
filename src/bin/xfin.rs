//! Xfinity usage CLI.
//!
//! Thin front-end over the extraction core: it resolves credentials from
//! flags or the opt-in store, runs one extraction, and formats the result.
//!
//! Usage examples:
//!   $ xfin -e me@example.com -p secret usage
//!   $ xfin -e me@example.com -p secret -s usage     # remember credentials
//!   $ xfin usage --json                             # reuse saved ones
//!   $ xfin usage --show                             # watch the browser
//!   $ xfin config                                   # where they are stored

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use xfin_usage::config::PortalConfig;
use xfin_usage::credentials::{CredentialStore, Credentials};
use xfin_usage::extractor::UsageExtractor;
use xfin_usage::logging::{ExtractorLogger, LogConfig, LogLevel, LogRecord, Verbosity};
use xfin_usage::types::UsageReport;

#[derive(Parser)]
#[command(name = "xfin", version, about = "CLI to avoid the Xfinity website")]
struct Cli {
    /// Email address used to sign in.
    #[arg(short, long, global = true)]
    email: Option<String>,

    /// Account password.
    #[arg(short, long, global = true)]
    password: Option<String>,

    /// Save the email and password in plaintext for later runs.
    #[arg(short, long, global = true)]
    save: bool,

    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get the amount of usage left for this pay period.
    Usage(UsageArgs),
    /// Show where credentials are stored.
    Config(ConfigArgs),
}

#[derive(Args)]
struct UsageArgs {
    /// Output as JSON.
    #[arg(long)]
    json: bool,

    /// Show the Chrome window doing the scraping.
    #[arg(long)]
    show: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: Option<ConfigAction>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Wipe any saved credentials.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let verbosity = verbosity_from_count(cli.verbose);

    match &cli.command {
        Command::Usage(args) => run_usage(&cli, args, verbosity).await,
        Command::Config(args) => run_config(args),
    }
}

async fn run_usage(cli: &Cli, args: &UsageArgs, verbosity: Verbosity) -> Result<()> {
    let store = CredentialStore::new().context("failed to open the credential store")?;
    let credentials = resolve_credentials(cli, &store)?;

    let config = PortalConfig::from_env().context("invalid XFIN_* environment configuration")?;
    let extractor = UsageExtractor::with_logger(config, make_logger(verbosity));

    let payload = extractor
        .extract(&credentials, args.show)
        .await
        .context("failed to get usage details")?;

    let report =
        UsageReport::from_payload(&payload).context("usage document had an unexpected shape")?;

    let Some(latest) = report.latest_month() else {
        match report.error {
            Some(error) => bail!("portal reported an error: {error}"),
            None => bail!("usage document contained no billing months"),
        }
    };

    let (Some(total), Some(allowable)) = (latest.total_usage, latest.allowable_usage) else {
        bail!("latest billing month is missing usage totals");
    };
    let remaining = allowable - total;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "totalUsage": total,
                "allowableUsage": allowable,
                "remaining": remaining,
            })
        );
        return Ok(());
    }

    let percent_remaining = remaining / allowable * 100.0;
    println!("{total} GB / {allowable} GB ({percent_remaining:.3}% remaining)");
    Ok(())
}

fn run_config(args: &ConfigArgs) -> Result<()> {
    let store = CredentialStore::new().context("failed to open the credential store")?;
    match args.action {
        Some(ConfigAction::Clear) => store
            .clear()
            .context("failed to clear the credential store"),
        None => {
            println!("{}", store.path().display());
            Ok(())
        }
    }
}

/// Flags win over the store, field by field; supplying only half a
/// credential pair is an error rather than a silent fallback.
fn resolve_credentials(cli: &Cli, store: &CredentialStore) -> Result<Credentials> {
    let saved = store.load().context("failed to read saved credentials")?;

    let email = cli
        .email
        .clone()
        .or_else(|| saved.as_ref().map(|c| c.identity().to_string()));
    let password = cli
        .password
        .clone()
        .or_else(|| saved.as_ref().map(|c| c.secret().to_string()));

    let credentials = match (email, password) {
        (Some(email), Some(password)) => {
            Credentials::new(email, password).context("invalid credentials")?
        }
        (Some(_), None) => bail!("missing password to go with the email"),
        (None, Some(_)) => bail!("missing email to go with the password"),
        (None, None) => bail!("no credentials given; pass --email/--password or save them first"),
    };

    if cli.save {
        store
            .save(&credentials)
            .context("failed to save credentials")?;
        log::info!("credentials saved to {}", store.path().display());
    }

    Ok(credentials)
}

fn make_logger(verbosity: Verbosity) -> Arc<ExtractorLogger> {
    let mut config = LogConfig::new(verbosity);
    config.external_logger = Some(Arc::new(|record: &LogRecord| {
        let message = match &record.category {
            Some(category) => format!("[{category}] {}", record.message),
            None => record.message.clone(),
        };
        match record.level {
            LogLevel::Error => log::error!("{message}"),
            LogLevel::Info => log::info!("{message}"),
            LogLevel::Debug => log::debug!("{message}"),
        }
    }));
    Arc::new(ExtractorLogger::with_config(config))
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
