//! Aztec Harvest CLI - Maintenance tools for the storefront backend.
//!
//! # Usage
//!
//! ```bash
//! # Delete expired session rows
//! aztec-cli sweep-sessions
//!
//! # List every active marketplace listing
//! aztec-cli listings
//!
//! # Show a user's inventory and listings
//! aztec-cli ledger --user 2b8f0c3e-...
//! ```
//!
//! # Commands
//!
//! - `sweep-sessions` - Remove session rows past their expiry
//! - `listings` - Show the public marketplace
//! - `ledger` - Show one user's inventory and listings
//!
//! Configuration is read from the environment (see `StorefrontConfig`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aztec_storefront::config::StorefrontConfig;
use aztec_storefront::remote::RestRemote;

mod commands;

#[derive(Parser)]
#[command(name = "aztec-cli")]
#[command(author, version, about = "Aztec Harvest storefront maintenance tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete expired session rows
    SweepSessions,
    /// List every active marketplace listing
    Listings {
        /// Only listings of this seller
        #[arg(short, long)]
        seller: Option<String>,
    },
    /// Show a user's inventory and listings
    Ledger {
        /// User ID
        #[arg(short, long)]
        user: String,
    },
    /// Show a user's order history, newest first
    Orders {
        /// User ID
        #[arg(short, long)]
        user: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        tracing::Level::TRACE => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "aztec_cli=info,aztec_storefront=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, &config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &StorefrontConfig) -> Result<(), Box<dyn std::error::Error>> {
    let remote = RestRemote::new(&config.remote)?;

    match cli.command {
        Commands::SweepSessions => commands::sessions::sweep(&remote).await?,
        Commands::Listings { seller } => {
            commands::marketplace::listings(&remote, seller.as_deref()).await?;
        }
        Commands::Ledger { user } => commands::marketplace::ledger(&remote, &user).await?,
        Commands::Orders { user } => commands::orders::history(&remote, &user).await?,
    }
    Ok(())
}
