//! Brickyard CLI - storefront session, favorites and cart from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password from BRICKYARD_PASSWORD, or read from stdin)
//! brickyard login -e emmet@bricks.example
//!
//! # Favorites
//! brickyard favorites list
//! brickyard favorites toggle 65f0a1
//!
//! # Cart
//! brickyard cart add 65f0a1 -q 2
//! brickyard cart show
//! ```
//!
//! # Environment Variables
//!
//! - `BRICKYARD_API_URL` - Primary API origin (default `http://localhost:5000`)
//! - `BRICKYARD_API_FALLBACK_URLS` - Comma-separated fallback origins
//! - `BRICKYARD_SESSION_FILE` - Where the session token is kept
//! - `SENTRY_DSN` - Enables error reporting

#![cfg_attr(not(test), forbid(unsafe_code))]

use brickyard_client::ClientConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "brickyard")]
#[command(author, version, about = "Brickyard storefront client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session token
    Login {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
    /// Sign out and forget the session token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Manage favorites
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum FavoritesAction {
    /// List favorite products
    List,
    /// Add a product to favorites
    Add { product_id: String },
    /// Remove a product from favorites
    Remove { product_id: String },
    /// Add or remove a product depending on its current state
    Toggle { product_id: String },
}

#[derive(Subcommand)]
enum CartAction {
    /// Show cart contents and subtotal
    Show,
    /// Add units of a product
    Add {
        product_id: String,
        /// Number of units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set the quantity of a line (0 removes it)
    Set { product_id: String, quantity: u32 },
    /// Remove a line
    Remove { product_id: String },
    /// Empty the cart
    Clear,
}

/// Initialize Sentry error tracking.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
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

/// Warnings and errors become Sentry events; info and debug become
/// breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "brickyard_client=info,brickyard_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = commands::connect(config)?;

    match cli.command {
        Commands::Login { email } => commands::auth::login(&app, &email).await?,
        Commands::Logout => commands::auth::logout(&app)?,
        Commands::Whoami => commands::auth::whoami(&app),
        Commands::Favorites { action } => match action {
            FavoritesAction::List => commands::favorites::list(&app).await?,
            FavoritesAction::Add { product_id } => {
                commands::favorites::add(&app, &product_id.into()).await?;
            }
            FavoritesAction::Remove { product_id } => {
                commands::favorites::remove(&app, &product_id.into()).await?;
            }
            FavoritesAction::Toggle { product_id } => {
                commands::favorites::toggle(&app, &product_id.into()).await?;
            }
        },
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&app).await?,
            CartAction::Add {
                product_id,
                quantity,
            } => commands::cart::add(&app, &product_id.into(), quantity).await?,
            CartAction::Set {
                product_id,
                quantity,
            } => commands::cart::set(&app, &product_id.into(), quantity).await?,
            CartAction::Remove { product_id } => {
                commands::cart::remove(&app, &product_id.into()).await?;
            }
            CartAction::Clear => commands::cart::clear(&app).await?,
        },
    }
    Ok(())
}
