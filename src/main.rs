//! Scimgate - CLI Entry Point
//!
//! Commands:
//!   serve   - Start the SCIM server (default)
//!   migrate - Run database migrations only
//!   reset   - Reset database (drop all tables)

use anyhow::Result;
use clap::{Parser, Subcommand};
use scimgate::{config::Config, migration, server, telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "scimgate")]
#[command(about = "SCIM 2.0 provisioning server with deep request observability", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the SCIM server
    Serve,
    /// Run database migrations only
    Migrate,
    /// Reset database (drop all tables)
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    telemetry::init(&config);

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Migrate) => {
            info!("Running database migrations...");
            let pool = server::create_pool(&config.database).await?;
            migration::run_migrations(&pool).await?;
            info!("Migrations completed successfully");
        }
        Some(Commands::Reset) => {
            info!("Resetting database (dropping all tables)...");
            let pool = server::create_pool(&config.database).await?;
            migration::reset_database(&pool).await?;
            info!("Database reset completed");
        }
        Some(Commands::Serve) | None => {
            info!("Starting Scimgate");
            info!("HTTP server listening on {}", config.http_addr());
            server::run(config).await?;
        }
    }

    Ok(())
}
