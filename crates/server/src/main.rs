mod config;
mod http;

use std::net::IpAddr;

use anyhow::{anyhow, Context};
use api::auth::{issue_token, UserRole};
use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use migration::{Migrator, MigratorTrait};
use platform_obs::{init_tracing, ObsConfig};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::http::{build_state, serve, ServeConfig};

#[derive(Parser, Debug)]
#[command(name = "crm-server", version, about = "CRM back-office server")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the HTTP server (applies pending migrations first)
    Serve {
        #[arg(long, env = "HOST", default_value = "127.0.0.1")]
        host: IpAddr,
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
        /// Skip applying migrations on startup
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Run migrations
    Migrate {
        #[arg(value_enum, default_value_t = MigrateAction::Up)]
        action: MigrateAction,
    },
    /// Seed a demo pipeline into an empty database
    Seed,
    /// Print a session token for local testing
    Token {
        #[arg(long, default_value = "admin")]
        role: String,
        #[arg(long)]
        user: Option<Uuid>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MigrateAction {
    Up,
    Down,
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing(ObsConfig::from_env())?;

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.cmd {
        Cmd::Token { role, user } => {
            let role = UserRole::from_str(&role)
                .ok_or_else(|| anyhow!("unknown role {} (owner|admin|marketing|analyst)", role))?;
            let token = issue_token(user.unwrap_or_else(Uuid::new_v4), role, &config.auth)
                .context("failed to sign token")?;
            println!("{}", token);
            Ok(())
        }
        Cmd::Migrate { action } => {
            let db = platform_db::connect(&config.database).await?;
            match action {
                MigrateAction::Up => Migrator::up(&db, None).await?,
                MigrateAction::Down => Migrator::down(&db, None).await?,
                MigrateAction::Reset => Migrator::reset(&db).await?,
            }
            info!(?action, "migrations finished");
            Ok(())
        }
        Cmd::Seed => {
            let db = platform_db::connect(&config.database).await?;
            let summary = api::seed::seed_demo(&db)
                .await
                .map_err(|err| anyhow!("seed data failed: {}", err))?;
            info!(deals = summary.deals, skipped = summary.skipped, "seed finished");
            Ok(())
        }
        Cmd::Serve {
            host,
            port,
            skip_migrations,
        } => {
            if config.uses_dev_secret() {
                warn!("AUTH_SECRET not set; using the development secret");
            }
            let db = platform_db::connect(&config.database).await?;
            if !skip_migrations {
                Migrator::up(&db, None).await?;
            }
            let state = build_state(&config, db);
            serve(ServeConfig::new(host, port), &config, state).await
        }
    }
}
