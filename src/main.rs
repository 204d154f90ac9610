use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedmailer::config::Config;
use feedmailer::cycle::{run_cycle, CycleContext};
use feedmailer::feed::build_client;
use feedmailer::notify::SmtpMailer;
use feedmailer::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(
    name = "feedmailer",
    about = "Watch feeds for keywords and email matching entries"
)]
struct Args {
    /// Configuration file (TOML, or JSON when the extension is .json)
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Notification store (defaults to mailed.db next to the config file)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

fn default_db_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("mailed.db")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let config = Arc::new(config);

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| default_db_path(&args.config));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: {} is locked. Another instance appears to be running.",
                db_path.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let client =
        build_client(config.fetch_timeout()).context("Failed to build HTTP client")?;
    let mailer = SmtpMailer::new(&config.emailer).context("Failed to configure SMTP")?;

    let ctx = CycleContext::new(Arc::clone(&config), db.clone(), client, Arc::new(mailer));
    tracing::info!(
        keywords = ctx.matcher().len(),
        db = %db_path.display(),
        "Watcher ready"
    );

    loop {
        run_cycle(&ctx).await;

        if args.once {
            break;
        }

        tracing::debug!(minutes = config.poll_minutes, "Sleeping until next cycle");
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval()) => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Interrupted, shutting down");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    tokio::time::sleep(config.poll_interval()).await;
                }
            }
        }
    }

    db.close().await;
    Ok(())
}
