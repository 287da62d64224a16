mod config;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fkrewrite::database::{establish_connection, get_database_url};
use fkrewrite::rewrite::PlanPreview;
use fkrewrite::runner::RunReport;
use fkrewrite::schema::SchemaIntrospector;
use sea_orm::DatabaseConnection;
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::config::RewriteConfig;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every configured rewrite
    Upgrade {
        #[clap(short, long)]
        config: String,
        /// Overrides the database named in the config
        #[clap(short, long)]
        database: Option<String>,
        /// Give up after this many seconds
        #[clap(long)]
        timeout_secs: Option<u64>,
    },
    /// Run the (no-op) downgrades in reverse order
    Downgrade {
        #[clap(short, long)]
        config: String,
        #[clap(short, long)]
        database: Option<String>,
    },
    /// Show the statements an upgrade would execute
    Plan {
        #[clap(short, long)]
        config: String,
        #[clap(short, long)]
        database: Option<String>,
        /// Print one JSON document instead of annotated SQL
        #[clap(long)]
        json: bool,
    },
    /// Print the introspected schema of a table as JSON
    Inspect {
        #[clap(short, long)]
        database: String,
        #[clap(short, long)]
        table: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    match args.command {
        Commands::Upgrade {
            config,
            database,
            timeout_secs,
        } => {
            let config = load_config(&config)?;
            let db = connect(&config, database.as_deref()).await?;
            let runner = config.runner();
            info!("Running {} rewrite step(s)", runner.len());

            let run = runner.run_upgrade(&db);
            let report = match timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                    .await
                    .with_context(|| format!("upgrade did not finish within {}s", secs))??,
                None => run.await?,
            };
            print_report(&report)?;
        }
        Commands::Downgrade { config, database } => {
            let config = load_config(&config)?;
            let db = connect(&config, database.as_deref()).await?;
            let report = config.runner().run_downgrade(&db).await?;
            print_report(&report)?;
        }
        Commands::Plan {
            config,
            database,
            json,
        } => {
            let config = load_config(&config)?;
            let db = connect(&config, database.as_deref()).await?;
            let mut previews = Vec::new();
            for step in config.steps() {
                let preview = match step.plan(&db).await {
                    Ok(PlanPreview::Skip(reason)) => {
                        if !json {
                            println!("-- {}: skip ({})", step.name(), reason);
                        }
                        json!({ "step": step.name(), "action": "skip", "reason": reason })
                    }
                    Ok(PlanPreview::Recover { scratch }) => {
                        if !json {
                            println!("-- {}: recover from {}", step.name(), scratch);
                        }
                        json!({ "step": step.name(), "action": "recover", "scratch": scratch })
                    }
                    Ok(PlanPreview::Rewrite { previous, plan }) => {
                        if !json {
                            println!(
                                "-- {}: ON DELETE {} -> {}",
                                step.name(),
                                previous,
                                step.spec().desired_on_delete
                            );
                            for sql in plan.sql() {
                                println!("{};", sql);
                            }
                        }
                        json!({
                            "step": step.name(),
                            "action": "rewrite",
                            "previous": previous,
                            "plan": plan.summary(),
                        })
                    }
                    Err(e) => {
                        warn!("Cannot plan {}: {}", step.name(), e);
                        if !json {
                            println!("-- {}: error: {}", step.name(), e);
                        }
                        json!({ "step": step.name(), "action": "error", "error": e.to_string() })
                    }
                };
                previews.push(preview);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&previews)?);
            }
        }
        Commands::Inspect { database, table } => {
            let db = establish_connection(&get_database_url(Some(&database)))
                .await
                .with_context(|| format!("failed to open {}", database))?;
            let schema = SchemaIntrospector::new(&db).describe_table(&table).await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Result<RewriteConfig> {
    RewriteConfig::load(path).with_context(|| format!("failed to load config {}", path))
}

async fn connect(config: &RewriteConfig, database: Option<&str>) -> Result<DatabaseConnection> {
    let Some(path) = database.or(config.database.as_deref()) else {
        bail!("no database given on the command line or in the config");
    };
    let url = get_database_url(Some(path));
    info!("Connecting to {}", url);
    establish_connection(&url)
        .await
        .with_context(|| format!("failed to open {}", path))
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    for failed in report.failed() {
        warn!("Step {} failed", failed.step);
    }
    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("sqlx=warn,{}", log_level)))
        .without_time()
        .init();
}
