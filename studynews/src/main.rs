/*
studynews - single-binary main.rs
Starts the Rocket HTTP server, or produces one news brief from the command line.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::{Config, Readiness};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use studynews::actions::{NewsActions, TopicRequest};
use studynews::server::launch_rocket;

#[derive(Parser, Debug)]
#[command(name = "studynews", about = "News briefs with article enrichment for the study companion")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Produce a single brief for this topic and exit instead of serving HTTP
    #[arg(long)]
    topic: Option<String>,

    /// Optional category narrowing the topic (with --topic)
    #[arg(long, requires = "topic")]
    category: Option<String>,

    /// Maximum number of articles (with --topic)
    #[arg(long, requires = "topic")]
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so one-shot JSON output stays clean on stdout
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = match args.config {
        Some(p) if !p.exists() => {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p) => Some(p),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(Some(default_path.as_path()), override_path.as_deref())
        .await
        .map_err(|e| {
            error!(error = %e, "failed to load configuration");
            e
        })?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let readiness = config.readiness();
    match &readiness {
        Readiness::Ready => info!("configuration ready"),
        Readiness::Degraded(issues) => {
            for issue in issues {
                warn!(%issue, "running degraded");
            }
        }
        Readiness::NotReady(issues) => {
            for issue in issues {
                error!(%issue, "configuration not ready");
            }
        }
    }

    let actions = Arc::new(NewsActions::from_config(&config, readiness).context("failed to initialize services")?);

    match args.topic {
        Some(topic) => {
            let request = TopicRequest {
                topic,
                category: args.category,
                limit: args.limit,
            };
            let brief = actions.brief(request).await?;
            println!("{}", serde_json::to_string_pretty(&brief)?);
            Ok(())
        }
        None => launch_rocket(&config.server, actions).await,
    }
}
