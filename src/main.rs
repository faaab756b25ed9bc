use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rocket_phasegate::api::{self, middleware::SecurityConfig};
use rocket_phasegate::config::EngineConfig;
use rocket_phasegate::db::Database;
use rocket_phasegate::mcp::{self, EngineClient};
use rocket_phasegate::models::{EvalWindow, FeatureStatus};

#[derive(Parser)]
#[command(name = "rpg")]
#[command(about = "Phase gating, telemetry and learning ledger for multi-agent delivery")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port for HTTP API (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Start MCP server via stdio
    Mcp,
    /// Show server health, active features and open alerts
    Status,
    /// Show one feature's phase history and invocation coverage
    Feature {
        /// Feature identifier
        id: String,
    },
    /// Apply pending database migrations and exit
    Migrate,
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "rocket_phasegate=info,tower_http=info".into()),
    );

    if use_stderr {
        // stdout is the protocol channel in MCP mode
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_database(config: EngineConfig) -> anyhow::Result<Database> {
    let db = Database::open_configured(config).context("Failed to open database")?;
    let applied = db.migrate().context("Failed to apply migrations")?;
    if !applied.is_empty() {
        tracing::info!(?applied, "applied migrations");
    }
    Ok(db)
}

async fn serve(config: EngineConfig, port: Option<u16>, host: String) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    let security = SecurityConfig::from_server(&config.server);
    if security.api_key.is_none() {
        tracing::warn!("No API key configured; the API accepts unauthenticated requests");
    }

    if let Some(limiter) = security.rate_limiter.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        });
    }

    let db = open_database(config)?;
    let app = api::create_router_with_security(db, security);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("RocketPhasegate server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn status() -> anyhow::Result<()> {
    let client = EngineClient::from_env();
    if client.health().await.is_err() {
        println!("Server not reachable at {}", client.base_url());
        return Ok(());
    }
    println!("Server: ok ({})", client.base_url());

    let active = client.list_features(Some(FeatureStatus::InProgress)).await?;
    let blocked = client.list_features(Some(FeatureStatus::Blocked)).await?;
    println!("\nFeatures: {} in progress, {} blocked", active.len(), blocked.len());
    for feature in active.iter().chain(blocked.iter()) {
        println!(
            "  {:<16} {:<12} {}  {}",
            feature.id, feature.status, feature.current_phase, feature.name
        );
    }

    if let Some(eval) = client.system_evals(EvalWindow::Month).await?.pop() {
        println!(
            "\nSystem health (30d): {:.1} {} as of {}",
            eval.overall_score,
            eval.health_status,
            eval.evaluated_at.format("%Y-%m-%d %H:%M")
        );
    }

    let alerts = client.active_alerts().await?;
    println!("\nOpen alerts: {}", alerts.len());
    for alert in alerts {
        println!("  [{}] {} ({})", alert.severity, alert.message, alert.source);
    }
    Ok(())
}

async fn show_feature(id: &str) -> anyhow::Result<()> {
    let client = EngineClient::from_env();
    let history = client.feature_history(id).await?;
    let coverage = client.coverage(id).await?;

    let feature = &history.feature;
    println!("{} - {}", feature.id, feature.name);
    println!(
        "  status {}  phase {}  severity {}",
        feature.status, feature.current_phase, feature.severity
    );

    println!("\nTransitions:");
    for t in &history.transitions {
        println!(
            "  {}  {} -> {}  {:<10} {}",
            t.created_at.format("%Y-%m-%d %H:%M"),
            t.from_phase.value(),
            t.to_phase.value(),
            t.kind,
            t.actor
        );
    }

    let open_blockers = history
        .blockers
        .iter()
        .filter(|b| b.resolved_at.is_none())
        .count();
    println!("\nOpen blockers: {}", open_blockers);

    if coverage.passed {
        println!("Coverage: complete");
    } else {
        let missing: Vec<String> = coverage.missing.iter().map(|p| p.to_string()).collect();
        println!("Coverage: missing {}", missing.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = matches!(cli.command, Some(Commands::Mcp));
    init_tracing(use_stderr);

    match cli.command {
        Some(Commands::Serve { port, host }) => {
            serve(EngineConfig::load()?, port, host).await?;
        }
        Some(Commands::Mcp) => {
            let db = open_database(EngineConfig::load()?)?;
            mcp::run_stdio_server(db).await?;
        }
        Some(Commands::Status) => status().await?,
        Some(Commands::Feature { id }) => show_feature(&id).await?,
        Some(Commands::Migrate) => {
            let db = Database::open_configured(EngineConfig::load()?)?;
            let applied = db.migrate()?;
            if applied.is_empty() {
                println!("Database is up to date");
            } else {
                println!("Applied migrations: {}", applied.join(", "));
            }
        }
        None => {
            serve(EngineConfig::load()?, None, "127.0.0.1".to_string()).await?;
        }
    }

    Ok(())
}
