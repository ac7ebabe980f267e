//! snp-frequency-bot: population genotype frequencies for dbSNP rsIDs.
//!
//! Single-binary Tokio application that:
//! 1. Validates rsIDs and applies a per-user hourly quota
//! 2. Fetches allele frequencies from NCBI dbSNP
//! 3. Computes Hardy–Weinberg genotype frequencies
//! 4. Caches reports and journals every lookup per user

mod config;
mod render;
mod serve;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::{RequesterId, ServiceConfig};
use dbsnp_client::DbSnpClient;
use resolver::{
    Coordinator, HistoryLedger, JsonlHistoryStore, MemoryCacheStore, RequesterQuota,
    VariantService,
};

/// SNP population frequency lookup
#[derive(Parser)]
#[command(name = "snp-frequency-bot", about = "Genotype frequencies for dbSNP rsIDs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up one or more rsIDs.
    Get {
        /// rsIDs such as rs429358.
        #[arg(required = true)]
        rsids: Vec<String>,

        /// Requester the lookups are recorded under.
        #[arg(long, default_value = "cli")]
        user: String,

        /// Print reports as JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Give up on each lookup after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Show lookup history, newest first.
    History {
        #[arg(long, default_value = "cli")]
        user: String,

        /// Include everything, not just the recent window.
        #[arg(long)]
        all: bool,
    },
    /// Keep running and answer rsIDs read from stdin, one request per line.
    Serve {
        /// Requester for lines without an `@user` prefix.
        #[arg(long, default_value = "cli")]
        user: String,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

struct App {
    service: VariantService,
    shutdown: CancellationToken,
    maintenance: tokio::task::JoinHandle<()>,
}

fn build_app(cfg: &ServiceConfig) -> Result<App, common::Error> {
    let client = DbSnpClient::new(&cfg.dbsnp)?;
    let store = Arc::new(MemoryCacheStore::new(cfg.cache.stale_retention()));

    let history_dir = PathBuf::from(cfg.history.dir.trim());
    let journal = JsonlHistoryStore::open(&history_dir)?;
    info!("History journal: {}", journal.path().display());

    let coordinator = Coordinator::new(Arc::new(client), store, cfg.cache.ttl());
    let service = VariantService::new(
        coordinator,
        HistoryLedger::spawn(Arc::new(journal)),
        RequesterQuota::per_hour(cfg.limits.max_requests_per_hour),
        cfg.history.window(),
    );

    let shutdown = CancellationToken::new();
    let maintenance = service.spawn_maintenance(cfg.cache.sweep_interval(), shutdown.clone());

    Ok(App {
        service,
        shutdown,
        maintenance,
    })
}

async fn run_get(
    service: &VariantService,
    rsids: Vec<String>,
    user: RequesterId,
    json: bool,
    timeout: Option<Duration>,
) -> bool {
    let mut tasks = JoinSet::new();
    for (idx, raw) in rsids.into_iter().enumerate() {
        let service = service.clone();
        let user = user.clone();
        tasks.spawn(async move {
            let deadline = timeout.map(|t| Instant::now() + t);
            let outcome = service.resolve(&raw, &user, deadline).await;
            (idx, raw, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!("Lookup task failed: {}", e),
        }
    }
    results.sort_by_key(|(idx, _, _)| *idx);

    let mut all_ok = true;
    for (_, raw, outcome) in results {
        let rendered = render::outcome(&raw, &outcome, json);
        rendered.print(json);
        all_ok &= rendered.ok;
    }
    all_ok
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "snp_frequency_bot=info,resolver=info,dbsnp_client=info,genotype=info".into()
            }),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration.
    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if cfg.dbsnp.api_key.trim().is_empty() {
        info!("No NCBI_API_KEY set; dbSNP allows 3 requests/sec");
    }
    info!(
        "Cache TTL {}s, quota {}/h per user",
        cfg.cache.ttl_secs, cfg.limits.max_requests_per_hour
    );

    let app = match build_app(&cfg) {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let ok = match cli.command {
        Command::Get {
            rsids,
            user,
            json,
            timeout_secs,
        } => {
            let timeout = timeout_secs.map(Duration::from_secs);
            run_get(&app.service, rsids, RequesterId::new(user), json, timeout).await
        }
        Command::History { user, all } => {
            let user = RequesterId::new(user);
            let records = if all {
                app.service.history(&user).await
            } else {
                app.service.recent_history(&user).await
            };
            match records {
                Ok(records) => {
                    print!("{}", render::history(&records));
                    true
                }
                Err(e) => {
                    error!("Failed to read history: {}", e);
                    false
                }
            }
        }
        Command::Serve {
            user,
            json,
            timeout_secs,
        } => {
            let timeout = timeout_secs.map(Duration::from_secs);
            serve::run(
                &app.service,
                RequesterId::new(user),
                json,
                timeout,
                app.shutdown.clone(),
            )
            .await;
            true
        }
    };

    app.service.flush_history().await;
    app.service.shutdown();
    app.shutdown.cancel();
    if let Err(e) = app.maintenance.await {
        warn!("Maintenance task exited abnormally: {}", e);
    }

    if !ok {
        std::process::exit(1);
    }
}
