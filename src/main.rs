mod autopilot;
mod checks;
mod client;
mod config;
mod discord;
mod http;
mod logging;
mod metrics;
mod notify;
mod policy;
mod retry;
mod snapshot;
mod state;
mod telegram;

use autopilot::{poll_loop, run_cycle};
use axum::serve;
use clap::Parser;
use client::BobcatClient;
use config::Config;
use logging::{init_tracing, rolling_appender};
use metrics::Metrics;
use notify::Notifiers;
use state::{now_unix, CycleOutcome, State};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bobcatd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Run a single cycle and exit; the exit code is 1 if it failed.
    #[arg(long)]
    once: bool,
    /// Evaluate the miner but never send admin actions.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, conflicts_with = "telegram_off")]
    telegram_on: bool,
    #[arg(long, conflicts_with = "telegram_on")]
    telegram_off: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing(None);
            error!(error = %err, "failed to load config");
            std::process::exit(1);
        }
    };

    match cfg.log.file.as_deref().map(rolling_appender).transpose() {
        Ok(file) => init_tracing(file),
        Err(err) => {
            init_tracing(None);
            warn!(error = %err, "cannot open log file, logging to stderr only");
        }
    }

    if cli.telegram_on {
        cfg.telegram.enabled = true;
    } else if cli.telegram_off {
        cfg.telegram.enabled = false;
    }
    if cli.dry_run {
        cfg.autopilot.dry_run = true;
    }

    let mut notifiers = match Notifiers::from_config(&cfg) {
        Ok(n) => n,
        Err(err) => {
            error!(error = %err, "failed to set up notifications");
            std::process::exit(1);
        }
    };
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let client = BobcatClient::new(&cfg.miner);

    info!(
        miner = %client.base_url(),
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        dry_run = cfg.autopilot.dry_run,
        "starting bobcatd"
    );
    if !client.can_connect().await {
        warn!(miner = %client.base_url(), "miner is not reachable yet");
    }

    if cli.once {
        let result = run_cycle(&client, &cfg, &shared_state, &metrics, now_unix()).await;
        notifiers
            .dispatch(&result.events, &metrics, now_unix())
            .await;
        info!(report = %result.report.describe(), "single cycle finished");
        if matches!(result.report.outcome, CycleOutcome::Failed { .. }) {
            std::process::exit(1);
        }
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let miner_url = client.base_url().to_string();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, miner_url);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let collector_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            poll_loop(
                &client,
                &cfg,
                &shared_state,
                &metrics,
                &mut notifiers,
                &mut shutdown,
            )
            .await;
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    let _ = http_task.await;
}
