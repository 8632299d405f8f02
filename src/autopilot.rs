use crate::client::BobcatClient;
use crate::config::{AutopilotConfig, Config};
use crate::metrics::Metrics;
use crate::notify::Notifiers;
use crate::policy::{evaluate, Decision};
use crate::state::{now_unix, ActionOutcome, AlertEvent, CycleOutcome, CycleReport, State};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct CycleResult {
    pub report: CycleReport,
    pub events: Vec<AlertEvent>,
}

pub async fn run_cycle(
    client: &BobcatClient,
    cfg: &Config,
    state: &RwLock<State>,
    metrics: &Metrics,
    now_unix: i64,
) -> CycleResult {
    let started = Instant::now();

    let outcome = match client.refresh().await {
        Err(err) => {
            warn!(document = %err.document, error = %err.source, "miner refresh failed");
            metrics.inc_fetch_error(err.document.as_str());
            CycleOutcome::Failed {
                document: Some(err.document),
                error: err.source.to_string(),
            }
        }
        Ok(snapshots) => {
            let evaluation = evaluate(&snapshots, &cfg.thresholds);
            info!(
                decision = %evaluation.decision,
                reasons = ?evaluation.reasons,
                gap = snapshots.status.gap,
                dig = snapshots.dig.is_some(),
                "miner evaluated"
            );

            let cooldown = state
                .read()
                .await
                .cooldown_remaining(cfg.autopilot.action_cooldown_secs, now_unix);
            let action = act(client, &cfg.autopilot, evaluation.decision, cooldown).await;
            metrics.observe_action(&action);

            CycleOutcome::Evaluated {
                temps_celsius: [snapshots.miner.temp0, snapshots.miner.temp1],
                status: snapshots.status,
                speed: snapshots.speed,
                evaluation,
                action,
            }
        }
    };

    let report = CycleReport {
        started_at_unix: now_unix,
        duration_ms: started.elapsed().as_millis() as u64,
        outcome,
    };
    metrics.inc_cycle();

    let events = {
        let mut guard = state.write().await;
        guard.record_cycle(report.clone());
        guard.apply_alert_rules(&cfg.alerts, now_unix)
    };

    CycleResult { report, events }
}

// A cycle still retrying when shutdown arrives is dropped unrecorded.
pub async fn poll_loop(
    client: &BobcatClient,
    cfg: &Config,
    state: &RwLock<State>,
    metrics: &Metrics,
    notifiers: &mut Notifiers,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutdown signal received, stopping poll loop");
                break;
            }
            _ = ticker.tick() => {
                let now = now_unix();
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("shutdown signal received, abandoning cycle in progress");
                        break;
                    }
                    result = run_cycle(client, cfg, state, metrics, now) => {
                        notifiers.dispatch(&result.events, metrics, now).await;
                    }
                }
            }
        }
    }
}

async fn act(
    client: &BobcatClient,
    cfg: &AutopilotConfig,
    decision: Decision,
    cooldown_remaining: u64,
) -> ActionOutcome {
    let Some(action) = decision.action() else {
        return ActionOutcome::NoAction;
    };

    if cfg.dry_run {
        info!(%action, "dry run, action not sent");
        return ActionOutcome::DryRun { action };
    }
    if cooldown_remaining > 0 {
        info!(%action, remaining_secs = cooldown_remaining, "action cooling down");
        return ActionOutcome::CoolingDown {
            action,
            remaining_secs: cooldown_remaining,
        };
    }

    match client.perform(action).await {
        Ok(()) => ActionOutcome::Performed { action },
        Err(err) => {
            error!(%action, error = %err, "admin action failed");
            ActionOutcome::Failed {
                action,
                error: err.to_string(),
            }
        }
    }
}
