use crate::config::AlertsConfig;
use crate::policy::{Action, Decision, Evaluation};
use crate::snapshot::{Document, SpeedSnapshot, StatusSnapshot};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub started_at_unix: i64,
    pub cycles_total: u64,
    pub last_cycle: Option<CycleReport>,
    pub last_action: Option<ActionRecord>,
    #[serde(skip)]
    pub alert_tracking: AlertTrackState,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at_unix: i64,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    Evaluated {
        status: StatusSnapshot,
        temps_celsius: [i64; 2],
        speed: SpeedSnapshot,
        evaluation: Evaluation,
        action: ActionOutcome,
    },
    Failed {
        document: Option<Document>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    NoAction,
    Performed { action: Action },
    DryRun { action: Action },
    CoolingDown { action: Action, remaining_secs: u64 },
    Failed { action: Action, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action: Action,
    pub at_unix: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AlertTrackState {
    pub consecutive_failures: u32,
    pub is_down: bool,
    pub last_alert_sent_at: Option<i64>,
    pub last_state_change_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEventKind {
    Unhealthy,
    Repeat,
    Recovered,
    ActionTaken(Action),
    ActionFailed(Action),
}

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub detail: String,
}

impl AlertEvent {
    pub fn severity(&self) -> Severity {
        match self.kind {
            AlertEventKind::Recovered => Severity::Info,
            AlertEventKind::ActionTaken(_) | AlertEventKind::Repeat => Severity::Warning,
            AlertEventKind::Unhealthy | AlertEventKind::ActionFailed(_) => Severity::Error,
        }
    }

    pub fn headline(&self) -> String {
        match &self.kind {
            AlertEventKind::Unhealthy => "Miner is unhealthy".to_string(),
            AlertEventKind::Repeat => "Miner is still unhealthy".to_string(),
            AlertEventKind::Recovered => "Miner recovered".to_string(),
            AlertEventKind::ActionTaken(action) => format!("Sent {action} to the miner"),
            AlertEventKind::ActionFailed(action) => format!("Failed to send {action}"),
        }
    }
}

impl CycleReport {
    pub fn is_healthy(&self) -> bool {
        matches!(
            &self.outcome,
            CycleOutcome::Evaluated { evaluation, .. } if evaluation.decision == Decision::Healthy
        )
    }

    pub fn decision(&self) -> Option<Decision> {
        match &self.outcome {
            CycleOutcome::Evaluated { evaluation, .. } => Some(evaluation.decision),
            CycleOutcome::Failed { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.outcome {
            CycleOutcome::Evaluated { evaluation, .. } => format!(
                "decision={} reasons=[{}] {}",
                evaluation.decision,
                evaluation.reasons.join(", "),
                evaluation.verdicts.summary()
            ),
            CycleOutcome::Failed {
                document: Some(document),
                error,
            } => format!("could not read {document}: {error}"),
            CycleOutcome::Failed {
                document: None,
                error,
            } => format!("cycle failed: {error}"),
        }
    }
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn record_cycle(&mut self, report: CycleReport) {
        if let CycleOutcome::Evaluated {
            action: ActionOutcome::Performed { action },
            ..
        } = &report.outcome
        {
            self.last_action = Some(ActionRecord {
                action: *action,
                at_unix: report.started_at_unix,
            });
        }
        self.cycles_total = self.cycles_total.saturating_add(1);
        self.last_cycle = Some(report);
    }

    pub fn cooldown_remaining(&self, cooldown_secs: u64, now_unix: i64) -> u64 {
        match self.last_action {
            Some(record) => {
                let elapsed = now_unix.saturating_sub(record.at_unix).max(0) as u64;
                cooldown_secs.saturating_sub(elapsed)
            }
            None => 0,
        }
    }

    pub fn apply_alert_rules(&mut self, cfg: &AlertsConfig, now_unix: i64) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        let Some(report) = &self.last_cycle else {
            return events;
        };
        let detail = report.describe();

        if let CycleOutcome::Evaluated { action, .. } = &report.outcome {
            match action {
                ActionOutcome::Performed { action } => events.push(AlertEvent {
                    kind: AlertEventKind::ActionTaken(*action),
                    detail: detail.clone(),
                }),
                ActionOutcome::Failed { action, error } => events.push(AlertEvent {
                    kind: AlertEventKind::ActionFailed(*action),
                    detail: error.clone(),
                }),
                _ => {}
            }
        }

        let is_up = report.is_healthy();
        update_alert_state(
            &mut self.alert_tracking,
            is_up,
            cfg,
            now_unix,
            detail,
            &mut events,
        );
        events
    }
}

fn update_alert_state(
    entry: &mut AlertTrackState,
    is_up: bool,
    cfg: &AlertsConfig,
    now_unix: i64,
    detail: String,
    events: &mut Vec<AlertEvent>,
) {
    if is_up {
        let was_down = entry.is_down;
        entry.consecutive_failures = 0;
        entry.is_down = false;
        if was_down {
            entry.last_state_change_at = Some(now_unix);
            if cfg.recovery_notify {
                events.push(AlertEvent {
                    kind: AlertEventKind::Recovered,
                    detail,
                });
            }
        }
        return;
    }

    entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

    if !entry.is_down && entry.consecutive_failures >= cfg.fail_threshold {
        entry.is_down = true;
        entry.last_state_change_at = Some(now_unix);
        entry.last_alert_sent_at = Some(now_unix);
        events.push(AlertEvent {
            kind: AlertEventKind::Unhealthy,
            detail,
        });
        return;
    }

    if entry.is_down {
        let due = match entry.last_alert_sent_at {
            Some(last_sent) => (now_unix - last_sent) >= cfg.repeat_interval_secs as i64,
            None => true,
        };
        if due {
            entry.last_alert_sent_at = Some(now_unix);
            events.push(AlertEvent {
                kind: AlertEventKind::Repeat,
                detail,
            });
        }
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::snapshots;
    use crate::config::Thresholds;
    use crate::policy::evaluate;

    fn alerts_cfg() -> AlertsConfig {
        AlertsConfig {
            fail_threshold: 3,
            repeat_interval_secs: 1800,
            recovery_notify: true,
        }
    }

    fn evaluated(at: i64, healthy: bool, action: ActionOutcome) -> CycleReport {
        let mut snaps = snapshots();
        if !healthy {
            snaps.miner.errors = "disk full".to_string();
        }
        CycleReport {
            started_at_unix: at,
            duration_ms: 12,
            outcome: CycleOutcome::Evaluated {
                status: snaps.status.clone(),
                temps_celsius: [snaps.miner.temp0, snaps.miner.temp1],
                speed: snaps.speed.clone(),
                evaluation: evaluate(&snaps, &Thresholds::default()),
                action,
            },
        }
    }

    fn failed(at: i64) -> CycleReport {
        CycleReport {
            started_at_unix: at,
            duration_ms: 3,
            outcome: CycleOutcome::Failed {
                document: Some(Document::Status),
                error: "connection refused".to_string(),
            },
        }
    }

    #[test]
    fn alerts_fail_threshold_and_repeat_and_recovery() {
        let mut state = State::new(0);
        let cfg = alerts_cfg();

        for i in 1..=2 {
            state.record_cycle(evaluated(i, false, ActionOutcome::NoAction));
            let events = state.apply_alert_rules(&cfg, i);
            assert!(events.is_empty(), "unexpected event at fail {}", i);
        }

        state.record_cycle(failed(3));
        let events = state.apply_alert_rules(&cfg, 3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Unhealthy);
        assert!(events[0].detail.contains("status.json"));

        state.record_cycle(evaluated(4, false, ActionOutcome::NoAction));
        assert!(state.apply_alert_rules(&cfg, 4).is_empty());

        state.record_cycle(evaluated(3 + 1800, false, ActionOutcome::NoAction));
        let events = state.apply_alert_rules(&cfg, 3 + 1800);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Repeat);

        state.record_cycle(evaluated(20000, true, ActionOutcome::NoAction));
        let events = state.apply_alert_rules(&cfg, 20000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Recovered);
        assert_eq!(events[0].severity(), Severity::Info);
    }

    #[test]
    fn performed_action_is_announced_and_recorded() {
        let mut state = State::new(0);
        let report = evaluated(
            100,
            false,
            ActionOutcome::Performed {
                action: Action::Reboot,
            },
        );
        state.record_cycle(report);
        let events = state.apply_alert_rules(&alerts_cfg(), 100);

        assert_eq!(events[0].kind, AlertEventKind::ActionTaken(Action::Reboot));
        assert_eq!(events[0].headline(), "Sent reboot to the miner");
        assert_eq!(
            state.last_action,
            Some(ActionRecord {
                action: Action::Reboot,
                at_unix: 100
            })
        );
        assert_eq!(state.cycles_total, 1);
    }

    #[test]
    fn cooldown_counts_down_from_last_action() {
        let mut state = State::new(0);
        assert_eq!(state.cooldown_remaining(600, 50), 0);

        state.last_action = Some(ActionRecord {
            action: Action::Fastsync,
            at_unix: 1000,
        });
        assert_eq!(state.cooldown_remaining(600, 1000), 600);
        assert_eq!(state.cooldown_remaining(600, 1450), 150);
        assert_eq!(state.cooldown_remaining(600, 1600), 0);
        assert_eq!(state.cooldown_remaining(0, 1000), 0);
    }

    #[test]
    fn report_serializes_with_result_tag() {
        let report = evaluated(7, true, ActionOutcome::NoAction);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"], "evaluated");
        assert_eq!(json["evaluation"]["decision"], "healthy");
        assert_eq!(json["action"]["kind"], "no_action");

        let json = serde_json::to_value(failed(8)).unwrap();
        assert_eq!(json["result"], "failed");
        assert_eq!(json["document"], "status");
    }
}
