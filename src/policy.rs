use crate::checks::{Check, Verdicts};
use crate::config::Thresholds;
use crate::snapshot::Snapshots;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Reset,
    Resync,
    Fastsync,
    Reboot,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Reset,
        Action::Resync,
        Action::Fastsync,
        Action::Reboot,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Action::Reset => "/admin/reset",
            Action::Resync => "/admin/resync",
            Action::Fastsync => "/admin/fastsync",
            Action::Reboot => "/admin/reboot",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Reset => "reset",
            Action::Resync => "resync",
            Action::Fastsync => "fastsync",
            Action::Reboot => "reboot",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Reset,
    Resync,
    Fastsync,
    Reboot,
    Healthy,
    Degraded,
}

impl Decision {
    pub const ALL: [Decision; 6] = [
        Decision::Reset,
        Decision::Resync,
        Decision::Fastsync,
        Decision::Reboot,
        Decision::Healthy,
        Decision::Degraded,
    ];

    pub fn action(self) -> Option<Action> {
        match self {
            Decision::Reset => Some(Action::Reset),
            Decision::Resync => Some(Action::Resync),
            Decision::Fastsync => Some(Action::Fastsync),
            Decision::Reboot => Some(Action::Reboot),
            Decision::Healthy | Decision::Degraded => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Reset => "reset",
            Decision::Resync => "resync",
            Decision::Fastsync => "fastsync",
            Decision::Reboot => "reboot",
            Decision::Healthy => "healthy",
            Decision::Degraded => "degraded",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const GAP_ANOMALY: &str = "gap_anomaly";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub verdicts: Verdicts,
    pub decision: Decision,
    pub reasons: Vec<String>,
}

struct Rule {
    decision: Decision,
    applies: fn(&Verdicts) -> bool,
    reasons: &'static [Check],
}

// Highest priority first; the first rule that applies wins.
const RULES: [Rule; 5] = [
    Rule {
        decision: Decision::Reset,
        applies: reset_applies,
        reasons: &[Check::ShouldReset, Check::HasErrors],
    },
    Rule {
        decision: Decision::Resync,
        applies: resync_applies,
        reasons: &[Check::ShouldResync],
    },
    Rule {
        decision: Decision::Fastsync,
        applies: fastsync_applies,
        reasons: &[Check::ShouldFastsync],
    },
    Rule {
        decision: Decision::Reboot,
        applies: reboot_applies,
        reasons: &[Check::ShouldReboot],
    },
    Rule {
        decision: Decision::Healthy,
        applies: healthy_applies,
        reasons: &[Check::IsHealthy],
    },
];

fn reset_applies(v: &Verdicts) -> bool {
    v.should_reset
}

fn resync_applies(v: &Verdicts) -> bool {
    v.should_resync
}

fn fastsync_applies(v: &Verdicts) -> bool {
    v.should_fastsync
}

// A miner that is already healthy needs no nudge.
fn reboot_applies(v: &Verdicts) -> bool {
    v.should_reboot && !v.is_healthy
}

fn healthy_applies(v: &Verdicts) -> bool {
    v.is_healthy
}

pub fn evaluate(snapshots: &Snapshots, thresholds: &Thresholds) -> Evaluation {
    let verdicts = Verdicts::compute(snapshots, thresholds);
    let (decision, reasons) = decide(&verdicts);
    Evaluation {
        verdicts,
        decision,
        reasons,
    }
}

pub fn decide(verdicts: &Verdicts) -> (Decision, Vec<String>) {
    if verdicts.gap < 0 {
        let mut reasons = vec![GAP_ANOMALY.to_string()];
        reasons.extend(diagnostics(verdicts));
        return (Decision::Degraded, reasons);
    }

    for rule in &RULES {
        if (rule.applies)(verdicts) {
            let reasons = rule.reasons.iter().map(|c| c.to_string()).collect();
            return (rule.decision, reasons);
        }
    }

    (Decision::Degraded, diagnostics(verdicts))
}

fn diagnostics(v: &Verdicts) -> Vec<String> {
    let mut out = Vec::new();
    for (check, good_when) in [
        (Check::IsRunning, true),
        (Check::IsSynced, true),
        (Check::IsTempSafe, true),
        (Check::HasErrors, false),
        (Check::IsRelayed, false),
        (Check::IsLocalNetworkSlow, false),
    ] {
        let value = v.get(check);
        if value != good_when {
            if good_when {
                out.push(format!("!{check}"));
            } else {
                out.push(check.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::snapshots;

    fn healthy() -> Verdicts {
        Verdicts::compute(&snapshots(), &Thresholds::default())
    }

    #[test]
    fn sample_is_healthy_noop() {
        let eval = evaluate(&snapshots(), &Thresholds::default());
        assert_eq!(eval.decision, Decision::Healthy);
        assert_eq!(eval.decision.action(), None);
        assert_eq!(eval.reasons, vec!["is_healthy".to_string()]);
    }

    #[test]
    fn errors_with_large_gap_reset() {
        let mut snaps = snapshots();
        snaps.miner.errors = "miner crashed".to_string();
        snaps.status.gap = 15_000;
        let eval = evaluate(&snaps, &Thresholds::default());
        assert!(eval.verdicts.should_resync);
        assert_eq!(eval.decision, Decision::Reset);
        assert_eq!(eval.decision.action(), Some(Action::Reset));
        assert_eq!(
            eval.reasons,
            vec!["should_reset".to_string(), "has_errors".to_string()]
        );
    }

    #[test]
    fn large_gap_without_errors_resyncs() {
        let mut snaps = snapshots();
        snaps.status.gap = 10_000;
        let eval = evaluate(&snaps, &Thresholds::default());
        assert!(eval.verdicts.should_reboot);
        assert_eq!(eval.decision, Decision::Resync);
    }

    #[test]
    fn moderate_gap_fastsyncs() {
        let mut snaps = snapshots();
        snaps.status.gap = 500;
        snaps.status.status = "Syncing".to_string();
        let eval = evaluate(&snaps, &Thresholds::default());
        assert_eq!(eval.decision, Decision::Fastsync);
    }

    #[test]
    fn small_gap_healthy_is_noop() {
        let mut snaps = snapshots();
        snaps.status.gap = 50;
        let eval = evaluate(&snaps, &Thresholds::default());
        assert!(!matches!(
            eval.decision,
            Decision::Fastsync | Decision::Resync | Decision::Reset
        ));
        assert_eq!(eval.decision, Decision::Healthy);
    }

    #[test]
    fn small_gap_not_healthy_reboots() {
        let mut snaps = snapshots();
        snaps.status.gap = 50;
        snaps.miner.state = "exited".to_string();
        let eval = evaluate(&snaps, &Thresholds::default());
        assert_eq!(eval.decision, Decision::Reboot);
        assert_eq!(eval.reasons, vec!["should_reboot".to_string()]);
    }

    #[test]
    fn errors_with_small_gap_are_degraded() {
        let mut snaps = snapshots();
        snaps.status.gap = 10;
        snaps.miner.errors = "disk full".to_string();
        snaps.speed.latency = 120;
        let eval = evaluate(&snaps, &Thresholds::default());
        assert_eq!(eval.decision, Decision::Degraded);
        assert_eq!(eval.decision.action(), None);
        assert_eq!(
            eval.reasons,
            vec!["has_errors".to_string(), "is_local_network_slow".to_string()]
        );
    }

    #[test]
    fn negative_gap_is_an_anomaly() {
        let mut v = healthy();
        v.gap = -5;
        let (decision, reasons) = decide(&v);
        assert_eq!(decision, Decision::Degraded);
        assert_eq!(reasons[0], GAP_ANOMALY);
    }

    #[test]
    fn priority_order_over_all_rule_combinations() {
        for bits in 0..32_u8 {
            let mut v = healthy();
            v.should_reset = bits & 1 != 0;
            v.should_resync = bits & 2 != 0;
            v.should_fastsync = bits & 4 != 0;
            v.should_reboot = bits & 8 != 0;
            v.is_healthy = bits & 16 != 0;

            let expected = if v.should_reset {
                Decision::Reset
            } else if v.should_resync {
                Decision::Resync
            } else if v.should_fastsync {
                Decision::Fastsync
            } else if v.should_reboot && !v.is_healthy {
                Decision::Reboot
            } else if v.is_healthy {
                Decision::Healthy
            } else {
                Decision::Degraded
            };
            assert_eq!(decide(&v).0, expected, "bits {bits:05b}");
        }
    }

    #[test]
    fn every_action_has_an_admin_path() {
        for action in Action::ALL {
            assert!(action.path().starts_with("/admin/"));
            assert!(action.path().ends_with(action.as_str()));
        }
    }
}
