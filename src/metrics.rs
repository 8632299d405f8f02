use crate::checks::Check;
use crate::policy::{Action, Decision};
use crate::state::{now_unix, ActionOutcome, CycleOutcome, State};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bobcat_up: Gauge,
    pub bobcat_gap_blocks: Gauge,
    pub bobcat_miner_height: Gauge,
    pub bobcat_blockchain_height: Gauge,
    pub bobcat_temperature_celsius: GaugeVec,
    pub bobcat_download_mbits: Gauge,
    pub bobcat_upload_mbits: Gauge,
    pub bobcat_latency_ms: Gauge,
    pub bobcat_check: GaugeVec,
    pub bobcat_decision: GaugeVec,
    pub bobcat_cycles_total: Counter,
    pub bobcat_fetch_errors_total: CounterVec,
    pub bobcat_actions_total: CounterVec,
    pub bobcat_notifications_sent_total: CounterVec,
    pub bobcat_last_cycle_timestamp_seconds: Gauge,
    pub agent_uptime_seconds: Gauge,
    pub agent_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let bobcat_up = Gauge::with_opts(opts!(
            "bobcat_up",
            "1 if the last cycle could read and evaluate the miner"
        ))?;
        let bobcat_gap_blocks = Gauge::with_opts(opts!(
            "bobcat_gap_blocks",
            "Blocks between the miner height and the blockchain height"
        ))?;
        let bobcat_miner_height =
            Gauge::with_opts(opts!("bobcat_miner_height", "Miner block height"))?;
        let bobcat_blockchain_height = Gauge::with_opts(opts!(
            "bobcat_blockchain_height",
            "Blockchain height reported by the miner"
        ))?;
        let bobcat_temperature_celsius = GaugeVec::new(
            opts!(
                "bobcat_temperature_celsius",
                "Miner temperature by sensor in Celsius"
            ),
            &["sensor"],
        )?;
        let bobcat_download_mbits = Gauge::with_opts(opts!(
            "bobcat_download_mbits",
            "Local network download speed in Mbit/s"
        ))?;
        let bobcat_upload_mbits = Gauge::with_opts(opts!(
            "bobcat_upload_mbits",
            "Local network upload speed in Mbit/s"
        ))?;
        let bobcat_latency_ms =
            Gauge::with_opts(opts!("bobcat_latency_ms", "Local network latency in ms"))?;
        let bobcat_check = GaugeVec::new(
            opts!("bobcat_check", "Health predicate result 0/1 by check"),
            &["check"],
        )?;
        let bobcat_decision = GaugeVec::new(
            opts!(
                "bobcat_decision",
                "1 for the decision selected by the last evaluated cycle"
            ),
            &["decision"],
        )?;
        let bobcat_cycles_total =
            Counter::with_opts(opts!("bobcat_cycles_total", "Poll cycles run"))?;
        let bobcat_fetch_errors_total = CounterVec::new(
            opts!(
                "bobcat_fetch_errors_total",
                "Failed document fetches by document"
            ),
            &["document"],
        )?;
        let bobcat_actions_total = CounterVec::new(
            opts!(
                "bobcat_actions_total",
                "Admin actions by action and result"
            ),
            &["action", "result"],
        )?;
        let bobcat_notifications_sent_total = CounterVec::new(
            opts!(
                "bobcat_notifications_sent_total",
                "Notifications delivered by channel"
            ),
            &["channel"],
        )?;
        let bobcat_last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "bobcat_last_cycle_timestamp_seconds",
            "Unix timestamp of the last poll cycle"
        ))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &bobcat_up)?;
        register(&registry, &bobcat_gap_blocks)?;
        register(&registry, &bobcat_miner_height)?;
        register(&registry, &bobcat_blockchain_height)?;
        register(&registry, &bobcat_temperature_celsius)?;
        register(&registry, &bobcat_download_mbits)?;
        register(&registry, &bobcat_upload_mbits)?;
        register(&registry, &bobcat_latency_ms)?;
        register(&registry, &bobcat_check)?;
        register(&registry, &bobcat_decision)?;
        register(&registry, &bobcat_cycles_total)?;
        register(&registry, &bobcat_fetch_errors_total)?;
        register(&registry, &bobcat_actions_total)?;
        register(&registry, &bobcat_notifications_sent_total)?;
        register(&registry, &bobcat_last_cycle_timestamp_seconds)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &agent_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            bobcat_up,
            bobcat_gap_blocks,
            bobcat_miner_height,
            bobcat_blockchain_height,
            bobcat_temperature_celsius,
            bobcat_download_mbits,
            bobcat_upload_mbits,
            bobcat_latency_ms,
            bobcat_check,
            bobcat_decision,
            bobcat_cycles_total,
            bobcat_fetch_errors_total,
            bobcat_actions_total,
            bobcat_notifications_sent_total,
            bobcat_last_cycle_timestamp_seconds,
            agent_uptime_seconds,
            agent_scrape_count_total,
        }))
    }

    // Mirrors the last cycle into the gauges. A failed cycle keeps the
    // previous readings and only drops `bobcat_up`.
    pub fn update_from_state(&self, state: &State) {
        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.agent_uptime_seconds.set(uptime);

        let Some(report) = &state.last_cycle else {
            return;
        };
        self.bobcat_last_cycle_timestamp_seconds
            .set(report.started_at_unix as f64);

        let CycleOutcome::Evaluated {
            status,
            temps_celsius,
            speed,
            evaluation,
            ..
        } = &report.outcome
        else {
            self.bobcat_up.set(0.0);
            return;
        };

        self.bobcat_up.set(1.0);
        self.bobcat_gap_blocks.set(status.gap as f64);
        self.bobcat_miner_height.set(status.miner_height as f64);
        self.bobcat_blockchain_height
            .set(status.blockchain_height as f64);
        for (i, temp) in temps_celsius.iter().enumerate() {
            self.bobcat_temperature_celsius
                .with_label_values(&[&format!("temp{i}")])
                .set(*temp as f64);
        }
        self.bobcat_download_mbits.set(speed.download_speed as f64);
        self.bobcat_upload_mbits.set(speed.upload_speed as f64);
        self.bobcat_latency_ms.set(speed.latency as f64);

        for check in Check::ALL {
            self.bobcat_check
                .with_label_values(&[check.as_str()])
                .set(if evaluation.verdicts.get(check) { 1.0 } else { 0.0 });
        }
        for decision in Decision::ALL {
            self.bobcat_decision
                .with_label_values(&[decision.as_str()])
                .set(if decision == evaluation.decision {
                    1.0
                } else {
                    0.0
                });
        }
    }

    pub fn observe_action(&self, outcome: &ActionOutcome) {
        let (action, result): (Action, &str) = match outcome {
            ActionOutcome::NoAction => return,
            ActionOutcome::Performed { action } => (*action, "performed"),
            ActionOutcome::DryRun { action } => (*action, "dry_run"),
            ActionOutcome::CoolingDown { action, .. } => (*action, "cooling_down"),
            ActionOutcome::Failed { action, .. } => (*action, "failed"),
        };
        self.bobcat_actions_total
            .with_label_values(&[action.as_str(), result])
            .inc();
    }

    pub fn inc_cycle(&self) {
        self.bobcat_cycles_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn inc_fetch_error(&self, document: &str) {
        self.bobcat_fetch_errors_total
            .with_label_values(&[document])
            .inc();
    }

    pub fn inc_notification_sent(&self, channel: &str, count: usize) {
        self.bobcat_notifications_sent_total
            .with_label_values(&[channel])
            .inc_by(count as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
