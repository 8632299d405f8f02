use crate::config::Thresholds;
use crate::snapshot::{MinerSnapshot, Snapshots, SpeedSnapshot, StatusSnapshot};
use serde::Serialize;
use std::fmt;

const DIRECT_LISTEN_PORT: u16 = 44158;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    IsRunning,
    IsSynced,
    IsTempSafe,
    HasErrors,
    IsHealthy,
    IsRelayed,
    IsLocalNetworkSlow,
    ShouldFastsync,
    ShouldResync,
    ShouldReboot,
    ShouldReset,
}

impl Check {
    pub const ALL: [Check; 11] = [
        Check::IsRunning,
        Check::IsSynced,
        Check::IsTempSafe,
        Check::HasErrors,
        Check::IsHealthy,
        Check::IsRelayed,
        Check::IsLocalNetworkSlow,
        Check::ShouldFastsync,
        Check::ShouldResync,
        Check::ShouldReboot,
        Check::ShouldReset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Check::IsRunning => "is_running",
            Check::IsSynced => "is_synced",
            Check::IsTempSafe => "is_temp_safe",
            Check::HasErrors => "has_errors",
            Check::IsHealthy => "is_healthy",
            Check::IsRelayed => "is_relayed",
            Check::IsLocalNetworkSlow => "is_local_network_slow",
            Check::ShouldFastsync => "should_fastsync",
            Check::ShouldResync => "should_resync",
            Check::ShouldReboot => "should_reboot",
            Check::ShouldReset => "should_reset",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_running(miner: &MinerSnapshot) -> bool {
    miner.state.trim().eq_ignore_ascii_case("running")
}

pub fn is_synced(status: &StatusSnapshot) -> bool {
    status.status.trim().eq_ignore_ascii_case("synced")
}

pub fn is_temp_safe(miner: &MinerSnapshot, t: &Thresholds) -> bool {
    let safe = t.temp_min_celsius..t.temp_max_celsius;
    safe.contains(&miner.temp0) && safe.contains(&miner.temp1)
}

pub fn has_errors(miner: &MinerSnapshot) -> bool {
    !miner.errors.is_empty()
        || mentions_error(&miner.state)
        || mentions_error(&miner.container_status)
        || mentions_error(&miner.epoch)
        || [&miner.p2p_status, &miner.height, &miner.peerbook]
            .into_iter()
            .flatten()
            .any(|line| mentions_error(line))
}

pub fn is_healthy(status: &StatusSnapshot, miner: &MinerSnapshot, t: &Thresholds) -> bool {
    is_running(miner) && is_synced(status) && is_temp_safe(miner, t) && !has_errors(miner)
}

// A hotspot that advertises its own public address on the direct port is not
// relayed. Every peerbook line is searched, the listen_addrs table included.
pub fn is_relayed(miner: &MinerSnapshot) -> bool {
    let direct = format!("/ip4/{}/tcp/{DIRECT_LISTEN_PORT}", miner.public_ip).to_lowercase();
    !miner
        .peerbook
        .iter()
        .any(|line| line.to_lowercase().contains(&direct))
}

pub fn is_local_network_slow(speed: &SpeedSnapshot, t: &Thresholds) -> bool {
    speed.download_speed < t.min_download_mbits
        || speed.upload_speed < t.min_upload_mbits
        || speed.latency > t.max_latency_ms
}

pub fn should_fastsync(status: &StatusSnapshot, t: &Thresholds) -> bool {
    status.gap > t.fastsync_gap && status.gap < t.resync_gap
}

pub fn should_resync(status: &StatusSnapshot, t: &Thresholds) -> bool {
    status.gap >= t.resync_gap
}

pub fn should_reboot(status: &StatusSnapshot, miner: &MinerSnapshot, t: &Thresholds) -> bool {
    !has_errors(miner) && status.gap <= t.resync_gap
}

pub fn should_reset(status: &StatusSnapshot, miner: &MinerSnapshot, t: &Thresholds) -> bool {
    has_errors(miner) && status.gap > t.resync_gap
}

fn mentions_error(text: &str) -> bool {
    text.to_lowercase().contains("error")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdicts {
    pub gap: i64,
    pub is_running: bool,
    pub is_synced: bool,
    pub is_temp_safe: bool,
    pub has_errors: bool,
    pub is_healthy: bool,
    pub is_relayed: bool,
    pub is_local_network_slow: bool,
    pub should_fastsync: bool,
    pub should_resync: bool,
    pub should_reboot: bool,
    pub should_reset: bool,
    pub dig_available: bool,
}

impl Verdicts {
    pub fn compute(snapshots: &Snapshots, t: &Thresholds) -> Self {
        let Snapshots {
            status,
            miner,
            speed,
            dig,
        } = snapshots;
        Self {
            gap: status.gap,
            is_running: is_running(miner),
            is_synced: is_synced(status),
            is_temp_safe: is_temp_safe(miner, t),
            has_errors: has_errors(miner),
            is_healthy: is_healthy(status, miner, t),
            is_relayed: is_relayed(miner),
            is_local_network_slow: is_local_network_slow(speed, t),
            should_fastsync: should_fastsync(status, t),
            should_resync: should_resync(status, t),
            should_reboot: should_reboot(status, miner, t),
            should_reset: should_reset(status, miner, t),
            dig_available: dig.is_some(),
        }
    }

    pub fn get(&self, check: Check) -> bool {
        match check {
            Check::IsRunning => self.is_running,
            Check::IsSynced => self.is_synced,
            Check::IsTempSafe => self.is_temp_safe,
            Check::HasErrors => self.has_errors,
            Check::IsHealthy => self.is_healthy,
            Check::IsRelayed => self.is_relayed,
            Check::IsLocalNetworkSlow => self.is_local_network_slow,
            Check::ShouldFastsync => self.should_fastsync,
            Check::ShouldResync => self.should_resync,
            Check::ShouldReboot => self.should_reboot,
            Check::ShouldReset => self.should_reset,
        }
    }

    pub fn summary(&self) -> String {
        [
            Check::IsRunning,
            Check::IsSynced,
            Check::IsTempSafe,
            Check::HasErrors,
            Check::IsRelayed,
            Check::IsLocalNetworkSlow,
        ]
        .iter()
        .map(|c| format!("{c}={}", self.get(*c)))
        .chain(std::iter::once(format!("gap={}", self.gap)))
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::snapshot::fixtures::{DIG, MINER, SPEED, STATUS};
    use crate::snapshot::*;

    pub fn status() -> StatusSnapshot {
        StatusSnapshot::from_json(STATUS).unwrap()
    }

    pub fn miner() -> MinerSnapshot {
        MinerSnapshot::from_json(MINER).unwrap()
    }

    pub fn speed() -> SpeedSnapshot {
        SpeedSnapshot::from_json(SPEED).unwrap()
    }

    pub fn snapshots() -> Snapshots {
        Snapshots {
            status: status(),
            miner: miner(),
            speed: speed(),
            dig: Some(DigSnapshot::from_json(DIG).unwrap()),
        }
    }
}
