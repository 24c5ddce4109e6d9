//! Telemetry snapshot types
//!
//! Pollers (external collaborators — see spec §1) call `Check*` with one of
//! these per poll cycle. Fields mirror what each resource evaluator in
//! `alert::evaluators` actually reads; anything a poller doesn't know about a
//! given resource is simply left at its `Default`.

use serde::{Deserialize, Serialize};

// `ResourceKind` lives in `crate::config` — threshold lookup and telemetry
// ingress share the same type rather than converting between twins.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

/// A single mounted filesystem inside a guest, evaluated as its own metric
/// identity (spec §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemUsage {
    pub mountpoint: String,
    pub device: String,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSnapshot {
    pub id: String,
    pub name: String,
    pub node: String,
    pub vmid: u32,
    pub status: GuestStatus,
    /// CPU fraction already scaled ×100 by the poller.
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub filesystems: Vec<FilesystemUsage>,
    /// Bytes/second; converted to MB/s at evaluation time.
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_in_bytes_per_sec: f64,
    pub network_out_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_in_bytes_per_sec: f64,
    pub network_out_bytes_per_sec: f64,
    /// CPU package or max-core temperature in °C, if reported.
    pub temperature_celsius: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbsSnapshot {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmgQueueNode {
    pub node: String,
    pub total: u64,
    pub deferred: u64,
    pub hold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmgSnapshot {
    pub instance: String,
    pub online: bool,
    pub nodes: Vec<PmgQueueNode>,
    /// Age in seconds of the oldest queued message across the cluster.
    pub oldest_queue_message_age_secs: Option<f64>,
    pub quarantine_spam_count: u64,
    pub quarantine_virus_count: u64,
    /// Hourly sample for the spam/virus anomaly baseline (spec §4.6).
    pub spam_in_hourly: Option<f64>,
    pub virus_in_hourly: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZfsDeviceState {
    Online,
    Spare,
    Degraded,
    Faulted,
    Unavail,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZfsDevice {
    pub name: String,
    pub state: ZfsDeviceState,
    pub read_errors: u64,
    pub write_errors: u64,
    pub checksum_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZfsPool {
    pub name: String,
    pub state: ZfsDeviceState,
    pub devices: Vec<ZfsDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub id: String,
    pub name: String,
    pub node: String,
    /// Whether the remote-storage link reports the resource reachable.
    pub online: bool,
    /// Online-but-inactive is explicitly *not* offline (spec §4.5).
    pub active: bool,
    pub is_remote: bool,
    pub usage_percent: f64,
    pub zfs_pool: Option<ZfsPool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerContainerState {
    Running,
    Exited,
    Dead,
    Created,
    Paused,
    Restarting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerHostSnapshot {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerContainerSnapshot {
    pub id: String,
    pub name: String,
    pub host_id: String,
    pub state: DockerContainerState,
    /// `healthy` / `unhealthy` / `starting` / `none` / `""`.
    pub health: String,
    pub exit_code: Option<i32>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_limit_bytes: u64,
    pub memory_used_bytes: u64,
    /// Cumulative restart counter as reported by the runtime.
    pub restart_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub guest_id: String,
    pub name: String,
    pub age_days: f64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupSource {
    Storage,
    Pbs,
    Pmg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub instance: String,
    pub node: String,
    pub vmid: String,
    pub source: BackupSource,
    /// Filename used to disambiguate PMG backups sharing an instance tag.
    pub filename: Option<String>,
    pub timestamp_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskHealthSnapshot {
    pub device: String,
    pub healthy: bool,
    pub temperature_celsius: Option<f64>,
    pub reallocated_sectors: u64,
}
