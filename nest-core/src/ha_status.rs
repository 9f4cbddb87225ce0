//! Engine HA status query.
//!
//! Each HA agent reports per-host stats whose `engine-status` field is a
//! JSON-encoded health blob. This module summarizes those records to "the
//! engine runs here / on host X / nowhere", keeping daemon-unreachable and
//! malformed-response failures apart instead of collapsing them into one
//! string.

use serde::Deserialize;
use std::env;
use std::fmt;
use std::process::Command;
use thiserror::Error;

/// Display strings stay short; the payload carried by the variants is for
/// the log, not the operator.
#[derive(Error, Debug)]
pub enum HaStatusError {
    #[error("Cannot connect to HA daemon, please check the logs")]
    DaemonUnreachable(String),

    #[error("Malformed HA agent response")]
    MalformedResponse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStats {
    #[serde(rename = "host-id")]
    pub host_id: u64,
    pub hostname: String,
    /// JSON-encoded health blob, exactly as the agent reports it.
    #[serde(rename = "engine-status")]
    pub engine_status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EngineHealth {
    health: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    RunningHere,
    RunningOn(String),
    DownOrNotDeployed,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::RunningHere => write!(f, "Engine is running here"),
            EngineStatus::RunningOn(host) => write!(f, "Engine is running on {}", host),
            EngineStatus::DownOrNotDeployed => write!(f, "Engine is down or not deployed."),
        }
    }
}

/// Seam over the HA agent so the summary logic stays testable without a
/// daemon.
pub trait HaClient {
    fn all_host_stats(&self) -> Result<Vec<HostStats>, HaStatusError>;
    fn local_host_id(&self) -> Option<u64>;
}

/// Summarize where (and whether) a healthy engine is running.
pub fn engine_status(client: &dyn HaClient) -> Result<EngineStatus, HaStatusError> {
    let stats = client.all_host_stats()?;
    let local_id = client.local_host_id();
    for host in stats {
        let health: EngineHealth = serde_json::from_str(&host.engine_status)?;
        if health.health == "good" {
            return Ok(if local_id == Some(host.host_id) {
                EngineStatus::RunningHere
            } else {
                EngineStatus::RunningOn(host.hostname)
            });
        }
    }
    Ok(EngineStatus::DownOrNotDeployed)
}

/// Queries the HA agent through the `hosted-engine` CLI, which prints a JSON
/// map of host id to stats (plus cluster-wide scalars, which are skipped).
#[derive(Debug, Default)]
pub struct CommandHaClient {
    local_host_id: Option<u64>,
}

impl CommandHaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_host_id(local_host_id: Option<u64>) -> Self {
        Self { local_host_id }
    }
}

fn ha_status_command() -> Command {
    let executable =
        env::var("NEST_HA_STATUS_COMMAND").unwrap_or_else(|_| "hosted-engine".into());
    let mut cmd = Command::new(executable);
    cmd.args(["--vm-status", "--json"]);
    cmd
}

pub(crate) fn parse_host_stats(payload: &[u8]) -> Result<Vec<HostStats>, HaStatusError> {
    let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)?;
    let mut stats = Vec::new();
    for (_, value) in raw {
        // Cluster-wide scalars like "global_maintenance" sit next to the
        // per-host records.
        if value.is_object() {
            stats.push(serde_json::from_value(value)?);
        }
    }
    Ok(stats)
}

impl HaClient for CommandHaClient {
    fn all_host_stats(&self) -> Result<Vec<HostStats>, HaStatusError> {
        let output = ha_status_command()
            .output()
            .map_err(|err| HaStatusError::DaemonUnreachable(err.to_string()))?;
        if !output.status.success() {
            return Err(HaStatusError::DaemonUnreachable(format!(
                "status query exited with {}",
                output.status
            )));
        }
        parse_host_stats(&output.stdout)
    }

    fn local_host_id(&self) -> Option<u64> {
        self.local_host_id
    }
}
