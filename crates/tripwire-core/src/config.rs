//! Client and server configuration primitives.
//!
//! These types are shared by the config file, the control-plane endpoints
//! (which accept the same YAML shapes at runtime) and the request wire
//! format. Durations accept human-readable suffixes (`40ms`, `2s`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TripwireError, TripwireResult};
use crate::service_time::WeightedServiceTimes;

/// Sequential client load step.
///
/// `rps` and `service_times` carry over from the previous stage when unset;
/// the first stage must specify both. An `rps` of 0 disables the stage (its
/// duration still elapses).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stage {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    #[serde(default)]
    pub rps: Option<u32>,

    #[serde(default)]
    pub service_times: Option<WeightedServiceTimes>,
}

impl Stage {
    /// Request rate after carry-over normalization.
    pub fn rps(&self) -> u32 {
        self.rps.unwrap_or(0)
    }

    /// Distribution after carry-over normalization.
    pub fn service_times(&self) -> WeightedServiceTimes {
        self.service_times.clone().unwrap_or_default()
    }
}

/// Concurrent, long-running load channel. Mutable at runtime through the
/// control plane, where a replacement set atomically supersedes the current
/// one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Workload {
    pub name: String,

    pub rps: u32,

    /// Reserved scheduling priority; parsed for config compatibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    pub service_times: WeightedServiceTimes,
}

/// Client-side load description: either concurrent workloads or sequential
/// stages. A non-empty workload list selects workload mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub workloads: Vec<Workload>,

    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl ClientConfig {
    /// Resolves stage carry-over and validates the load description.
    /// Must run once after parsing, before the config is used.
    pub fn normalize(&mut self) -> TripwireResult<()> {
        validate_workloads(&self.workloads)?;

        let mut prev_rps: Option<u32> = None;
        let mut prev_times: Option<WeightedServiceTimes> = None;
        for (index, stage) in self.stages.iter_mut().enumerate() {
            if stage.rps.is_none() {
                stage.rps = prev_rps;
            }
            if stage.service_times.is_none() {
                stage.service_times = prev_times.clone();
            }
            let Some(rps) = stage.rps else {
                return Err(TripwireError::config(format!(
                    "stage {index} has no rps and none to carry over"
                )));
            };
            let Some(times) = &stage.service_times else {
                return Err(TripwireError::config(format!(
                    "stage {index} has no service_times and none to carry over"
                )));
            };
            if rps > 0 && times.is_empty() {
                return Err(TripwireError::config(format!(
                    "stage {index} has an empty service-time distribution"
                )));
            }
            prev_rps = stage.rps;
            prev_times = stage.service_times.clone();
        }
        Ok(())
    }

    /// Total wall-clock duration of the staged load, zero in workload mode.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }
}

/// Validates a workload set; also used for control-plane replacements.
pub fn validate_workloads(workloads: &[Workload]) -> TripwireResult<()> {
    for workload in workloads {
        if workload.name.is_empty() {
            return Err(TripwireError::config("workload has an empty name"));
        }
        if workload.rps == 0 {
            return Err(TripwireError::config(format!(
                "workload `{}` has rps 0",
                workload.name
            )));
        }
        if workload.service_times.is_empty() {
            return Err(TripwireError::config(format!(
                "workload `{}` has an empty service-time distribution",
                workload.name
            )));
        }
    }
    Ok(())
}

/// Simulated server sizing. `threads` bounds the worker semaphore and is
/// adjustable at runtime through the control plane.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ServerConfig {
    pub threads: u32,
}

impl ServerConfig {
    /// Rejects a zero-sized worker pool.
    pub fn validate(&self) -> TripwireResult<()> {
        if self.threads == 0 {
            return Err(TripwireError::config("server threads must be positive"));
        }
        Ok(())
    }
}

/// Request wire format: the client declares the service time the server
/// should simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimRequest {
    #[serde(with = "humantime_serde")]
    pub service_time: Duration,
}
