//! Accelerator discovery.
//!
//! Detection never fails a run: any probe error degrades to an empty topology
//! and the scheduler falls back to interchangeable CPU workers.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::ProbeError;

/// Environment variable restricting which CUDA devices a process may see.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Source of the raw accelerator count.
pub trait AcceleratorProbe: Send + Sync {
    fn device_count(&self) -> Result<usize, ProbeError>;
}

/// Counts NVIDIA GPUs via `nvidia-smi --list-gpus`.
pub struct NvidiaSmiProbe {
    program: PathBuf,
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("nvidia-smi"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceleratorProbe for NvidiaSmiProbe {
    fn device_count(&self) -> Result<usize, ProbeError> {
        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .arg("--list-gpus")
            .output()
            .map_err(|e| ProbeError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                program,
                status: output.status.to_string(),
            });
        }

        Ok(count_listed_gpus(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// A probe reporting a fixed count.
pub struct FixedProbe(pub usize);

impl AcceleratorProbe for FixedProbe {
    fn device_count(&self) -> Result<usize, ProbeError> {
        Ok(self.0)
    }
}

fn count_listed_gpus(stdout: &str) -> usize {
    stdout
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count()
}

/// Accelerators this process may schedule onto.
///
/// `devices[g]` is the identifier handed to child processes for logical
/// accelerator `g`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceleratorTopology {
    devices: Vec<String>,
}

impl AcceleratorTopology {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_count(count: usize) -> Self {
        Self {
            devices: (0..count).map(|i| i.to_string()).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Identifier of logical accelerator `index`.
    pub fn device_id(&self, index: usize) -> Option<&str> {
        self.devices.get(index).map(String::as_str)
    }

    /// Applies a `CUDA_VISIBLE_DEVICES`-style restriction.
    ///
    /// Unset means unrestricted; an empty value or `-1` hides every device.
    fn restrict(count: usize, visible: Option<&str>) -> Self {
        let Some(visible) = visible else {
            return Self::with_count(count);
        };

        let listed: Vec<String> = visible
            .split(',')
            .map(|s| s.trim())
            .take_while(|s| !s.is_empty() && !s.starts_with('-'))
            .map(|s| s.to_string())
            .collect();

        Self {
            devices: listed.into_iter().take(count).collect(),
        }
    }
}

/// Queries the probe and returns the usable topology, or none on any failure.
pub fn detect(probe: &dyn AcceleratorProbe) -> AcceleratorTopology {
    let visible = std::env::var(VISIBLE_DEVICES_ENV).ok();
    detect_with_visible(probe, visible.as_deref())
}

fn detect_with_visible(probe: &dyn AcceleratorProbe, visible: Option<&str>) -> AcceleratorTopology {
    match probe.device_count() {
        Ok(count) => {
            let topology = AcceleratorTopology::restrict(count, visible);
            info!("Detected {} accelerator(s)", topology.count());
            if topology.count() != count {
                debug!(
                    "{}={:?} restricts {} physical device(s) to {}",
                    VISIBLE_DEVICES_ENV,
                    visible,
                    count,
                    topology.count()
                );
            }
            topology
        }
        Err(e) => {
            warn!("Could not detect accelerators, continuing on CPU: {}", e);
            AcceleratorTopology::none()
        }
    }
}
