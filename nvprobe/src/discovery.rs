//! NVMe device discovery from the block-device listing.

use crate::exec::{CommandError, CommandRunner, CommandSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to list block devices: {0}")]
    Command(#[from] CommandError),

    #[error("lsblk exited with code {exit_code}: {stderr}")]
    CommandFailure { exit_code: i32, stderr: String },
}

/// One row of `lsblk -d -n -o NAME,TYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub kind: String,
}

impl BlockDevice {
    pub fn path(&self) -> PathBuf {
        PathBuf::from("/dev").join(&self.name)
    }

    pub fn is_nvme_disk(&self) -> bool {
        self.kind == "disk" && self.name.starts_with("nvme")
    }
}

/// Finds NVMe namespaces through `lsblk`.
#[derive(Debug)]
pub struct DeviceDiscovery<R> {
    runner: Arc<R>,
    timeout: Duration,
}

impl<R: CommandRunner> DeviceDiscovery<R> {
    pub fn new(runner: Arc<R>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// All NVMe disks, in listing order.
    pub async fn nvme_devices(&self) -> Result<Vec<BlockDevice>, DiscoveryError> {
        let spec = CommandSpec::new("lsblk")
            .args(["-d", "-n", "-o", "NAME,TYPE"])
            .with_timeout(self.timeout);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(DiscoveryError::CommandFailure {
                exit_code: output.exit_code,
                stderr: output.diagnostic().to_string(),
            });
        }

        let devices: Vec<_> = parse_lsblk(&output.stdout)
            .into_iter()
            .filter(BlockDevice::is_nvme_disk)
            .collect();
        debug!(count = devices.len(), "NVMe devices listed");
        Ok(devices)
    }

    /// The first NVMe disk, if any.
    pub async fn discover_primary_device(&self) -> Result<Option<PathBuf>, DiscoveryError> {
        let device = self.nvme_devices().await?.first().map(BlockDevice::path);
        match &device {
            Some(path) => info!(device = %path.display(), "Detected NVMe device"),
            None => info!("No NVMe device found"),
        }
        Ok(device)
    }
}

/// Parse `NAME TYPE` rows; blank and malformed lines are skipped.
pub fn parse_lsblk(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let kind = cols.next()?;
            Some(BlockDevice {
                name: name.to_string(),
                kind: kind.to_string(),
            })
        })
        .collect()
}
