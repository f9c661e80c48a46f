//! Durable deployment history, one directory per network.
//!
//! Every successful run appends `deploy-<epochMillis>.json` and replaces
//! `latest.json` with the same payload.

use crate::reports;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use eyre::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const LATEST_FILE: &str = "latest.json";

/// Contract name to deployed address.
pub type ContractAddresses = BTreeMap<String, Address>;

/// Everything one orchestrator run deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub network: String,
    #[serde(serialize_with = "reports::checksum::address")]
    pub deployer: Address,
    #[serde(serialize_with = "reports::checksum::addresses")]
    pub contracts: ContractAddresses,
    #[serde(with = "reports::timestamp")]
    pub deployed_at: DateTime<Utc>,
    #[serde(rename = "blockNumber")]
    pub deployed_at_block: u64,
}

/// A history entry as stored under `deployments/<network>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    #[serde(with = "reports::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub network: String,
    #[serde(serialize_with = "reports::checksum::addresses")]
    pub contracts: ContractAddresses,
}

#[derive(Debug, Clone)]
pub struct DeploymentRecorder {
    root: PathBuf,
}

impl DeploymentRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn network_dir(&self, network: &str) -> PathBuf {
        self.root.join(network)
    }

    /// Append a snapshot of `record` and point `latest.json` at it.
    pub fn save(&self, record: &DeploymentRecord) -> Result<PathBuf> {
        self.record_at(&record.network, &record.contracts, record.deployed_at)
    }

    /// Write a snapshot keyed by `at`. A second write in the same
    /// millisecond replaces the first.
    pub fn record_at(
        &self,
        network: &str,
        contracts: &ContractAddresses,
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        validate_network_name(network)?;

        let snapshot = DeploymentSnapshot {
            timestamp: at,
            network: network.to_string(),
            contracts: contracts.clone(),
        };

        let dir = self.network_dir(network);
        let path = dir.join(format!("deploy-{}.json", at.timestamp_millis()));
        reports::write_json(&path, &snapshot)?;
        reports::write_json(&dir.join(LATEST_FILE), &snapshot)?;

        info!(path = %path.display(), "deployment snapshot saved");
        Ok(path)
    }

    /// The most recent snapshot for `network`, if any run was recorded.
    pub fn latest(&self, network: &str) -> Result<Option<DeploymentSnapshot>> {
        validate_network_name(network)?;
        let path = self.network_dir(network).join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        reports::read_json(&path).map(Some)
    }
}

/// Write the single-file summary older tooling reads.
pub fn write_legacy(path: &Path, record: &DeploymentRecord) -> Result<()> {
    reports::write_json(path, record)?;
    info!(path = %path.display(), "combined deployment file saved");
    Ok(())
}

// Network names become directory names.
fn validate_network_name(network: &str) -> Result<()> {
    if network.is_empty()
        || network == "."
        || network == ".."
        || network.contains(['/', '\\'])
    {
        bail!("invalid network name `{network}`");
    }
    Ok(())
}
