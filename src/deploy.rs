//! Sequential deployment of a contract set.

use crate::artifacts::ArtifactStore;
use crate::chain::{Chain, ChainError, Receipt};
use crate::recorder::{self, ContractAddresses, DeploymentRecord, DeploymentRecorder};
use crate::types::CompiledContract;
use crate::verify::{VerificationRequest, Verifier};
use alloy_primitives::{Address, Bytes};
use chrono::{SubsecRound, Utc};
use eyre::{Result, WrapErr};
use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// A contract failed to deploy; the run stopped there.
///
/// `deployed` lists what made it on-chain before the failure. Those
/// contracts stay deployed but are not recorded.
#[derive(Debug, Error)]
#[error("deployment of `{contract}` failed{}", already_deployed(deployed))]
pub struct DeploymentAborted {
    pub contract: String,
    pub deployed: Vec<(String, Address)>,
    #[source]
    pub source: Box<dyn StdError + Send + Sync + 'static>,
}

fn already_deployed(deployed: &[(String, Address)]) -> String {
    if deployed.is_empty() {
        return String::new();
    }
    let list: Vec<_> = deployed
        .iter()
        .map(|(name, address)| format!("{name} at {address}"))
        .collect();
    format!(" (already on-chain, not recorded: {})", list.join(", "))
}

/// Where and how the contracts are deployed.
pub struct DeployTarget<'a> {
    pub network: &'a str,
    /// Development networks skip explorer verification.
    pub local: bool,
}

/// A completed deployment run.
#[derive(Debug)]
pub struct Deployment {
    pub record: DeploymentRecord,
    pub snapshot: PathBuf,
    /// Artifacts of the deployed contracts, in deployment order.
    pub contracts: Vec<CompiledContract>,
}

impl Deployment {
    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.record.contracts.get(name).copied()
    }

    pub fn contract(&self, name: &str) -> Option<&CompiledContract> {
        self.contracts.iter().find(|c| c.name == name)
    }
}

pub struct Orchestrator<'a> {
    artifacts: &'a ArtifactStore,
    recorder: &'a DeploymentRecorder,
    legacy_file: Option<PathBuf>,
    verifier: Option<&'a dyn Verifier>,
    verification_delay: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(artifacts: &'a ArtifactStore, recorder: &'a DeploymentRecorder) -> Self {
        Self {
            artifacts,
            recorder,
            legacy_file: None,
            verifier: None,
            verification_delay: Duration::ZERO,
        }
    }

    /// Also write the combined single-file summary to `path`.
    pub fn with_legacy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_file = Some(path.into());
        self
    }

    /// Verify contracts on non-local networks, after waiting `delay`.
    pub fn with_verifier(mut self, verifier: &'a dyn Verifier, delay: Duration) -> Self {
        self.verifier = Some(verifier);
        self.verification_delay = delay;
        self
    }

    /// Deploy `names` in order, record the run and verify the contracts.
    pub async fn run<C: Chain + ?Sized>(
        &self,
        chain: &mut C,
        target: &DeployTarget<'_>,
        names: &[String],
    ) -> Result<Deployment> {
        let deployer = chain.signer();
        let balance = chain
            .balance(deployer)
            .await
            .wrap_err("cannot read deployer balance")?;
        info!(network = target.network, %deployer, %balance, "deploying with account");

        let mut deployed: Vec<(String, Address)> = Vec::with_capacity(names.len());
        let mut contracts = Vec::with_capacity(names.len());
        let mut last_block = 0;

        for name in names {
            match deploy_contract(chain, self.artifacts, name).await {
                Ok((contract, receipt, address)) => {
                    info!(contract = %name, %address, block = receipt.block_number, "deployed");
                    last_block = receipt.block_number;
                    deployed.push((name.clone(), address));
                    contracts.push(contract);
                }
                Err(source) => {
                    return Err(DeploymentAborted {
                        contract: name.clone(),
                        deployed,
                        source: source.into(),
                    }
                    .into());
                }
            }
        }

        let deployed_at_block = match chain.block_number().await {
            Ok(block) => block,
            Err(e) => {
                warn!("cannot read block number, using the last deployment's block: {e}");
                last_block
            }
        };

        let record = DeploymentRecord {
            network: target.network.to_string(),
            deployer,
            contracts: deployed.iter().cloned().collect::<ContractAddresses>(),
            // Stored with millisecond precision
            deployed_at: Utc::now().trunc_subsecs(3),
            deployed_at_block,
        };

        let snapshot = self.recorder.save(&record)?;
        if let Some(path) = &self.legacy_file {
            recorder::write_legacy(path, &record)?;
        }

        let deployment = Deployment {
            record,
            snapshot,
            contracts,
        };

        if !target.local {
            if let Some(verifier) = self.verifier {
                self.verify_all(verifier, &deployment).await;
            }
        }

        Ok(deployment)
    }

    /// One attempt per contract. Failures are logged and never propagate.
    async fn verify_all(&self, verifier: &dyn Verifier, deployment: &Deployment) {
        info!(
            delay_secs = self.verification_delay.as_secs(),
            "waiting for the explorer to index the deployments"
        );
        tokio::time::sleep(self.verification_delay).await;

        for contract in &deployment.contracts {
            let Some(address) = deployment.address_of(&contract.name) else {
                continue;
            };
            let build_info = match self.artifacts.build_info(contract) {
                Ok(info) => info,
                Err(e) => {
                    warn!(contract = %contract.name, "skipping verification: {e:#}");
                    continue;
                }
            };

            let request = VerificationRequest::new(address, contract, build_info);
            match verifier.verify(&request).await {
                Ok(receipt) => info!(contract = %contract.name, %receipt, "verification submitted"),
                Err(e) => warn!(contract = %contract.name, "verification failed: {e:#}"),
            }
        }
    }
}

/// Load the artifact of `name`, deploy it and wait for inclusion.
pub async fn deploy_contract<C: Chain + ?Sized>(
    chain: &mut C,
    artifacts: &ArtifactStore,
    name: &str,
) -> Result<(CompiledContract, Receipt, Address)> {
    let contract = artifacts.load(name)?;
    let receipt = chain
        .deploy(Bytes::copy_from_slice(&contract.bytecode))
        .await
        .wrap_err_with(|| format!("deploying `{name}`"))?;
    let address = receipt
        .contract_address
        .ok_or(ChainError::NoContractAddress)?;
    Ok((contract, receipt, address))
}
