//! `release.toml`: paths, the contract set, test-runner names and networks.
//!
//! Every field has a default, so the file is optional.

use crate::testrun::SuiteSchema;
use eyre::{bail, eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "release.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub deploy: DeployConfig,
    pub test_runner: SuiteSchema,
    pub networks: BTreeMap<String, NetworkConfig>,
    pub explorer: ExplorerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub artifacts: PathBuf,
    pub reports: PathBuf,
    pub deployments: PathBuf,
    /// Combined deployment summary; empty disables it.
    pub legacy_deployment_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts: "artifacts/contracts".into(),
            reports: "test-results".into(),
            deployments: "deployments".into(),
            legacy_deployment_file: "deployed-contracts.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Deployed in this order.
    pub contracts: Vec<String>,
    /// Wait before submitting explorer verification.
    pub verification_delay_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            contracts: vec![
                "SistemaNotas".into(),
                "TesteSistemaNotas".into(),
                "ExemploPraticoSistema".into(),
            ],
            verification_delay_secs: 30,
        }
    }
}

impl DeployConfig {
    pub fn verification_delay(&self) -> Duration {
        Duration::from_secs(self.verification_delay_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint. Without one, a local network runs in memory.
    pub url: Option<Url>,
    pub chain_id: Option<u64>,
    /// Development network: never verified on an explorer.
    pub local: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerConfig {
    pub api_url: Url,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("https://api.etherscan.io/v2/api").expect("static URL is valid"),
        }
    }
}

/// How to reach a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    InMemory,
    Rpc(Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub endpoint: Endpoint,
    pub chain_id: Option<u64>,
    pub local: bool,
}

fn default_networks() -> BTreeMap<String, NetworkConfig> {
    let localhost = Url::parse("http://127.0.0.1:8545").expect("static URL is valid");
    BTreeMap::from([
        (
            "hardhat".to_string(),
            NetworkConfig {
                url: None,
                chain_id: Some(31337),
                local: true,
            },
        ),
        (
            "localhost".to_string(),
            NetworkConfig {
                url: Some(localhost),
                chain_id: Some(31337),
                local: true,
            },
        ),
        (
            "sepolia".to_string(),
            NetworkConfig {
                url: None,
                chain_id: Some(11_155_111),
                local: false,
            },
        ),
        (
            "goerli".to_string(),
            NetworkConfig {
                url: None,
                chain_id: Some(5),
                local: false,
            },
        ),
    ])
}

impl Config {
    /// Read `path`, or `release.toml` in the working directory when it
    /// exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default().with_default_networks());
                }
                default
            }
        };

        let contents = fs::read_to_string(&path)
            .wrap_err_with(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&contents).wrap_err_with(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config.with_default_networks())
    }

    // Networks from the file extend the built-in ones and override them by name.
    fn with_default_networks(mut self) -> Self {
        for (name, network) in default_networks() {
            self.networks.entry(name).or_insert(network);
        }
        self
    }

    /// Resolve `name`, taking a missing RPC URL from `<NAME>_URL`.
    pub fn network(&self, name: &str) -> Result<Network> {
        let config = self.networks.get(name).ok_or_else(|| {
            let known: Vec<_> = self.networks.keys().map(String::as_str).collect();
            eyre!("unknown network `{name}` (known: {})", known.join(", "))
        })?;

        let url = match &config.url {
            Some(url) => Some(url.clone()),
            None => url_from_env(name)?,
        };
        let endpoint = match url {
            Some(url) => Endpoint::Rpc(url),
            None if config.local => Endpoint::InMemory,
            None => bail!(
                "network `{name}` has no RPC URL; set `url` in the config or {}",
                url_env_var(name)
            ),
        };

        Ok(Network {
            name: name.to_string(),
            endpoint,
            chain_id: config.chain_id,
            local: config.local,
        })
    }

    pub fn legacy_deployment_file(&self) -> Option<&Path> {
        let path = self.paths.legacy_deployment_file.as_path();
        (!path.as_os_str().is_empty()).then_some(path)
    }
}

fn url_env_var(network: &str) -> String {
    format!("{}_URL", network.to_uppercase().replace('-', "_"))
}

fn url_from_env(network: &str) -> Result<Option<Url>> {
    let var = url_env_var(network);
    match std::env::var(&var) {
        Ok(value) if !value.trim().is_empty() => Url::parse(value.trim())
            .map(Some)
            .wrap_err_with(|| format!("{var} is not a valid URL")),
        _ => Ok(None),
    }
}
