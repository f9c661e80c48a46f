//! Source verification against a block explorer.

use crate::types::{BuildInfo, CompiledContract};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use eyre::{bail, Result, WrapErr};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// What an explorer needs to match deployed bytecode to its source.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub address: Address,
    /// `<sourceName>:<contractName>`.
    pub contract: String,
    pub compiler_version: String,
    pub standard_json_input: serde_json::Value,
    pub constructor_arguments: Bytes,
}

impl VerificationRequest {
    pub fn new(address: Address, contract: &CompiledContract, build_info: BuildInfo) -> Self {
        Self {
            address,
            contract: contract.fully_qualified_name(),
            compiler_version: format!("v{}", build_info.solc_long_version),
            standard_json_input: build_info.input,
            constructor_arguments: Bytes::new(),
        }
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Submit one contract; returns the explorer's receipt identifier.
    async fn verify(&self, request: &VerificationRequest) -> Result<String>;
}

/// Etherscan-compatible `verifysourcecode` client (API v2, chain selected by id).
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

impl EtherscanVerifier {
    pub fn new(api_url: Url, api_key: String, chain_id: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            chain_id,
        })
    }
}

#[async_trait]
impl Verifier for EtherscanVerifier {
    async fn verify(&self, request: &VerificationRequest) -> Result<String> {
        let source = serde_json::to_string(&request.standard_json_input)?;
        let form = [
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("apikey", self.api_key.clone()),
            ("contractaddress", request.address.to_checksum(None)),
            ("sourceCode", source),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", request.contract.clone()),
            ("compilerversion", request.compiler_version.clone()),
            // sic, the explorer API spells it this way
            (
                "constructorArguements",
                hex::encode(&request.constructor_arguments),
            ),
        ];

        let response = self
            .client
            .post(self.api_url.clone())
            .query(&[("chainid", self.chain_id)])
            .form(&form)
            .send()
            .await
            .wrap_err("explorer request failed")?
            .error_for_status()?
            .json::<EtherscanResponse>()
            .await
            .wrap_err("unexpected explorer response")?;

        let result = match response.result {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        if response.status != "1" {
            bail!("{}: {result}", response.message);
        }
        Ok(result)
    }
}
