use alloy_json_abi::JsonAbi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One compiled contract found by the artifact scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub name: String,
    /// Deployed bytecode size in bytes.
    #[serde(rename = "size")]
    pub bytecode_len: usize,
    #[serde(rename = "path")]
    pub relative_path: String,
}

/// A contract artifact loaded for deployment.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    /// Source unit the contract was compiled from, e.g. `contracts/Foo.sol`.
    pub source_name: Option<String>,
    pub abi: JsonAbi,
    pub bytecode: Vec<u8>,
    pub artifact_path: PathBuf,
}

impl CompiledContract {
    /// `<sourceName>:<contractName>`, the form explorers expect.
    pub fn fully_qualified_name(&self) -> String {
        match &self.source_name {
            Some(source) => format!("{source}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Compiler input and version recorded next to an artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    pub input: serde_json::Value,
}
