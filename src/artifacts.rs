use crate::types::{ArtifactRecord, BuildInfo, CompiledContract};
use alloy_json_abi::JsonAbi;
use eyre::{bail, eyre, Result, WrapErr};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const ARTIFACT_SUFFIX: &str = ".json";
pub const DEBUG_SUFFIX: &str = ".dbg.json";

/// Result of walking an artifact tree.
#[derive(Debug, Default)]
pub struct Scan {
    /// Records in discovery order.
    pub records: Vec<ArtifactRecord>,
    /// Files that looked like artifacts but could not be read.
    pub diagnostics: Vec<ScanDiagnostic>,
}

#[derive(Debug, Clone)]
pub struct ScanDiagnostic {
    pub path: PathBuf,
    pub message: String,
}

/// Whether a file name looks like a contract artifact.
///
/// Debug metadata (`Foo.dbg.json`) also ends in `.json`, so the longer suffix
/// is checked first.
pub fn is_candidate(file_name: &str) -> bool {
    if file_name.ends_with(DEBUG_SUFFIX) {
        return false;
    }
    file_name.ends_with(ARTIFACT_SUFFIX)
}

/// Byte length of a hex bytecode string, with or without the `0x` marker.
///
/// Odd-length input is truncated: `"0x123"` counts as one byte.
pub fn bytecode_len(bytecode_hex: &str) -> usize {
    let digits = bytecode_hex.strip_prefix("0x").unwrap_or(bytecode_hex);
    digits.len() / 2
}

/// Walk `root` depth-first and collect every contract artifact.
///
/// A missing root is not an error: the scan is simply empty. Unreadable or
/// malformed files are reported in [`Scan::diagnostics`] and skipped.
pub fn scan(root: &Path) -> Scan {
    let mut scan = Scan::default();
    if !root.is_dir() {
        info!(root = %root.display(), "artifact directory not found, no artifacts to scan");
        return scan;
    }
    walk(root, root, &mut scan);
    scan
}

fn walk(root: &Path, dir: &Path, scan: &mut Scan) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            scan.diagnose(dir, format!("cannot list directory: {e}"));
            return;
        }
    };

    let mut listed = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => listed.push(entry),
            Err(e) => scan.diagnose(dir, format!("cannot read directory entry: {e}")),
        }
    }
    // Listing order is filesystem-dependent; discovery order is by name.
    listed.sort_by_key(|entry| entry.file_name());

    for entry in listed {
        let path = entry.path();

        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            walk(root, &path, scan);
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !is_candidate(file_name) {
            continue;
        }

        match read_record(root, &path) {
            Ok(Some(record)) => scan.records.push(record),
            Ok(None) => debug!(path = %path.display(), "not a contract artifact, skipping"),
            Err(e) => scan.diagnose(&path, format!("{e:#}")),
        }
    }
}

impl Scan {
    fn diagnose(&mut self, path: &Path, message: String) {
        warn!(path = %path.display(), "failed to process artifact: {message}");
        self.diagnostics.push(ScanDiagnostic {
            path: path.to_path_buf(),
            message,
        });
    }
}

fn read_record(root: &Path, path: &Path) -> Result<Option<ArtifactRecord>> {
    let raw = read_artifact_json(path)?;

    let (Some(name), Some(bytecode)) = (contract_name(&raw), bytecode_hex(&raw)) else {
        return Ok(None);
    };

    Ok(Some(ArtifactRecord {
        name: name.to_string(),
        bytecode_len: bytecode_len(bytecode),
        relative_path: report_path(root, path),
    }))
}

fn read_artifact_json(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).wrap_err_with(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&contents)
        .wrap_err_with(|| format!("failed to parse artifact {}", path.display()))
}

fn contract_name(raw: &Value) -> Option<&str> {
    raw.get("contractName")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

// Hardhat stores the creation code as a plain string; solc and forge nest it
// under `object`.
fn bytecode_hex(raw: &Value) -> Option<&str> {
    raw.get("bytecode")
        .and_then(|b| b.as_str().or_else(|| b.pointer("/object").and_then(Value::as_str)))
        .or_else(|| raw.pointer("/evm/bytecode/object").and_then(Value::as_str))
        .filter(|hex| !hex.is_empty())
}

/// Artifact location relative to the scan root, pointing at the source unit:
/// `<root>/Foo.sol/Foo.json` becomes `/Foo.sol/Foo.sol`.
fn report_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for component in relative.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out.replacen(ARTIFACT_SUFFIX, ".sol", 1)
}

// ---------------------------------------------------------------------------
// Loading a single artifact for deployment
// ---------------------------------------------------------------------------

/// Named access to the artifacts of one build output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact of contract `name`, ready to deploy.
    pub fn load(&self, name: &str) -> Result<CompiledContract> {
        let file_name = format!("{name}{ARTIFACT_SUFFIX}");
        let path = find_file(&self.root, &file_name).ok_or_else(|| {
            eyre!(
                "no artifact for contract `{name}` under {}; compile the contracts first",
                self.root.display()
            )
        })?;
        let raw = read_artifact_json(&path)?;

        if contract_name(&raw) != Some(name) {
            bail!("{} does not describe contract `{name}`", path.display());
        }

        let bytecode_hex = bytecode_hex(&raw)
            .ok_or_else(|| eyre!("artifact {} has no bytecode", path.display()))?;
        if bytecode_hex.contains("__$") {
            bail!("contract `{name}` has unlinked library references");
        }
        let bytecode = hex::decode(bytecode_hex.trim_start_matches("0x"))
            .wrap_err_with(|| format!("invalid bytecode in {}", path.display()))?;
        if bytecode.is_empty() {
            bail!("contract `{name}` is abstract or an interface, nothing to deploy");
        }

        let abi_value = raw.get("abi").cloned().unwrap_or(Value::Array(vec![]));
        let abi: JsonAbi = serde_json::from_value(abi_value)
            .wrap_err_with(|| format!("failed to parse ABI from {}", path.display()))?;

        Ok(CompiledContract {
            name: name.to_string(),
            source_name: raw
                .get("sourceName")
                .and_then(Value::as_str)
                .map(str::to_string),
            abi,
            bytecode,
            artifact_path: path,
        })
    }

    /// Compiler version and standard JSON input the contract was built with.
    ///
    /// Found through the `buildInfo` pointer of the sibling `.dbg.json` file.
    pub fn build_info(&self, contract: &CompiledContract) -> Result<BuildInfo> {
        let dbg_path = contract
            .artifact_path
            .with_file_name(format!("{}{DEBUG_SUFFIX}", contract.name));
        let dbg = read_artifact_json(&dbg_path)?;
        let pointer = dbg
            .get("buildInfo")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre!("{} has no buildInfo entry", dbg_path.display()))?;

        let base = dbg_path.parent().unwrap_or(&self.root);
        let build_info_path = base.join(pointer);
        let contents = fs::read_to_string(&build_info_path)
            .wrap_err_with(|| format!("cannot read {}", build_info_path.display()))?;
        serde_json::from_str(&contents)
            .wrap_err_with(|| format!("failed to parse build info {}", build_info_path.display()))
    }
}

fn find_file(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut entries: Vec<_> = fs::read_dir(dir).ok()?.flatten().collect();
    entries.sort_by_key(|entry| entry.file_name());
    let mut subdirs = Vec::new();

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if entry.file_name().to_str() == Some(file_name) {
            return Some(path);
        }
    }

    subdirs.iter().find_map(|sub| find_file(sub, file_name))
}
