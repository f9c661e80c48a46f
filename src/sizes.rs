//! Contract size audit against the EIP-170 deployment limit.

use crate::artifacts;
use crate::reports;
use crate::types::ArtifactRecord;
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Largest runtime bytecode a contract may have on Ethereum mainnet.
pub const DEPLOYMENT_LIMIT: usize = 24_576;

pub const SIZE_REPORT_FILE: &str = "contract-sizes.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizeStatus {
    Ok,
    NearLimit,
    Exceeds,
}

impl SizeStatus {
    /// `EXCEEDS` above 100% of the limit, `NEAR_LIMIT` above 90%, else `OK`.
    pub fn classify(size: usize, limit: usize) -> Self {
        // Integer forms of `size / limit * 100 > 100` and `> 90`.
        if size > limit {
            SizeStatus::Exceeds
        } else if size * 10 > limit * 9 {
            SizeStatus::NearLimit
        } else {
            SizeStatus::Ok
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SizeStatus::Ok => "OK",
            SizeStatus::NearLimit => "NEAR LIMIT",
            SizeStatus::Exceeds => "EXCEEDS LIMIT",
        }
    }
}

pub fn percentage(size: usize, limit: usize) -> f64 {
    size as f64 / limit as f64 * 100.0
}

/// Ranked sizes of every artifact found in one audit run.
#[derive(Debug, Clone, Serialize)]
pub struct SizeReport {
    #[serde(rename = "timestamp", with = "reports::timestamp")]
    pub generated_at: DateTime<Utc>,
    /// Largest first; equal sizes keep discovery order.
    #[serde(rename = "contractSizes")]
    pub entries: Vec<ArtifactRecord>,
    #[serde(rename = "maxSize")]
    pub limit_bytes: usize,
}

impl SizeReport {
    pub fn new(mut entries: Vec<ArtifactRecord>, generated_at: DateTime<Utc>) -> Self {
        // `sort_by` is stable, ties stay in discovery order
        entries.sort_by(|a, b| b.bytecode_len.cmp(&a.bytecode_len));
        Self {
            generated_at,
            entries,
            limit_bytes: DEPLOYMENT_LIMIT,
        }
    }

    pub fn status_of(&self, entry: &ArtifactRecord) -> SizeStatus {
        SizeStatus::classify(entry.bytecode_len, self.limit_bytes)
    }

    /// Whether any contract is too large to deploy.
    pub fn has_oversized(&self) -> bool {
        self.entries
            .iter()
            .any(|e| self.status_of(e) == SizeStatus::Exceeds)
    }

    /// Human-readable ranking, one contract per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== CONTRACT SIZES ===");
        let _ = writeln!(
            out,
            "Deployment limit: {} bytes\n",
            group_thousands(self.limit_bytes)
        );

        let name_width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0) + 2;
        for entry in &self.entries {
            let size = format!("{} bytes", group_thousands(entry.bytecode_len));
            let pct = format!("{:.2}%", percentage(entry.bytecode_len, self.limit_bytes));
            let _ = writeln!(
                out,
                "{:<name_width$}{size:<15}{pct:<10}{}",
                entry.name,
                self.status_of(entry).label(),
            );
        }
        out
    }
}

/// Outcome of an audit run.
#[derive(Debug)]
pub enum Audit {
    /// The artifact directory does not exist; nothing was written.
    NoArtifacts,
    Written { report: SizeReport, path: PathBuf },
}

/// Scan `artifacts_root`, rank the contracts and write the size report.
pub fn audit(artifacts_root: &Path, reports_dir: &Path) -> Result<Audit> {
    if !artifacts_root.is_dir() {
        info!(
            root = %artifacts_root.display(),
            "artifact directory not found, compile the contracts first"
        );
        return Ok(Audit::NoArtifacts);
    }

    let scan = artifacts::scan(artifacts_root);
    let report = SizeReport::new(scan.records, Utc::now());

    let path = reports_dir.join(SIZE_REPORT_FILE);
    reports::write_json(&path, &report)?;
    info!(path = %path.display(), contracts = report.entries.len(), "size report saved");

    Ok(Audit::Written { report, path })
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
