//! Shared JSON writer for every report and deployment file.

use eyre::{Result, WrapErr};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;

/// Pretty-print `value` to `path`, replacing any previous file atomically.
///
/// Parent directories are created on demand. The content is staged in a
/// temporary file in the same directory and renamed over the target, so a
/// reader never observes a half-written report.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("cannot create directory {}", dir.display()))?;

    let mut staged = NamedTempFile::new_in(dir)
        .wrap_err_with(|| format!("cannot stage report in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut staged, value)
        .wrap_err_with(|| format!("cannot serialize {}", path.display()))?;
    staged
        .persist(path)
        .map_err(|e| e.error)
        .wrap_err_with(|| format!("cannot write {}", path.display()))?;

    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&raw).wrap_err_with(|| format!("cannot parse {}", path.display()))
}

/// ISO-8601 UTC timestamps with millisecond precision (`2024-05-01T12:00:00.000Z`).
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// EIP-55 checksummed addresses. Reading accepts any case.
pub mod checksum {
    use alloy_primitives::Address;
    use serde::Serializer;
    use std::collections::BTreeMap;

    pub fn address<S: Serializer>(value: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_checksum(None))
    }

    pub fn addresses<S: Serializer>(
        value: &BTreeMap<String, Address>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(value.iter().map(|(name, a)| (name, a.to_checksum(None))))
    }
}
