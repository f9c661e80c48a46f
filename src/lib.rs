//! Build and release tooling for a multi-contract project: contract size
//! audits, ordered deployments with per-network history, and on-chain test
//! suites reported from their events.

pub mod artifacts;
pub mod chain;
pub mod config;
pub mod deploy;
pub mod recorder;
pub mod reports;
pub mod sizes;
pub mod testrun;
pub mod types;
pub mod verify;
