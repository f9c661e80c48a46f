//! The blockchain connection the pipeline drives.

pub mod local;
pub mod rpc;

use alloy_primitives::{Address, Bytes, Log, B256, U256};
use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalChain;
pub use rpc::RpcChain;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },
    #[error("transaction halted: {0}")]
    Halted(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("contract creation returned no address")]
    NoContractAddress,
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Confirmation of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Set for contract-creation transactions.
    pub contract_address: Option<Address>,
    /// Events emitted by the transaction, in emission order.
    pub logs: Vec<Log>,
}

/// Operations the deployment and test flows need from a network.
///
/// Every transaction method resolves only once the transaction is included;
/// a reverted transaction is an error, never a receipt.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Account that signs every transaction.
    fn signer(&self) -> Address;

    async fn balance(&self, account: Address) -> Result<U256, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Submit a contract-creation transaction.
    async fn deploy(&mut self, init_code: Bytes) -> Result<Receipt, ChainError>;

    /// Submit a call transaction to `to`.
    async fn send(&mut self, to: Address, calldata: Bytes) -> Result<Receipt, ChainError>;

    /// Read-only call, nothing is committed.
    async fn call(&mut self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;
}
