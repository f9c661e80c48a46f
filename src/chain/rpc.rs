use super::{Chain, ChainError, Receipt};
use alloy_network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::debug;
use url::Url;

/// A JSON-RPC network, signing locally with one private key.
pub struct RpcChain {
    provider: DynProvider,
    signer: Address,
}

impl RpcChain {
    pub fn connect(url: Url, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .wrap_err("PRIVATE_KEY is not a valid secp256k1 key")?;
        let address = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            provider,
            signer: address,
        })
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<Receipt, ChainError> {
        let pending = self.provider.send_transaction(tx).await.map_err(rpc_error)?;
        debug!(tx = %pending.tx_hash(), "transaction submitted, waiting for inclusion");

        let receipt = pending.get_receipt().await.map_err(rpc_error)?;
        if !receipt.status() {
            return Err(ChainError::Reverted {
                reason: format!("transaction {} failed", receipt.transaction_hash()),
            });
        }

        Ok(Receipt {
            transaction_hash: receipt.transaction_hash(),
            block_number: receipt.block_number().unwrap_or_default(),
            contract_address: receipt.contract_address(),
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        })
    }
}

fn rpc_error(err: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(err.to_string())
}

#[async_trait]
impl Chain for RpcChain {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainError> {
        self.provider.get_balance(account).await.map_err(rpc_error)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }

    async fn deploy(&mut self, init_code: Bytes) -> Result<Receipt, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_deploy_code(init_code);
        let receipt = self.submit(tx).await?;
        if receipt.contract_address.is_none() {
            return Err(ChainError::NoContractAddress);
        }
        Ok(receipt)
    }

    async fn send(&mut self, to: Address, calldata: Bytes) -> Result<Receipt, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_to(to)
            .with_input(calldata);
        self.submit(tx).await
    }

    async fn call(&mut self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer)
            .with_to(to)
            .with_input(calldata);
        self.provider.call(tx).await.map_err(rpc_error)
    }
}
