use super::{Chain, ChainError, Receipt};
use alloy_primitives::{keccak256, Address, Bytes, Log, TxKind, U256};
use async_trait::async_trait;
use revm::context::TxEnv;
use revm::context_interface::result::{ExecutionResult, Output};
use revm::database::CacheDB;
use revm::database_interface::EmptyDB;
use revm::state::AccountInfo;
use revm::{ExecuteCommitEvm, ExecuteEvm, MainBuilder, MainContext};

// EIP-7825 caps a single transaction at 2^24 gas.
const GAS_LIMIT: u64 = 1 << 24;

/// Default deployer, funded at genesis.
pub fn default_deployer() -> Address {
    Address::new([
        0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    ])
}

/// In-memory development network backed by revm.
///
/// Every committed transaction is mined into its own block, so block numbers
/// count transactions. State lives as long as the value does.
pub struct LocalChain {
    db: CacheDB<EmptyDB>,
    deployer: Address,
    nonce: u64,
    block: u64,
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChain {
    /// Chain with [`default_deployer`] funded with 10,000 ETH.
    pub fn new() -> Self {
        let balance = U256::from(10_000u64) * U256::from(10u64).pow(U256::from(18u64));
        Self::with_deployer(default_deployer(), balance)
    }

    pub fn with_deployer(deployer: Address, balance: U256) -> Self {
        let mut db = CacheDB::new(EmptyDB::new());
        db.insert_account_info(
            deployer,
            AccountInfo {
                balance,
                nonce: 0,
                ..Default::default()
            },
        );

        Self {
            db,
            deployer,
            nonce: 0,
            block: 0,
        }
    }

    /// Whether `address` holds code.
    pub fn has_code(&self, address: Address) -> bool {
        self.db
            .cache
            .accounts
            .get(&address)
            .and_then(|account| account.info.code.as_ref())
            .is_some_and(|code| !code.is_empty())
    }

    fn tx(&self, kind: TxKind, data: Bytes) -> TxEnv {
        TxEnv {
            caller: self.deployer,
            gas_limit: GAS_LIMIT,
            gas_price: 0,
            kind,
            value: U256::ZERO,
            data,
            nonce: self.nonce,
            ..Default::default()
        }
    }

    /// Execute and commit one transaction, mining a block for it.
    fn mine(&mut self, kind: TxKind, data: Bytes) -> Result<Receipt, ChainError> {
        let tx = self.tx(kind, data);
        let transaction_hash =
            keccak256([self.deployer.as_slice(), &self.nonce.to_be_bytes()[..]].concat());

        let db = std::mem::replace(&mut self.db, CacheDB::new(EmptyDB::new()));
        let mut evm = revm::Context::mainnet().with_db(db).build_mainnet();
        let outcome = evm.transact_commit(tx);
        // Hand the state back before looking at the outcome
        self.db = evm.ctx.journaled_state.database;

        let result = outcome.map_err(|e| ChainError::Rejected(format!("{e:?}")))?;

        // Included, even if it reverted: the nonce is spent
        self.nonce += 1;
        self.block += 1;

        let (output, logs) = settle(result)?;
        let contract_address = match output {
            Output::Create(_, address) => Some(address.ok_or(ChainError::NoContractAddress)?),
            Output::Call(_) => None,
        };

        Ok(Receipt {
            transaction_hash,
            block_number: self.block,
            contract_address,
            logs,
        })
    }
}

fn settle(result: ExecutionResult) -> Result<(Output, Vec<Log>), ChainError> {
    match result {
        ExecutionResult::Success { output, logs, .. } => Ok((output, logs)),
        ExecutionResult::Revert { output, .. } => Err(ChainError::Reverted {
            reason: revert_reason(&output),
        }),
        ExecutionResult::Halt { reason, .. } => Err(ChainError::Halted(format!("{reason:?}"))),
    }
}

fn revert_reason(output: &[u8]) -> String {
    alloy_sol_types::decode_revert_reason(output)
        .unwrap_or_else(|| format!("0x{}", hex::encode(output)))
}

#[async_trait]
impl Chain for LocalChain {
    fn signer(&self) -> Address {
        self.deployer
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainError> {
        Ok(self
            .db
            .cache
            .accounts
            .get(&account)
            .map(|a| a.info.balance)
            .unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.block)
    }

    async fn deploy(&mut self, init_code: Bytes) -> Result<Receipt, ChainError> {
        let receipt = self.mine(TxKind::Create, init_code)?;
        if receipt.contract_address.is_none() {
            return Err(ChainError::NoContractAddress);
        }
        Ok(receipt)
    }

    async fn send(&mut self, to: Address, calldata: Bytes) -> Result<Receipt, ChainError> {
        self.mine(TxKind::Call(to), calldata)
    }

    async fn call(&mut self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        // `transact` leaves the database untouched
        let tx = self.tx(TxKind::Call(to), calldata);
        let ctx = revm::Context::mainnet().with_db(&mut self.db);
        let mut evm = ctx.build_mainnet();
        let result = evm
            .transact(tx)
            .map_err(|e| ChainError::Rejected(format!("{e:?}")))?;

        match settle(result.result)?.0 {
            Output::Call(bytes) => Ok(bytes),
            Output::Create(..) => Err(ChainError::Rejected(
                "expected CALL output, got CREATE output".into(),
            )),
        }
    }
}
