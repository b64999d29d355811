// Common helpers for the engine integration tests
//
// A `TestChain` wraps the engine on a fresh store and hands out unique
// transaction hashes, so that tests only describe the messages of each block.

#![allow(dead_code)]

use std::collections::BTreeMap;

use tempdir::TempDir;
use tessera_common::{
    amount::{Amount, Balances, TokenAmount, TokenId, NATIVE_TOKEN},
    crypto::{hash, Hash},
    script::Script,
    token::{TOKEN_FLAG_DAT, TOKEN_FLAG_MINTABLE, TOKEN_FLAG_TRADEABLE},
    transaction::{
        AccountToAccountMessage, CreateTokenMessage, CustomTransaction, CustomTxMessage, MintTokensMessage,
        SetGovMessage, UtxosToAccountMessage,
    },
};
use tessera_daemon::{
    config::ChainParams,
    core::{
        accounts,
        blockchain::{BlockInput, BlockResult, Blockchain, TxOutcome},
        storage::{prelude::*, ChainStore, MemoryBackend, SledBackend, StorageBackend},
    },
};

// Seconds between two test blocks
pub const BLOCK_TIME: i64 = 30;
pub const GENESIS_TIME: i64 = 1_000;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn address(seed: u8) -> Script {
    Script::p2pkh([seed; 20])
}

pub struct TestChain<B: StorageBackend> {
    pub chain: Blockchain<ChainStore<B>>,
    pub height: u32,
    pub time: i64,
    tx_counter: u64,
    // Keeps the sled directory alive for the lifetime of the chain
    _dir: Option<TempDir>,
}

impl TestChain<SledBackend> {
    pub fn on_disk() -> Self {
        Self::on_disk_with(ChainParams::regtest())
    }

    pub fn on_disk_with(params: ChainParams) -> Self {
        init_logger();
        let dir = TempDir::new("tessera_chain").unwrap();
        let backend = SledBackend::open(dir.path()).unwrap();
        let chain = Blockchain::new(ChainStore::new(backend), params).unwrap();
        Self::wrap(chain, Some(dir))
    }

    /// Flushes and closes the database, then opens the engine again on it.
    pub fn reopen(self) -> Self {
        let Self {
            chain,
            height,
            time,
            tx_counter,
            _dir,
        } = self;
        let params = chain.params().clone();
        let mut store = chain.into_storage();
        store.flush().unwrap();
        drop(store);

        let dir = _dir.expect("on disk chain");
        let backend = SledBackend::open(dir.path()).unwrap();
        let chain = Blockchain::new(ChainStore::new(backend), params).unwrap();
        Self {
            chain,
            height,
            time,
            tx_counter,
            _dir: Some(dir),
        }
    }
}

impl TestChain<MemoryBackend> {
    pub fn in_memory() -> Self {
        Self::in_memory_with(ChainParams::regtest())
    }

    pub fn in_memory_with(params: ChainParams) -> Self {
        init_logger();
        let chain = Blockchain::new(ChainStore::in_memory(), params).unwrap();
        Self::wrap(chain, None)
    }
}

impl<B: StorageBackend> TestChain<B> {
    fn wrap(chain: Blockchain<ChainStore<B>>, dir: Option<TempDir>) -> Self {
        Self {
            chain,
            height: 0,
            time: GENESIS_TIME,
            tx_counter: 0,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &ChainStore<B> {
        self.chain.storage()
    }

    pub fn foundation(&self) -> Script {
        self.chain.params().foundation_members[0].clone()
    }

    pub fn next_hash(&mut self) -> Hash {
        self.tx_counter += 1;
        hash(&self.tx_counter.to_be_bytes())
    }

    pub fn tx(&mut self, message: CustomTxMessage, auth: Vec<Script>) -> CustomTransaction {
        let hash = self.next_hash();
        CustomTransaction::new(hash, &message, auth)
    }

    pub fn next_block(&self) -> BlockInput {
        BlockInput::new(self.height + 1, self.time + BLOCK_TIME)
    }

    pub fn apply(&mut self, block: BlockInput) -> BlockResult {
        let result = self.chain.apply_block(&block).unwrap();
        self.height = block.height;
        self.time = block.time;
        result
    }

    pub fn mine(&mut self, txs: Vec<CustomTransaction>) -> BlockResult {
        let block = self.next_block().with_txs(txs);
        self.apply(block)
    }

    /// Mines a block and fails the test if any transaction was rejected.
    pub fn mine_ok(&mut self, txs: Vec<CustomTransaction>) -> BlockResult {
        let result = self.mine(txs);
        for outcome in result.txs.iter() {
            if let TxOutcome::Rejected { message, .. } = outcome {
                panic!("transaction {} rejected at height {}: {}", outcome.hash(), result.height, message);
            }
        }
        result
    }

    /// Mines empty blocks until the tip reaches `height`.
    pub fn mine_until(&mut self, height: u32) {
        while self.height < height {
            self.mine_ok(Vec::new());
        }
    }

    pub fn rewind_to(&mut self, height: u32) -> u32 {
        let rewound = self.chain.rewind_to(height).unwrap();
        self.height = self.chain.get_tip_height().unwrap().unwrap_or(0);
        self.time = self.chain.tip_context().unwrap().time;
        rewound
    }

    pub fn fund(&mut self, to: &Script, amount: Amount) -> CustomTransaction {
        let message = CustomTxMessage::UtxosToAccount(UtxosToAccountMessage {
            to: BTreeMap::from([(to.clone(), Balances::from_single(NATIVE_TOKEN, amount))]),
        });
        self.tx(message, Vec::new()).with_burnt_value(amount)
    }

    pub fn send(&mut self, from: &Script, to: &Script, value: TokenAmount) -> CustomTransaction {
        let message = CustomTxMessage::AccountToAccount(AccountToAccountMessage {
            from: from.clone(),
            to: BTreeMap::from([(to.clone(), Balances::from_single(value.token_id, value.amount))]),
        });
        self.tx(message, vec![from.clone()])
    }

    pub fn create_dat(&mut self, symbol: &str) -> CustomTransaction {
        let message = CustomTxMessage::CreateToken(CreateTokenMessage {
            symbol: symbol.to_owned(),
            name: format!("{} token", symbol),
            decimal: 8,
            limit: 0,
            flags: TOKEN_FLAG_DAT | TOKEN_FLAG_MINTABLE | TOKEN_FLAG_TRADEABLE,
        });
        let foundation = self.foundation();
        self.tx(message, vec![foundation])
    }

    pub fn mint(&mut self, to: &Script, token_id: TokenId, amount: Amount) -> CustomTransaction {
        let message = CustomTxMessage::MintToken(MintTokensMessage {
            amounts: Balances::from_single(token_id, amount),
            to: to.clone(),
        });
        let foundation = self.foundation();
        self.tx(message, vec![foundation])
    }

    pub fn set_gov(&mut self, variables: &[(&str, &str)]) -> CustomTransaction {
        let message = CustomTxMessage::SetGovVariable(SetGovMessage {
            variables: variables
                .iter()
                .map(|(path, value)| (path.to_string(), value.to_string()))
                .collect(),
        });
        let foundation = self.foundation();
        self.tx(message, vec![foundation])
    }

    pub fn balance(&self, owner: &Script, token_id: TokenId) -> Amount {
        self.store().get_balance(owner, token_id).unwrap()
    }

    /// Every minted unit is held somewhere in the state.
    pub fn assert_conservation(&self) {
        for (token_id, audit) in accounts::audit_supply(self.store()).unwrap() {
            assert!(
                audit.is_balanced(),
                "supply of token {} is not conserved at height {}: {:?}",
                token_id,
                self.height,
                audit
            );
        }
    }
}
