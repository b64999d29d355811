// Block application
//
// This module drives the engines for every block handed over by the block
// processor. A block runs its masternode updates and pool rewards first, then
// each custom transaction, then the EVM block built from the queued
// transactions and finally the end of block hooks: scheduled activations,
// price ticks, liquidations and auctions, governance cycles.
// The whole block is staged in one journal entry so that it can be rewound.

use std::time::Instant;

use log::{debug, error, info, trace, warn};
use metrics::{counter, gauge, histogram};
use tessera_common::{
    amount::{Balances, NATIVE_TOKEN},
    crypto::Hash,
    evm::EvmBlockHeader,
    governance::MasternodeId,
    script::Script,
    token::{Token, TOKEN_FLAG_DAT, TOKEN_FLAG_TRADEABLE},
    transaction::{CustomTransaction, CustomTxType},
};

use crate::config::ChainParams;

use super::{
    attributes,
    context::{BlockContext, TxContext},
    dex,
    error::{BlockchainError, ErrorKind},
    evm::{self, EvmExecutor, EvmQueue, ValueTransferExecutor},
    governance, interpreter, loans, oracle,
    storage::Storage,
};

/// Masternode change announced by the block processor.
#[derive(Debug, Clone)]
pub enum MasternodeEvent {
    Register {
        id: MasternodeId,
        owner: Script,
        operator: Script,
    },
    Resign {
        id: MasternodeId,
    },
}

/// Everything the engine needs to know about a block.
#[derive(Debug, Clone)]
pub struct BlockInput {
    pub height: u32,
    // Median time, in seconds
    pub time: i64,
    pub txs: Vec<CustomTransaction>,
    pub minted_by: Option<MasternodeId>,
    pub masternode_events: Vec<MasternodeEvent>,
    // Receives the priority fees of the EVM block, burnt when absent
    pub beneficiary: Option<Script>,
}

impl BlockInput {
    pub fn new(height: u32, time: i64) -> Self {
        Self {
            height,
            time,
            txs: Vec::new(),
            minted_by: None,
            masternode_events: Vec::new(),
            beneficiary: None,
        }
    }

    pub fn with_txs(mut self, txs: Vec<CustomTransaction>) -> Self {
        self.txs.extend(txs);
        self
    }

    pub fn with_minter(mut self, id: MasternodeId) -> Self {
        self.minted_by = Some(id);
        self
    }

    pub fn with_masternode_event(mut self, event: MasternodeEvent) -> Self {
        self.masternode_events.push(event);
        self
    }

    pub fn with_beneficiary(mut self, beneficiary: Script) -> Self {
        self.beneficiary = Some(beneficiary);
        self
    }
}

/// Result of a single custom transaction of the block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Applied {
        hash: Hash,
        tx_type: CustomTxType,
    },
    // Left out of the block, without any state effect
    Rejected {
        hash: Hash,
        kind: ErrorKind,
        message: String,
    },
}

impl TxOutcome {
    pub fn hash(&self) -> &Hash {
        match self {
            TxOutcome::Applied { hash, .. } | TxOutcome::Rejected { hash, .. } => hash,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TxOutcome::Applied { .. })
    }
}

/// Result of applying a block
#[derive(Debug, Default)]
pub struct BlockResult {
    pub height: u32,
    /// Outcome of every transaction, in block order
    pub txs: Vec<TxOutcome>,
    /// Number of applied transactions
    pub applied_count: u32,
    /// Number of rejected transactions
    pub rejected_count: u32,
    /// Header of the EVM block, if one was produced
    pub evm_block: Option<EvmBlockHeader>,
    /// Pool rewards moved into the reward escrow
    pub pool_rewards: Balances,
    pub prices_updated: usize,
    pub auctions_settled: usize,
    pub vaults_liquidated: usize,
    pub proposal_cycles_closed: usize,
}

/// State transition engine of the chain.
pub struct Blockchain<S: Storage> {
    storage: S,
    params: ChainParams,
    executor: Box<dyn EvmExecutor<S>>,
}

impl<S: Storage> Blockchain<S> {
    /// Opens the engine on `storage`, creating the native token on a fresh store.
    pub fn new(storage: S, params: ChainParams) -> Result<Self, BlockchainError> {
        let mut blockchain = Self {
            storage,
            params,
            executor: Box::new(ValueTransferExecutor),
        };
        blockchain.ensure_genesis()?;
        Ok(blockchain)
    }

    pub fn with_executor(mut self, executor: Box<dyn EvmExecutor<S>>) -> Self {
        self.executor = executor;
        self
    }

    fn ensure_genesis(&mut self) -> Result<(), BlockchainError> {
        if self.storage.get_token(NATIVE_TOKEN)?.is_some() {
            return Ok(());
        }

        info!("initializing the native token on an empty store");
        let native = Token {
            symbol: "DFI".to_owned(),
            name: "Default Defi token".to_owned(),
            decimal: 8,
            limit: 0,
            flags: TOKEN_FLAG_DAT | TOKEN_FLAG_TRADEABLE,
            minted: 0,
            creation_tx: Hash::zero(),
            creation_height: 0,
            owner: Script::empty(),
        };
        self.storage.start_snapshot()?;
        if let Err(e) = self.storage.set_token(NATIVE_TOKEN, &native) {
            self.storage.end_snapshot(false)?;
            return Err(e);
        }
        self.storage.end_snapshot(true)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // Hands the store back, e.g. to flush it before shutdown
    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn get_tip_height(&self) -> Result<Option<u32>, BlockchainError> {
        self.storage.get_tip_height()
    }

    /// Context used to answer queries against the last committed block.
    pub fn tip_context(&self) -> Result<BlockContext<'_>, BlockchainError> {
        let height = self.storage.get_tip_height()?.unwrap_or(0);
        let time = self.storage.get_tip_time()?.unwrap_or(0);
        Ok(BlockContext::new(&self.params, height, time))
    }

    /// Applies a block on top of the tip. Rejected transactions are reported
    /// in the result; any other error leaves the state untouched.
    pub fn apply_block(&mut self, block: &BlockInput) -> Result<BlockResult, BlockchainError> {
        if let Some(tip) = self.storage.get_tip_height()? {
            if block.height != tip + 1 {
                return Err(BlockchainError::InvalidState(format!(
                    "Block {} does not follow the tip {}",
                    block.height, tip
                )));
            }
        }

        let start = Instant::now();
        self.storage.begin_block(block.height)?;
        match self.connect_block(block) {
            Ok(result) => {
                self.storage.commit_block()?;
                histogram!("tessera_block_apply_ms").record(start.elapsed().as_millis() as f64);
                counter!("tessera_blocks_applied").increment(1);
                gauge!("tessera_tip_height").set(block.height as f64);
                debug!(
                    "block {} applied: {} txs, {} rejected",
                    block.height, result.applied_count, result.rejected_count
                );
                Ok(result)
            }
            Err(e) => {
                error!("failed to apply block {}: {}", block.height, e);
                self.storage.discard_block()?;
                Err(e)
            }
        }
    }

    fn connect_block(&mut self, block: &BlockInput) -> Result<BlockResult, BlockchainError> {
        let ctx = BlockContext::new(&self.params, block.height, block.time);
        let storage = &mut self.storage;
        storage.set_tip_time(block.time)?;

        let mut result = BlockResult {
            height: block.height,
            ..Default::default()
        };

        for event in block.masternode_events.iter() {
            match event {
                MasternodeEvent::Register { id, owner, operator } => {
                    governance::register_masternode(storage, id, owner.clone(), operator.clone(), block.height)?
                }
                MasternodeEvent::Resign { id } => governance::resign_masternode(storage, id, block.height)?,
            }
        }
        if let Some(id) = block.minted_by.as_ref() {
            governance::record_minted_block(storage, id, block.height)?;
        }

        result.pool_rewards = dex::distribute_block_rewards(storage, &ctx)?;

        let mut queue = EvmQueue::new();
        for (index, tx) in block.txs.iter().enumerate() {
            let tx_ctx = TxContext {
                block: ctx,
                index: index as u32,
                hash: &tx.hash,
            };
            match interpreter::apply_custom_tx(storage, &tx_ctx, tx, &mut queue) {
                Ok(tx_type) => {
                    result.applied_count += 1;
                    result.txs.push(TxOutcome::Applied { hash: tx.hash, tx_type });
                }
                Err(e) if e.kind() == ErrorKind::Internal => return Err(e),
                Err(e) => {
                    result.rejected_count += 1;
                    result.txs.push(TxOutcome::Rejected {
                        hash: tx.hash,
                        kind: e.kind(),
                        message: e.to_prefixed_string(),
                    });
                }
            }
        }

        result.evm_block = evm::finalize_block(storage, &ctx, queue, self.executor.as_mut(), block.beneficiary.as_ref())?;

        trace!("end of block hooks at {}", block.height);
        attributes::apply_scheduled(storage, &ctx)?;
        result.prices_updated = oracle::tick(storage, &ctx)?;
        result.auctions_settled = loans::settle_auctions(storage, &ctx)?;
        result.vaults_liquidated = loans::check_liquidations(storage, &ctx)?;
        result.proposal_cycles_closed = governance::close_cycles(storage, &ctx)?;

        Ok(result)
    }

    /// Undoes every block above `height`. Returns the number of blocks undone.
    pub fn rewind_to(&mut self, height: u32) -> Result<u32, BlockchainError> {
        let rewound = self.storage.rewind_to(height)?;
        if rewound > 0 {
            warn!("rewound {} blocks, tip is now {:?}", rewound, self.storage.get_tip_height()?);
            counter!("tessera_blocks_rewound").increment(rewound as u64);
            if let Some(tip) = self.storage.get_tip_height()? {
                gauge!("tessera_tip_height").set(tip as f64);
            }
        }
        Ok(rewound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{prelude::*, ChainStore, MemoryBackend};
    use std::collections::BTreeMap;
    use tessera_common::{
        amount::{Amount, TokenAmount, COIN},
        attributes::{AttributeKey, AttributeValue},
        history::{HistoryFilter, HistorySubject},
        loan::LoanTokenInfo,
        oracle::CurrencyPair,
        transaction::{AccountToAccountMessage, CustomTxMessage, UtxosToAccountMessage},
    };

    type Chain = Blockchain<ChainStore<MemoryBackend>>;

    fn chain() -> Chain {
        Blockchain::new(ChainStore::in_memory(), ChainParams::regtest()).unwrap()
    }

    fn fund(seed: u8, to: &Script, amount: Amount) -> CustomTransaction {
        let message = CustomTxMessage::UtxosToAccount(UtxosToAccountMessage {
            to: BTreeMap::from([(to.clone(), Balances::from_single(NATIVE_TOKEN, amount))]),
        });
        CustomTransaction::new(Hash::new([seed; 32]), &message, vec![]).with_burnt_value(amount)
    }

    fn send(seed: u8, from: &Script, to: &Script, amount: Amount) -> CustomTransaction {
        let message = CustomTxMessage::AccountToAccount(AccountToAccountMessage {
            from: from.clone(),
            to: BTreeMap::from([(to.clone(), Balances::from_single(NATIVE_TOKEN, amount))]),
        });
        CustomTransaction::new(Hash::new([seed; 32]), &message, vec![from.clone()])
    }

    #[test]
    fn test_genesis_creates_native_token() {
        let chain = chain();
        let native = chain.storage().get_token_or_err(NATIVE_TOKEN).unwrap();
        assert_eq!(native.symbol, "DFI");
        assert!(native.is_dat());
        assert_eq!(chain.get_tip_height().unwrap(), None);

        // reopening does not recreate it
        let store = chain.storage;
        assert!(Blockchain::new(store, ChainParams::regtest()).is_ok());
    }

    #[test]
    fn test_rejected_tx_does_not_stop_block() {
        let mut chain = chain();
        let alice = Script::p2pkh([1; 20]);
        let bob = Script::p2pkh([2; 20]);

        let block = BlockInput::new(1, 1_000).with_txs(vec![
            fund(1, &alice, 10 * COIN),
            send(2, &alice, &bob, 20 * COIN),
            send(3, &alice, &bob, 4 * COIN),
        ]);
        let result = chain.apply_block(&block).unwrap();
        assert_eq!(result.applied_count, 2);
        assert_eq!(result.rejected_count, 1);
        match &result.txs[1] {
            TxOutcome::Rejected { kind, message, .. } => {
                assert_eq!(*kind, ErrorKind::InsufficientFunds);
                assert!(message.starts_with("insufficient-funds"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let store = chain.storage();
        assert_eq!(store.get_balance(&alice, NATIVE_TOKEN).unwrap(), 6 * COIN);
        assert_eq!(store.get_balance(&bob, NATIVE_TOKEN).unwrap(), 4 * COIN);
        assert_eq!(store.get_tip_height().unwrap(), Some(1));
        assert_eq!(store.get_tip_time().unwrap(), Some(1_000));

        // only applied transactions are indexed
        let entries = store
            .list_history(&HistorySubject::Account(alice), &HistoryFilter::default(), 1)
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_blocks_must_follow_tip() {
        let mut chain = chain();
        chain.apply_block(&BlockInput::new(1, 0)).unwrap();
        let err = chain.apply_block(&BlockInput::new(3, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(chain.get_tip_height().unwrap(), Some(1));
        chain.apply_block(&BlockInput::new(2, 0)).unwrap();
    }

    #[test]
    fn test_rewind_then_reapply() {
        let mut chain = chain();
        let alice = Script::p2pkh([1; 20]);
        let bob = Script::p2pkh([2; 20]);

        chain
            .apply_block(&BlockInput::new(1, 100).with_txs(vec![fund(1, &alice, 10 * COIN)]))
            .unwrap();
        let second = BlockInput::new(2, 200).with_txs(vec![send(2, &alice, &bob, 3 * COIN)]);
        chain.apply_block(&second).unwrap();

        assert_eq!(chain.rewind_to(1).unwrap(), 1);
        assert_eq!(chain.rewind_to(1).unwrap(), 0);
        let store = chain.storage();
        assert_eq!(store.get_balance(&alice, NATIVE_TOKEN).unwrap(), 10 * COIN);
        assert_eq!(store.get_balance(&bob, NATIVE_TOKEN).unwrap(), 0);
        assert_eq!(store.get_tip_time().unwrap(), Some(100));
        assert!(store
            .list_history(&HistorySubject::Account(bob.clone()), &HistoryFilter::default(), 2)
            .unwrap()
            .is_empty());

        chain.apply_block(&second).unwrap();
        assert_eq!(chain.storage().get_balance(&bob, NATIVE_TOKEN).unwrap(), 3 * COIN);
    }

    #[test]
    fn test_masternode_events() {
        let mut chain = chain();
        let id = Hash::new([9; 32]);
        let owner = Script::p2pkh([3; 20]);
        let operator = Script::p2pkh([4; 20]);

        let block = BlockInput::new(1, 0).with_masternode_event(MasternodeEvent::Register {
            id,
            owner,
            operator: operator.clone(),
        });
        chain.apply_block(&block).unwrap();
        chain.apply_block(&BlockInput::new(2, 0).with_minter(id)).unwrap();

        let masternode = chain.storage().get_masternode_or_err(&id).unwrap();
        assert_eq!(masternode.minted_blocks, 1);
        assert_eq!(masternode.last_minted_height, Some(2));
        assert_eq!(chain.storage().get_masternode_by_operator(&operator).unwrap(), Some(id));

        chain
            .apply_block(&BlockInput::new(3, 0).with_masternode_event(MasternodeEvent::Resign { id }))
            .unwrap();
        assert_eq!(chain.storage().get_masternode_or_err(&id).unwrap().resign_height, Some(3));

        // resigning twice fails the whole block
        let err = chain
            .apply_block(&BlockInput::new(4, 0).with_masternode_event(MasternodeEvent::Resign { id }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(chain.get_tip_height().unwrap(), Some(3));
    }

    #[test]
    fn test_unsplittable_token_does_not_stall_chain() {
        let mut chain = chain();
        let alice = Script::p2pkh([1; 20]);
        let tsla = Token {
            symbol: "TSLA".to_owned(),
            name: "Tesla".to_owned(),
            decimal: 8,
            limit: 0,
            flags: TOKEN_FLAG_DAT | TOKEN_FLAG_TRADEABLE,
            minted: 100 * COIN,
            creation_tx: Hash::zero(),
            creation_height: 0,
            owner: Script::empty(),
        };
        let store = &mut chain.storage;
        store.set_token(1, &tsla).unwrap();
        store
            .set_loan_token(&LoanTokenInfo {
                token_id: 1,
                fixed_interval_price_id: CurrencyPair::usd("TSLA"),
                mintable: true,
                interest: 0,
                creation_tx: Hash::zero(),
                creation_height: 0,
            })
            .unwrap();
        store.add_balance(&alice, TokenAmount::new(1, 100 * COIN)).unwrap();
        // scaled supply would be 1e19 sats
        let splits = AttributeValue::Splits(BTreeMap::from([(1, 1_000_000_000)]));
        store.set_attribute(&AttributeKey::OracleSplits(1), &splits).unwrap();

        chain.apply_block(&BlockInput::new(1, 0)).unwrap();
        assert_eq!(chain.get_tip_height().unwrap(), Some(1));
        assert_eq!(chain.storage().get_balance(&alice, 1).unwrap(), 100 * COIN);
        chain.apply_block(&BlockInput::new(2, 0)).unwrap();
    }
}
