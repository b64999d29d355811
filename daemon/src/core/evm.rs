// EVM bridge
//
// This module keeps the EVM side ledger next to the native one. Value moves
// between the two domains through transfer-domain transactions: the native
// leg is applied immediately while the EVM leg is queued as a system
// transaction at the head of the block queue. The queue is executed once per
// native block by an `EvmExecutor` and sealed into an EVM block header.

use std::{collections::BTreeMap, str::FromStr};

use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use primitive_types::{H160, U256};
use serde::Serialize;
use tessera_common::{
    amount::{u256_to_amount, Amount, AmountError, TokenAmount, TokenId, NATIVE_TOKEN},
    attributes::{AttributeKey, Feature, LiveAttribute, TransferDirection, TransferDomainAttribute},
    crypto::{keccak256, Hash},
    evm::{
        dst20_address, dst20_token_id, sats_to_wei, EvmBlockHeader, EvmQueueItem, EvmReceipt, EvmTransaction,
        SystemTransfer, VmDomain, VmMapKind, BASE_FEE_MAX_CHANGE_DENOMINATOR, ELASTICITY_MULTIPLIER,
        FEE_HISTORY_BLOCKS, MAX_INITCODE_SIZE, MAX_RAW_TX_SIZE, MIN_GAS_LIMIT, PRIORITY_FEE_PERCENTILE, WEI_PER_SAT,
    },
    script::{from_erc55, to_erc55, Script},
    transaction::{EvmTxMessage, TransferDomainItem, TransferDomainMessage},
};

use super::{
    accounts, attributes,
    context::{BlockContext, TxContext},
    error::BlockchainError,
    storage::{Column, Storage},
};

use crate::config::ChainParams;

const CREATE_GAS: u64 = 32_000;
const ZERO_BYTE_GAS: u64 = 4;
const NON_ZERO_BYTE_GAS: u64 = 16;

fn pre_validation(message: impl Into<String>) -> BlockchainError {
    BlockchainError::EvmPreValidation(message.into())
}

fn ceil_wei_to_sats(value: U256) -> Result<Amount, BlockchainError> {
    let sat = U256::from(WEI_PER_SAT);
    let (q, r) = value.div_mod(sat);
    let q = if r.is_zero() { q } else { q + 1 };
    Ok(u256_to_amount(q)?)
}

/// Rollback point of an `EvmQueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCheckpoint {
    system: usize,
    signed: usize,
}

/// EVM transactions collected while a native block is applied.
///
/// System transfers always execute before signed transactions, in the order
/// they were queued.
#[derive(Debug, Default)]
pub struct EvmQueue {
    system: Vec<EvmQueueItem>,
    signed: Vec<EvmQueueItem>,
}

impl EvmQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.system.len() + self.signed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.signed.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &EvmQueueItem> {
        self.system.iter().chain(self.signed.iter())
    }

    pub fn checkpoint(&self) -> QueueCheckpoint {
        QueueCheckpoint {
            system: self.system.len(),
            signed: self.signed.len(),
        }
    }

    // Drops everything queued after the checkpoint
    pub fn rollback(&mut self, checkpoint: QueueCheckpoint) {
        self.system.truncate(checkpoint.system);
        self.signed.truncate(checkpoint.signed);
    }

    pub fn into_items(self) -> Vec<EvmQueueItem> {
        let mut items = self.system;
        items.extend(self.signed);
        items
    }

    fn push_system(&mut self, transfer: SystemTransfer) {
        self.system.push(EvmQueueItem::System(transfer));
    }

    fn push_signed(&mut self, native_hash: Hash, tx: EvmTransaction) {
        self.signed.push(EvmQueueItem::Signed { native_hash, tx });
    }

    fn signed_from<'a>(&'a self, address: &'a H160) -> impl Iterator<Item = &'a EvmTransaction> + 'a {
        self.signed.iter().filter_map(move |item| match item {
            EvmQueueItem::Signed { tx, .. } if tx.from == *address => Some(tx),
            _ => None,
        })
    }

    /// Number of signed transactions already queued for `address`.
    pub fn pending_nonce(&self, address: &H160) -> u64 {
        self.signed_from(address).count() as u64
    }

    pub fn gas_reserved(&self) -> u64 {
        self.signed
            .iter()
            .map(|item| match item {
                EvmQueueItem::Signed { tx, .. } => tx.gas_limit,
                EvmQueueItem::System(_) => 0,
            })
            .sum()
    }

    // Net system flow of a token for an address, in sats
    fn pending_system_flow(&self, address: &H160, token_id: TokenId) -> Amount {
        self.system
            .iter()
            .filter_map(|item| match item {
                EvmQueueItem::System(transfer)
                    if transfer.address == *address && transfer.amount.token_id == token_id =>
                {
                    Some(if transfer.inbound {
                        transfer.amount.amount
                    } else {
                        -transfer.amount.amount
                    })
                }
                _ => None,
            })
            .sum()
    }

    fn pending_cost(&self, address: &H160) -> U256 {
        self.signed_from(address)
            .fold(U256::zero(), |acc, tx| acc.saturating_add(tx.max_cost()))
    }
}

/// Balance of `address` once the queued transactions ran, assuming every
/// signed one consumes its whole gas limit.
pub fn available_balance<S: Storage>(
    storage: &S,
    queue: &EvmQueue,
    address: &H160,
    token_id: TokenId,
) -> Result<Amount, BlockchainError> {
    let mut available = storage.get_evm_balance(address, token_id)? + queue.pending_system_flow(address, token_id);
    if token_id == NATIVE_TOKEN {
        available -= ceil_wei_to_sats(queue.pending_cost(address))?;
    }
    Ok(available.max(0))
}

/// Records the DST20 mirror address of a token the first time it is bridged.
pub fn ensure_dst20<S: Storage>(storage: &mut S, token_id: TokenId) -> Result<H160, BlockchainError> {
    let key = token_id.to_be_bytes();
    if let Some(raw) = storage.get_vmmap(VmMapKind::TokenIdToDst20, &key)? {
        return Ok(H160::from_slice(&raw));
    }
    let address = dst20_address(token_id);
    storage.set_vmmap(VmMapKind::TokenIdToDst20, &key, address.as_bytes())?;
    debug!("mapped token {} to dst20 contract {}", token_id, to_erc55(&address));
    Ok(address)
}

fn check_formats<S: Storage>(
    storage: &S,
    direction: TransferDirection,
    attr: TransferDomainAttribute,
    script: &Script,
) -> Result<(), BlockchainError> {
    let formats = attributes::transfer_domain_formats(storage, direction, attr)?;
    if !formats.contains(&script.format()) {
        let side = match attr {
            TransferDomainAttribute::SrcFormats => "source",
            TransferDomainAttribute::DestFormats => "destination",
            _ => "authorization",
        };
        return Err(BlockchainError::InvalidParameter(format!(
            "Invalid {} address format {:?} for {}",
            side,
            script.format(),
            direction
        )));
    }
    Ok(())
}

fn evm_address(script: &Script) -> Result<H160, BlockchainError> {
    script
        .evm_address()
        .ok_or_else(|| BlockchainError::InvalidParameter(format!("{} is not an EVM address", script)))
}

// Consensus checks of one leg, returns its direction
fn validate_transfer<S: Storage>(storage: &S, item: &TransferDomainItem) -> Result<TransferDirection, BlockchainError> {
    let (src, dst) = (&item.src, &item.dst);
    if src.amount != dst.amount {
        return Err(BlockchainError::AmountMismatch);
    }
    if src.domain == dst.domain {
        return Err(BlockchainError::SameDomain);
    }
    if src.amount.amount <= 0 {
        return Err(BlockchainError::InvalidAmount(src.amount.amount));
    }

    let direction = match src.domain {
        VmDomain::Dvm => TransferDirection::DvmToEvm,
        VmDomain::Evm => TransferDirection::EvmToDvm,
    };
    if !attributes::get_bool(
        storage,
        &AttributeKey::TransferDomain(direction, TransferDomainAttribute::Enabled),
        true,
    )? {
        return Err(BlockchainError::FeatureDisabled(format!("transferdomain {}", direction)));
    }

    let token_id = src.amount.token_id;
    let token = storage.get_token_or_err(token_id)?;
    attributes::ensure_unlocked(storage, token_id)?;
    let switch = if token_id == NATIVE_TOKEN {
        TransferDomainAttribute::NativeEnabled
    } else {
        if !token.is_dat() || token.is_pool_share() {
            return Err(BlockchainError::InvalidParameter(format!(
                "Token {} cannot be transferred across domains",
                token.symbol
            )));
        }
        TransferDomainAttribute::DatEnabled
    };
    let key = AttributeKey::TransferDomain(direction, switch);
    if !attributes::get_bool(storage, &key, true)? {
        return Err(BlockchainError::FeatureDisabled(format!("transferdomain {} {}", direction, switch)));
    }

    check_formats(storage, direction, TransferDomainAttribute::SrcFormats, &src.address)?;
    check_formats(storage, direction, TransferDomainAttribute::DestFormats, &dst.address)?;
    check_formats(storage, direction, TransferDomainAttribute::AuthFormats, &src.address)?;
    Ok(direction)
}

/// Moves value across domains. Authorization of every source is checked by
/// the interpreter.
pub fn transfer_domain<S: Storage>(
    storage: &mut S,
    tx: &TxContext,
    queue: &mut EvmQueue,
    message: &TransferDomainMessage,
) -> Result<(), BlockchainError> {
    attributes::ensure_feature(storage, Feature::Evm)?;
    attributes::ensure_feature(storage, Feature::TransferDomain)?;
    match message.transfers.len() {
        1 => {}
        0 => return Err(BlockchainError::InvalidParameter("No transfers".to_owned())),
        n => {
            return Err(BlockchainError::InvalidParameter(format!(
                "Only one transfer per transaction is supported, got {}",
                n
            )))
        }
    }

    for item in message.transfers.iter() {
        let direction = validate_transfer(storage, item)?;
        let value = item.src.amount;
        if value.token_id != NATIVE_TOKEN {
            ensure_dst20(storage, value.token_id)?;
        }

        match direction {
            TransferDirection::DvmToEvm => {
                let address = evm_address(&item.dst.address)?;
                accounts::debit(storage, &item.src.address, value)?;
                attributes::add_live(storage, LiveAttribute::TransferDomainIn, value)?;
                queue.push_system(SystemTransfer {
                    native_hash: *tx.hash,
                    address,
                    amount: value,
                    inbound: true,
                });
            }
            TransferDirection::EvmToDvm => {
                let address = evm_address(&item.src.address)?;
                let available = available_balance(storage, queue, &address, value.token_id)?;
                if available < value.amount {
                    return Err(BlockchainError::Amount(AmountError::Insufficient {
                        token_id: value.token_id,
                        available,
                        requested: value.amount,
                    }));
                }
                accounts::credit(storage, &item.dst.address, value)?;
                attributes::add_live(storage, LiveAttribute::TransferDomainOut, value)?;
                queue.push_system(SystemTransfer {
                    native_hash: *tx.hash,
                    address,
                    amount: value,
                    inbound: false,
                });
            }
        }

        if log::log_enabled!(log::Level::Trace) {
            trace!("transferdomain {} of {} at {}", direction, value, tx.hash);
        }
    }
    Ok(())
}

/// Base fee of the EVM block that follows `parent`, per EIP-1559.
pub fn next_base_fee(params: &ChainParams, parent: Option<&EvmBlockHeader>) -> U256 {
    let floor = U256::from(params.evm.initial_base_fee);
    let parent = match parent {
        Some(parent) => parent,
        None => return floor,
    };

    let target = parent.gas_limit / ELASTICITY_MULTIPLIER;
    if target == 0 || parent.gas_used == target {
        return parent.base_fee.max(floor);
    }

    let base_fee = parent.base_fee;
    let next = if parent.gas_used > target {
        let delta = base_fee * U256::from(parent.gas_used - target)
            / U256::from(target)
            / U256::from(BASE_FEE_MAX_CHANGE_DENOMINATOR);
        base_fee.saturating_add(delta.max(U256::one()))
    } else {
        let delta = base_fee * U256::from(target - parent.gas_used)
            / U256::from(target)
            / U256::from(BASE_FEE_MAX_CHANGE_DENOMINATOR);
        base_fee.saturating_sub(delta)
    };
    next.max(floor)
}

/// Base fee of the block being assembled.
pub fn current_base_fee<S: Storage>(storage: &S, params: &ChainParams) -> Result<U256, BlockchainError> {
    Ok(next_base_fee(params, storage.get_latest_evm_block()?.as_ref()))
}

/// Checks a signed EVM transaction and queues it. Returns its EVM hash.
pub fn queue_evm_tx<S: Storage>(
    storage: &S,
    tx: &TxContext,
    queue: &mut EvmQueue,
    message: &EvmTxMessage,
) -> Result<Hash, BlockchainError> {
    attributes::ensure_feature(storage, Feature::Evm)?;
    if message.raw.len() > MAX_RAW_TX_SIZE {
        return Err(pre_validation(format!(
            "Raw transaction is {} bytes, the maximum is {}",
            message.raw.len(),
            MAX_RAW_TX_SIZE
        )));
    }
    let evm_tx = message.transaction()?;
    let params = tx.block.params;

    if evm_tx.gas_limit < MIN_GAS_LIMIT {
        return Err(pre_validation(format!("Gas limit {} is below {}", evm_tx.gas_limit, MIN_GAS_LIMIT)));
    }
    if evm_tx.gas_limit > params.evm.block_gas_limit {
        return Err(pre_validation(format!(
            "Gas limit {} is above the block gas limit {}",
            evm_tx.gas_limit, params.evm.block_gas_limit
        )));
    }
    if queue.gas_reserved().saturating_add(evm_tx.gas_limit) > params.evm.block_gas_limit {
        return Err(pre_validation("Block gas limit reached"));
    }
    if evm_tx.is_create() && evm_tx.data.len() > MAX_INITCODE_SIZE {
        return Err(pre_validation(format!(
            "Init code is {} bytes, the maximum is {}",
            evm_tx.data.len(),
            MAX_INITCODE_SIZE
        )));
    }
    if evm_tx.max_priority_fee_per_gas > evm_tx.max_fee_per_gas {
        return Err(pre_validation("Priority fee is higher than the max fee"));
    }

    let base_fee = current_base_fee(storage, params)?;
    if evm_tx.max_fee_per_gas < base_fee {
        return Err(pre_validation(format!(
            "Gas price {} is below the block base fee {}",
            evm_tx.max_fee_per_gas, base_fee
        )));
    }
    if !(evm_tx.value % U256::from(WEI_PER_SAT)).is_zero() {
        return Err(pre_validation("Value has sub satoshi precision"));
    }

    let expected = storage.get_evm_nonce(&evm_tx.from)? + queue.pending_nonce(&evm_tx.from);
    if evm_tx.nonce != expected {
        return Err(pre_validation(format!("Invalid nonce {}, expected {}", evm_tx.nonce, expected)));
    }

    let available = sats_to_wei(available_balance(storage, queue, &evm_tx.from, NATIVE_TOKEN)?);
    if available < evm_tx.max_cost() {
        return Err(pre_validation(format!(
            "Sender balance {} is below the transaction cost {}",
            available,
            evm_tx.max_cost()
        )));
    }

    let hash = evm_tx.hash();
    if log::log_enabled!(log::Level::Trace) {
        trace!("queued evm tx {} from {} nonce {}", hash, to_erc55(&evm_tx.from), evm_tx.nonce);
    }
    queue.push_signed(*tx.hash, evm_tx);
    Ok(hash)
}

/// Environment of the EVM block being executed.
#[derive(Debug, Clone)]
pub struct EvmBlockEnv {
    pub number: u64,
    pub native_height: u32,
    pub timestamp: i64,
    pub base_fee: U256,
    pub gas_limit: u64,
}

/// What the executor did with the queue.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub receipts: Vec<EvmReceipt>,
    pub gas_used: u64,
    pub fee_burnt: Amount,
    pub fee_priority: Amount,
    // Tip per gas of every signed transaction
    pub priority_fees: Vec<U256>,
}

/// Runs an ordered queue against the EVM side ledger.
pub trait EvmExecutor<S: Storage> {
    fn execute(&mut self, storage: &mut S, env: &EvmBlockEnv, items: &[EvmQueueItem]) -> Result<ExecutionOutcome, BlockchainError>;
}

/// Executor that only moves native value, contract code is not run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueTransferExecutor;

impl ValueTransferExecutor {
    pub fn intrinsic_gas(tx: &EvmTransaction) -> u64 {
        let data: u64 = tx
            .data
            .iter()
            .map(|b| if *b == 0 { ZERO_BYTE_GAS } else { NON_ZERO_BYTE_GAS })
            .sum();
        let create = if tx.is_create() { CREATE_GAS } else { 0 };
        MIN_GAS_LIMIT + data + create
    }

    pub fn contract_address(from: &H160, nonce: u64) -> H160 {
        let mut bytes = from.as_bytes().to_vec();
        bytes.extend_from_slice(&nonce.to_be_bytes());
        H160::from_slice(&keccak256(&bytes).as_bytes()[12..])
    }

    fn apply_system<S: Storage>(storage: &mut S, transfer: &SystemTransfer) -> Result<bool, BlockchainError> {
        let token_id = transfer.amount.token_id;
        let balance = storage.get_evm_balance(&transfer.address, token_id)?;
        let next = if transfer.inbound {
            balance + transfer.amount.amount
        } else {
            balance - transfer.amount.amount
        };
        if next < 0 {
            warn!("system transfer {} would overdraw {}", transfer.native_hash, to_erc55(&transfer.address));
            return Ok(false);
        }
        storage.set_evm_balance(&transfer.address, token_id, next)?;
        Ok(true)
    }
}

impl<S: Storage> EvmExecutor<S> for ValueTransferExecutor {
    fn execute(&mut self, storage: &mut S, env: &EvmBlockEnv, items: &[EvmQueueItem]) -> Result<ExecutionOutcome, BlockchainError> {
        let mut outcome = ExecutionOutcome::default();
        for (index, item) in items.iter().enumerate() {
            let mut receipt = EvmReceipt {
                tx_hash: item.evm_hash(),
                native_hash: *item.native_hash(),
                block_number: env.number,
                index: index as u32,
                from: H160::zero(),
                to: None,
                success: false,
                gas_used: 0,
                effective_gas_price: U256::zero(),
                contract_address: None,
            };

            let tx = match item {
                EvmQueueItem::System(transfer) => {
                    receipt.to = Some(transfer.address);
                    receipt.success = Self::apply_system(storage, transfer)?;
                    outcome.receipts.push(receipt);
                    continue;
                }
                EvmQueueItem::Signed { tx, .. } => tx,
            };

            receipt.from = tx.from;
            receipt.to = tx.to;
            let price = tx.effective_gas_price(env.base_fee);
            receipt.effective_gas_price = price;

            let nonce = storage.get_evm_nonce(&tx.from)?;
            let balance = storage.get_evm_balance(&tx.from, NATIVE_TOKEN)?;
            let value = u256_to_amount(tx.value / U256::from(WEI_PER_SAT))?;
            let intrinsic = Self::intrinsic_gas(tx);
            let gas_used = intrinsic.min(tx.gas_limit);
            let fee = ceil_wei_to_sats(price * U256::from(gas_used))?;
            let success = intrinsic <= tx.gas_limit;
            let charged = if success { fee + value } else { fee };

            if tx.nonce != nonce || balance < charged {
                warn!("skipping evm tx {}: nonce {} expected {}, balance {}", receipt.tx_hash, tx.nonce, nonce, balance);
                outcome.receipts.push(receipt);
                continue;
            }

            storage.set_evm_balance(&tx.from, NATIVE_TOKEN, balance - charged)?;
            storage.set_evm_nonce(&tx.from, nonce + 1)?;
            if success {
                let recipient = match tx.to {
                    Some(to) => to,
                    None => {
                        let address = Self::contract_address(&tx.from, nonce);
                        receipt.contract_address = Some(address);
                        address
                    }
                };
                let credited = storage.get_evm_balance(&recipient, NATIVE_TOKEN)?;
                storage.set_evm_balance(&recipient, NATIVE_TOKEN, credited + value)?;
            }

            let burnt = u256_to_amount(env.base_fee * U256::from(gas_used) / U256::from(WEI_PER_SAT))?.min(fee);
            outcome.fee_burnt += burnt;
            outcome.fee_priority += fee - burnt;
            outcome.gas_used += gas_used;
            outcome.priority_fees.push(price.saturating_sub(env.base_fee));

            receipt.success = success;
            receipt.gas_used = gas_used;
            outcome.receipts.push(receipt);
        }
        Ok(outcome)
    }
}

fn block_hash(env: &EvmBlockEnv, parent_hash: &Hash, tx_hashes: &[Hash]) -> Hash {
    let mut bytes = Vec::with_capacity(48 + tx_hashes.len() * 32);
    bytes.extend_from_slice(&env.number.to_be_bytes());
    bytes.extend_from_slice(parent_hash.as_bytes());
    bytes.extend_from_slice(&env.native_height.to_be_bytes());
    bytes.extend_from_slice(&env.timestamp.to_be_bytes());
    for hash in tx_hashes {
        bytes.extend_from_slice(hash.as_bytes());
    }
    keccak256(&bytes)
}

/// Executes the queue and seals the EVM block of this native block.
///
/// Base fees are burnt and priority fees credited to `beneficiary`, or burnt
/// as well when the block has none. Nothing is produced while the EVM is
/// disabled and the queue is empty.
pub fn finalize_block<S: Storage, E: EvmExecutor<S> + ?Sized>(
    storage: &mut S,
    ctx: &BlockContext,
    queue: EvmQueue,
    executor: &mut E,
    beneficiary: Option<&Script>,
) -> Result<Option<EvmBlockHeader>, BlockchainError> {
    if queue.is_empty() && !attributes::is_feature_enabled(storage, Feature::Evm)? {
        return Ok(None);
    }

    let parent = storage.get_latest_evm_block()?;
    let env = EvmBlockEnv {
        number: parent.as_ref().map(|p| p.number + 1).unwrap_or(0),
        native_height: ctx.height,
        timestamp: ctx.time,
        base_fee: next_base_fee(ctx.params, parent.as_ref()),
        gas_limit: ctx.params.evm.block_gas_limit,
    };
    let parent_hash = parent.map(|p| p.hash).unwrap_or_else(Hash::zero);

    let items = queue.into_items();
    let outcome = executor.execute(storage, &env, &items)?;

    let mut tx_hashes = Vec::with_capacity(outcome.receipts.len());
    for receipt in outcome.receipts.iter() {
        storage.set_evm_receipt(receipt)?;
        storage.set_vmmap(VmMapKind::TxHashDvmToEvm, receipt.native_hash.as_bytes(), receipt.tx_hash.as_bytes())?;
        tx_hashes.push(receipt.tx_hash);
    }

    let burnt = TokenAmount::new(NATIVE_TOKEN, outcome.fee_burnt);
    accounts::credit_burn(storage, ctx, burnt, Some(LiveAttribute::EvmFeeBurnt))?;
    let priority = TokenAmount::new(NATIVE_TOKEN, outcome.fee_priority);
    match beneficiary {
        Some(script) => accounts::credit(storage, script, priority)?,
        None => accounts::credit_burn(storage, ctx, priority, None)?,
    }
    attributes::add_live(storage, LiveAttribute::EvmFeePriority, priority)?;

    let header = EvmBlockHeader {
        number: env.number,
        hash: block_hash(&env, &parent_hash, &tx_hashes),
        parent_hash,
        native_height: ctx.height,
        timestamp: ctx.time,
        base_fee: env.base_fee,
        gas_limit: env.gas_limit,
        gas_used: outcome.gas_used,
        tx_hashes,
        priority_fees: outcome.priority_fees,
        fee_burnt: outcome.fee_burnt,
        fee_priority: outcome.fee_priority,
    };
    storage.set_evm_block(&header)?;
    storage.set_vmmap(
        VmMapKind::BlockNumberDvmToEvm,
        &(ctx.height as u64).to_be_bytes(),
        &header.number.to_be_bytes(),
    )?;

    metrics::counter!("tessera_evm_txs").increment(header.tx_hashes.len() as u64);
    if !header.tx_hashes.is_empty() {
        info!(
            "sealed evm block {} with {} txs at height {}, gas used {}",
            header.number,
            header.tx_hashes.len(),
            ctx.height,
            header.gas_used
        );
    }
    Ok(Some(header))
}

fn parse_vmmap_key(kind: VmMapKind, input: &str) -> Result<Vec<u8>, BlockchainError> {
    let invalid = || BlockchainError::InvalidParameter(format!("Invalid {} input '{}'", kind, input));
    Ok(match kind {
        VmMapKind::TxHashDvmToEvm | VmMapKind::TxHashEvmToDvm => {
            let hex = input.strip_prefix("0x").unwrap_or(input);
            Hash::from_str(hex).map_err(|_| invalid())?.as_bytes().to_vec()
        }
        VmMapKind::BlockNumberDvmToEvm | VmMapKind::BlockNumberEvmToDvm => {
            input.parse::<u64>().map_err(|_| invalid())?.to_be_bytes().to_vec()
        }
        VmMapKind::TokenIdToDst20 => input.parse::<TokenId>().map_err(|_| invalid())?.to_be_bytes().to_vec(),
        VmMapKind::Dst20ToTokenId => from_erc55(input).ok_or_else(invalid)?.as_bytes().to_vec(),
    })
}

fn format_vmmap_value(kind: VmMapKind, raw: &[u8]) -> Result<String, BlockchainError> {
    let corrupted = || BlockchainError::InvalidState(format!("Corrupted {} entry", kind));
    Ok(match kind {
        VmMapKind::TxHashDvmToEvm => format!("0x{}", hex::encode(raw)),
        VmMapKind::TxHashEvmToDvm => hex::encode(raw),
        VmMapKind::BlockNumberDvmToEvm | VmMapKind::BlockNumberEvmToDvm => {
            let bytes: [u8; 8] = raw.try_into().map_err(|_| corrupted())?;
            u64::from_be_bytes(bytes).to_string()
        }
        VmMapKind::TokenIdToDst20 => {
            if raw.len() != 20 {
                return Err(corrupted());
            }
            to_erc55(&H160::from_slice(raw))
        }
        VmMapKind::Dst20ToTokenId => {
            let bytes: [u8; 4] = raw.try_into().map_err(|_| corrupted())?;
            TokenId::from_be_bytes(bytes).to_string()
        }
    })
}

/// Resolves a native identifier to its EVM counterpart or back.
pub fn vmmap<S: Storage>(storage: &S, kind: VmMapKind, input: &str) -> Result<String, BlockchainError> {
    let key = parse_vmmap_key(kind, input)?;
    if kind == VmMapKind::Dst20ToTokenId {
        // mirror addresses are deterministic even before the first transfer
        if let Some(token_id) = dst20_token_id(&H160::from_slice(&key)) {
            if storage.get_token(token_id)?.is_some() {
                return Ok(token_id.to_string());
            }
        }
    }
    match storage.get_vmmap(kind, &key)? {
        Some(raw) => format_vmmap_value(kind, &raw),
        None => Err(BlockchainError::InvalidParameter(format!("Key '{}' not found for {}", input, kind))),
    }
}

/// Every mapping of a kind, keys and values formatted like `vmmap` output.
pub fn log_vmmaps<S: Storage>(storage: &S, kind: VmMapKind) -> Result<IndexMap<String, String>, BlockchainError> {
    let mut result = IndexMap::new();
    for (key, value) in storage.list_vmmap(kind)? {
        result.insert(format_vmmap_value(kind.inverse(), &key)?, format_vmmap_value(kind, &value)?);
    }
    Ok(result)
}

/// Native balance of an EVM address, in wei.
pub fn get_balance<S: Storage>(storage: &S, address: &H160) -> Result<U256, BlockchainError> {
    Ok(sats_to_wei(storage.get_evm_balance(address, NATIVE_TOKEN)?))
}

pub fn get_transaction_count<S: Storage>(storage: &S, address: &H160) -> Result<u64, BlockchainError> {
    storage.get_evm_nonce(address)
}

pub fn block_number<S: Storage>(storage: &S) -> Result<Option<u64>, BlockchainError> {
    Ok(storage.get_latest_evm_block()?.map(|header| header.number))
}

pub fn get_receipt<S: Storage>(storage: &S, tx_hash: &Hash) -> Result<EvmReceipt, BlockchainError> {
    storage
        .get_evm_receipt(tx_hash)?
        .ok_or_else(|| BlockchainError::InvalidParameter(format!("Receipt {} not found", tx_hash)))
}

/// `eth_feeHistory` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeHistory {
    pub oldest_block: u64,
    // One more entry than blocks, the last one is the next base fee
    pub base_fee_per_gas: Vec<U256>,
    pub gas_used_ratio: Vec<f64>,
    pub reward: Vec<Vec<U256>>,
}

fn percentile(sorted: &[U256], pct: f64) -> U256 {
    if sorted.is_empty() {
        return U256::zero();
    }
    let pct = pct.clamp(0.0, 100.0);
    let index = ((sorted.len() - 1) as f64 * pct / 100.0).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Base fees, gas usage and tip percentiles of the `block_count` blocks
/// ending at `newest` (the latest block when `None`).
pub fn fee_history<S: Storage>(
    storage: &S,
    params: &ChainParams,
    block_count: u64,
    newest: Option<u64>,
    percentiles: &[f64],
) -> Result<FeeHistory, BlockchainError> {
    if percentiles.windows(2).any(|w| w[0] > w[1]) || percentiles.iter().any(|p| !(0.0..=100.0).contains(p)) {
        return Err(BlockchainError::InvalidParameter(
            "Reward percentiles must be increasing values between 0 and 100".to_owned(),
        ));
    }

    let latest = match block_number(storage)? {
        Some(latest) => latest,
        None => {
            return Ok(FeeHistory {
                oldest_block: 0,
                base_fee_per_gas: vec![current_base_fee(storage, params)?],
                gas_used_ratio: Vec::new(),
                reward: Vec::new(),
            })
        }
    };
    let newest = newest.unwrap_or(latest).min(latest);
    let count = block_count.clamp(1, 1024).min(newest + 1);
    let oldest = newest + 1 - count;

    let mut history = FeeHistory {
        oldest_block: oldest,
        base_fee_per_gas: Vec::with_capacity(count as usize + 1),
        gas_used_ratio: Vec::with_capacity(count as usize),
        reward: Vec::new(),
    };
    let mut last = None;
    for number in oldest..=newest {
        let header = storage.get_evm_block(number)?.ok_or(BlockchainError::NotFoundOnDisk(Column::EvmBlocks))?;
        history.base_fee_per_gas.push(header.base_fee);
        history.gas_used_ratio.push(if header.gas_limit == 0 {
            0.0
        } else {
            header.gas_used as f64 / header.gas_limit as f64
        });
        if !percentiles.is_empty() {
            let mut fees = header.priority_fees.clone();
            fees.sort();
            history.reward.push(percentiles.iter().map(|p| percentile(&fees, *p)).collect());
        }
        last = Some(header);
    }
    history.base_fee_per_gas.push(next_base_fee(params, last.as_ref()));
    Ok(history)
}

/// Suggested tip, the configured percentile of the tips paid in recent blocks.
pub fn suggest_priority_fee<S: Storage>(storage: &S) -> Result<U256, BlockchainError> {
    let latest = match block_number(storage)? {
        Some(latest) => latest,
        None => return Ok(U256::zero()),
    };

    let mut fees = Vec::new();
    let oldest = latest.saturating_sub(FEE_HISTORY_BLOCKS - 1);
    for number in oldest..=latest {
        if let Some(header) = storage.get_evm_block(number)? {
            fees.extend(header.priority_fees);
        }
    }
    fees.sort();
    Ok(percentile(&fees, PRIORITY_FEE_PERCENTILE as f64))
}

/// Mirror balances of an address in sats, keyed by token.
pub fn get_token_balances<S: Storage>(storage: &S, address: &H160) -> Result<BTreeMap<TokenId, Amount>, BlockchainError> {
    Ok(storage.get_evm_balances(address)?.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::prelude::*;
    use crate::{
        config::ChainParams,
        core::{error::ErrorKind, storage::ChainStore},
    };
    use tessera_common::{
        amount::COIN,
        attributes::AttributeValue,
        evm::DomainEndpoint,
        token::{Token, TOKEN_FLAG_DAT},
    };

    type Store = ChainStore<crate::core::storage::MemoryBackend>;

    fn token(symbol: &str, flags: u8) -> Token {
        Token {
            symbol: symbol.to_owned(),
            name: symbol.to_owned(),
            decimal: 8,
            limit: 0,
            flags,
            minted: 0,
            creation_tx: Hash::zero(),
            creation_height: 0,
            owner: Script::empty(),
        }
    }

    fn setup(alice: &Script) -> Store {
        let mut store = ChainStore::in_memory();
        store.set_token(NATIVE_TOKEN, &token("DFI", TOKEN_FLAG_DAT)).unwrap();
        for feature in [Feature::Evm, Feature::TransferDomain] {
            store
                .set_attribute(&AttributeKey::Feature(feature), &AttributeValue::Bool(true))
                .unwrap();
        }
        accounts::mint(&mut store, alice, TokenAmount::new(NATIVE_TOKEN, 100 * COIN)).unwrap();
        store
    }

    fn leg(address: &Script, amount: TokenAmount, domain: VmDomain) -> DomainEndpoint {
        DomainEndpoint {
            address: address.clone(),
            amount,
            domain,
        }
    }

    fn transfer(src: DomainEndpoint, dst: DomainEndpoint) -> TransferDomainMessage {
        TransferDomainMessage {
            transfers: vec![TransferDomainItem { src, dst }],
        }
    }

    fn signed(from: H160, nonce: u64, value: Amount, max_fee: U256) -> EvmTransaction {
        EvmTransaction {
            from,
            to: Some(H160::repeat_byte(0xbb)),
            nonce,
            value: sats_to_wei(value),
            gas_limit: MIN_GAS_LIMIT,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: U256::from(WEI_PER_SAT),
            data: Vec::new(),
        }
    }

    fn assert_balanced(store: &Store) {
        for (token_id, audit) in accounts::audit_supply(store).unwrap() {
            assert!(audit.is_balanced(), "token {} is not balanced: {:?}", token_id, audit);
        }
    }

    #[test]
    fn test_transfer_domain_round_trip() {
        let params = ChainParams::regtest();
        let alice = Script::p2pkh([1; 20]);
        let evm = H160::repeat_byte(0xaa);
        let evm_script = Script::erc55(&evm);
        let mut store = setup(&alice);
        let fifty = TokenAmount::new(NATIVE_TOKEN, 50 * COIN);

        let ctx = BlockContext::new(&params, 10, 1000);
        let hash = Hash::new([1; 32]);
        let tx = TxContext { block: ctx, index: 0, hash: &hash };
        let mut queue = EvmQueue::new();
        transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, fifty, VmDomain::Dvm), leg(&evm_script, fifty, VmDomain::Evm)),
        )
        .unwrap();
        assert_eq!(store.get_balance(&alice, NATIVE_TOKEN).unwrap(), 50 * COIN);
        // the EVM leg only lands when the block is sealed
        assert_eq!(store.get_evm_balance(&evm, NATIVE_TOKEN).unwrap(), 0);
        let header = finalize_block(&mut store, &ctx, queue, &mut ValueTransferExecutor, None)
            .unwrap()
            .unwrap();
        assert_eq!(header.number, 0);
        assert_eq!(get_balance(&store, &evm).unwrap(), sats_to_wei(50 * COIN));
        assert_balanced(&store);

        let ctx = BlockContext::new(&params, 11, 1030);
        let hash = Hash::new([2; 32]);
        let tx = TxContext { block: ctx, index: 0, hash: &hash };
        let mut queue = EvmQueue::new();
        transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&evm_script, fifty, VmDomain::Evm), leg(&alice, fifty, VmDomain::Dvm)),
        )
        .unwrap();
        // spending the same mirror balance twice in one block is refused
        let hash = Hash::new([3; 32]);
        let again = TxContext { block: ctx, index: 1, hash: &hash };
        let err = transfer_domain(
            &mut store,
            &again,
            &mut queue,
            &transfer(leg(&evm_script, fifty, VmDomain::Evm), leg(&alice, fifty, VmDomain::Dvm)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        finalize_block(&mut store, &ctx, queue, &mut ValueTransferExecutor, None).unwrap();
        assert_eq!(store.get_balance(&alice, NATIVE_TOKEN).unwrap(), 100 * COIN);
        assert_eq!(store.get_evm_balance(&evm, NATIVE_TOKEN).unwrap(), 0);
        assert_eq!(attributes::get_live(&store, LiveAttribute::TransferDomainIn).unwrap().get(NATIVE_TOKEN), 50 * COIN);
        assert_eq!(attributes::get_live(&store, LiveAttribute::TransferDomainOut).unwrap().get(NATIVE_TOKEN), 50 * COIN);
        assert_balanced(&store);

        let evm_hash = vmmap(&store, VmMapKind::TxHashDvmToEvm, &Hash::new([2; 32]).to_hex()).unwrap();
        assert_eq!(vmmap(&store, VmMapKind::TxHashEvmToDvm, &evm_hash).unwrap(), Hash::new([2; 32]).to_hex());
        assert_eq!(vmmap(&store, VmMapKind::BlockNumberDvmToEvm, "11").unwrap(), "1");
        assert_eq!(log_vmmaps(&store, VmMapKind::BlockNumberEvmToDvm).unwrap().len(), 2);
    }

    #[test]
    fn test_transfer_domain_rules() {
        let params = ChainParams::regtest();
        let alice = Script::p2pkh([1; 20]);
        let evm_script = Script::erc55(&H160::repeat_byte(0xaa));
        let mut store = setup(&alice);
        store.set_token(1, &token("BTC", TOKEN_FLAG_DAT)).unwrap();
        store.set_token(200, &token("USER", 0)).unwrap();
        let ctx = BlockContext::new(&params, 10, 1000);
        let hash = Hash::new([1; 32]);
        let tx = TxContext { block: ctx, index: 0, hash: &hash };
        let mut queue = EvmQueue::new();

        let dfi = TokenAmount::new(NATIVE_TOKEN, 100 * COIN);
        let btc = TokenAmount::new(1, 100 * COIN);
        let err = transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, btc, VmDomain::Dvm), leg(&evm_script, dfi, VmDomain::Evm)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);

        let err = transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, dfi, VmDomain::Dvm), leg(&alice, dfi, VmDomain::Dvm)),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Cannot transfer inside same domain");

        // native scripts are not valid EVM destinations
        let err = transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, dfi, VmDomain::Dvm), leg(&alice, dfi, VmDomain::Evm)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let user = TokenAmount::new(200, COIN);
        let err = transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, user, VmDomain::Dvm), leg(&evm_script, user, VmDomain::Evm)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        store
            .set_attribute(
                &AttributeKey::TransferDomain(TransferDirection::DvmToEvm, TransferDomainAttribute::NativeEnabled),
                &AttributeValue::Bool(false),
            )
            .unwrap();
        let err = transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, dfi, VmDomain::Dvm), leg(&evm_script, dfi, VmDomain::Evm)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureDisabled);

        store
            .set_attribute(&AttributeKey::Feature(Feature::TransferDomain), &AttributeValue::Bool(false))
            .unwrap();
        let err = transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, dfi, VmDomain::Dvm), leg(&evm_script, dfi, VmDomain::Evm)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureDisabled);
        assert!(queue.is_empty());
        assert_eq!(store.get_balance(&alice, NATIVE_TOKEN).unwrap(), 100 * COIN);
    }

    #[test]
    fn test_pre_validation() {
        let params = ChainParams::regtest();
        let alice = Script::p2pkh([1; 20]);
        let from = H160::repeat_byte(0xaa);
        let mut store = setup(&alice);
        store.set_evm_balance(&from, NATIVE_TOKEN, COIN).unwrap();

        let ctx = BlockContext::new(&params, 10, 1000);
        let hash = Hash::new([1; 32]);
        let tx = TxContext { block: ctx, index: 0, hash: &hash };
        let base_fee = U256::from(params.evm.initial_base_fee);
        let mut queue = EvmQueue::new();
        let check = |queue: &mut EvmQueue, evm_tx: &EvmTransaction| {
            queue_evm_tx(&store, &tx, queue, &EvmTxMessage::from_transaction(evm_tx)).map(|_| ())
        };

        let mut low_gas = signed(from, 0, 0, base_fee);
        low_gas.gas_limit = MIN_GAS_LIMIT - 1;
        assert_eq!(check(&mut queue, &low_gas).unwrap_err().kind(), ErrorKind::EvmPreValidationFailed);

        let mut high_gas = signed(from, 0, 0, base_fee);
        high_gas.gas_limit = params.evm.block_gas_limit + 1;
        assert_eq!(check(&mut queue, &high_gas).unwrap_err().kind(), ErrorKind::EvmPreValidationFailed);

        let cheap = signed(from, 0, 0, base_fee - 1);
        assert_eq!(check(&mut queue, &cheap).unwrap_err().kind(), ErrorKind::EvmPreValidationFailed);

        let mut initcode = signed(from, 0, 0, base_fee);
        initcode.to = None;
        initcode.data = vec![1; MAX_INITCODE_SIZE + 1];
        initcode.gas_limit = 10_000_000;
        assert_eq!(check(&mut queue, &initcode).unwrap_err().kind(), ErrorKind::EvmPreValidationFailed);

        let oversized = EvmTxMessage { raw: vec![0; MAX_RAW_TX_SIZE + 1] };
        let err = queue_evm_tx(&store, &tx, &mut queue, &oversized).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvmPreValidationFailed);

        let rich = signed(from, 0, 2 * COIN, base_fee);
        assert_eq!(check(&mut queue, &rich).unwrap_err().kind(), ErrorKind::EvmPreValidationFailed);

        let wrong_nonce = signed(from, 1, 0, base_fee);
        assert_eq!(check(&mut queue, &wrong_nonce).unwrap_err().kind(), ErrorKind::EvmPreValidationFailed);

        check(&mut queue, &signed(from, 0, COIN / 2, base_fee)).unwrap();
        // the queued spend counts against the next transaction
        let err = check(&mut queue, &signed(from, 1, COIN / 2, base_fee)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvmPreValidationFailed);
        check(&mut queue, &signed(from, 1, COIN / 4, base_fee)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_block_fees_and_receipts() {
        let params = ChainParams::regtest();
        let alice = Script::p2pkh([1; 20]);
        let miner = Script::p2pkh([9; 20]);
        let from = H160::repeat_byte(0xaa);
        let evm_script = Script::erc55(&from);
        let mut store = setup(&alice);
        let ctx = BlockContext::new(&params, 10, 1000);

        let ten = TokenAmount::new(NATIVE_TOKEN, 10 * COIN);
        let hash = Hash::new([1; 32]);
        let tx = TxContext { block: ctx, index: 0, hash: &hash };
        let mut queue = EvmQueue::new();
        transfer_domain(
            &mut store,
            &tx,
            &mut queue,
            &transfer(leg(&alice, ten, VmDomain::Dvm), leg(&evm_script, ten, VmDomain::Evm)),
        )
        .unwrap();
        // funds queued in the same block are spendable by later signed txs
        let base_fee = U256::from(params.evm.initial_base_fee);
        let hash = Hash::new([2; 32]);
        let tx = TxContext { block: ctx, index: 1, hash: &hash };
        let evm_hash = queue_evm_tx(
            &store,
            &tx,
            &mut queue,
            &EvmTxMessage::from_transaction(&signed(from, 0, COIN, base_fee * 3)),
        )
        .unwrap();

        let header = finalize_block(&mut store, &ctx, queue, &mut ValueTransferExecutor, Some(&miner))
            .unwrap()
            .unwrap();
        assert_eq!(header.tx_hashes.len(), 2);
        assert_eq!(header.gas_used, MIN_GAS_LIMIT);

        let receipt = get_receipt(&store, &evm_hash).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.index, 1);
        assert_eq!(receipt.effective_gas_price, base_fee + U256::from(WEI_PER_SAT));

        // 1 sat per gas of base fee at the initial floor, 1 sat per gas of tip
        assert_eq!(header.fee_burnt, 21_000);
        assert_eq!(header.fee_priority, 21_000);
        assert_eq!(store.get_balance(&miner, NATIVE_TOKEN).unwrap(), 21_000);
        assert_eq!(attributes::get_live(&store, LiveAttribute::EvmFeeBurnt).unwrap().get(NATIVE_TOKEN), 21_000);
        assert_eq!(store.get_evm_balance(&H160::repeat_byte(0xbb), NATIVE_TOKEN).unwrap(), COIN);
        assert_eq!(get_transaction_count(&store, &from).unwrap(), 1);
        assert_eq!(suggest_priority_fee(&store).unwrap(), U256::from(WEI_PER_SAT));
        assert_balanced(&store);
    }

    #[test]
    fn test_base_fee_follows_usage() {
        let params = ChainParams::regtest();
        let floor = U256::from(params.evm.initial_base_fee);
        assert_eq!(next_base_fee(&params, None), floor);

        let mut parent = EvmBlockHeader {
            number: 0,
            hash: Hash::zero(),
            parent_hash: Hash::zero(),
            native_height: 1,
            timestamp: 0,
            base_fee: floor * 2,
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            tx_hashes: Vec::new(),
            priority_fees: Vec::new(),
            fee_burnt: 0,
            fee_priority: 0,
        };
        assert_eq!(next_base_fee(&params, Some(&parent)), floor * 2);

        parent.gas_used = 30_000_000;
        assert_eq!(next_base_fee(&params, Some(&parent)), floor * 2 + floor * 2 / 8);

        parent.gas_used = 0;
        assert_eq!(next_base_fee(&params, Some(&parent)), floor * 2 - floor * 2 / 8);

        // never below the floor
        parent.base_fee = floor;
        assert_eq!(next_base_fee(&params, Some(&parent)), floor);
    }

    #[test]
    fn test_fee_history() {
        let params = ChainParams::regtest();
        let mut store = ChainStore::in_memory();
        let empty = fee_history(&store, &params, 4, None, &[50.0]).unwrap();
        assert_eq!(empty.base_fee_per_gas.len(), 1);

        for number in 0..3u64 {
            let header = EvmBlockHeader {
                number,
                hash: Hash::new([number as u8 + 1; 32]),
                parent_hash: Hash::zero(),
                native_height: number as u32 + 1,
                timestamp: 0,
                base_fee: U256::from(params.evm.initial_base_fee),
                gas_limit: 30_000_000,
                gas_used: 15_000_000,
                tx_hashes: Vec::new(),
                priority_fees: vec![U256::from(number), U256::from(number + 10)],
                fee_burnt: 0,
                fee_priority: 0,
            };
            store.set_evm_block(&header).unwrap();
        }

        let history = fee_history(&store, &params, 2, None, &[0.0, 100.0]).unwrap();
        assert_eq!(history.oldest_block, 1);
        assert_eq!(history.base_fee_per_gas.len(), 3);
        assert_eq!(history.gas_used_ratio, vec![0.5, 0.5]);
        assert_eq!(history.reward[1], vec![U256::from(2u64), U256::from(12u64)]);

        let err = fee_history(&store, &params, 2, None, &[60.0, 10.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
}
