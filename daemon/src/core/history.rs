// History indexer
//
// Entries are written next to the state they describe, so a block that is
// rewound takes its history with it. Engine events that are not caused by a
// transaction use ENGINE_TX_INDEX and a zero hash.

use tessera_common::{
    amount::{Amount, Balances, TokenId},
    crypto::Hash,
    governance::MasternodeId,
    history::{EngineEvent, HistoryEntry, HistoryKind, HistorySubject},
    loan::{VaultId, VaultSnapshot},
    script::Script,
    transaction::CustomTxType,
};

use super::{
    context::{BlockContext, TxContext},
    error::BlockchainError,
    storage::Storage,
};

// End of block events sort after every transaction of the block
pub const ENGINE_TX_INDEX: u32 = u32::MAX;

fn entry(height: u32, tx_index: u32, tx_hash: Hash, kind: HistoryKind, owner: &Script, amounts: Balances) -> HistoryEntry {
    HistoryEntry {
        block_height: height,
        tx_index,
        tx_hash,
        kind,
        owner: owner.clone(),
        amounts,
        vault_snapshot: None,
        cycle: None,
    }
}

/// Groups signed balance deltas by owner.
pub fn group_deltas(deltas: Vec<(Script, TokenId, Amount)>) -> Result<Vec<(Script, Balances)>, BlockchainError> {
    let mut grouped: Vec<(Script, Balances)> = Vec::new();
    for (owner, token_id, delta) in deltas {
        match grouped.iter_mut().find(|(o, _)| *o == owner) {
            Some((_, balances)) => balances.add_signed(token_id, delta)?,
            None => {
                let mut balances = Balances::new();
                balances.add_signed(token_id, delta)?;
                grouped.push((owner, balances));
            }
        }
    }
    Ok(grouped)
}

/// One account entry per owner whose balances moved inside the transaction.
pub fn record_tx_deltas<S: Storage>(
    storage: &mut S,
    tx: &TxContext,
    kind: CustomTxType,
    deltas: Vec<(Script, TokenId, Amount)>,
) -> Result<(), BlockchainError> {
    for (owner, amounts) in group_deltas(deltas)? {
        let entry = entry(tx.block.height, tx.index, *tx.hash, HistoryKind::Tx(kind), &owner, amounts);
        storage.add_history(&HistorySubject::Account(owner), &entry)?;
    }
    Ok(())
}

pub fn record_engine<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    event: EngineEvent,
    owner: &Script,
    amounts: Balances,
) -> Result<(), BlockchainError> {
    if amounts.is_empty() {
        return Ok(());
    }
    let entry = entry(ctx.height, ENGINE_TX_INDEX, Hash::zero(), HistoryKind::Engine(event), owner, amounts);
    storage.add_history(&HistorySubject::Account(owner.clone()), &entry)
}

/// Vault events, optionally carrying the state of the vault at that point.
#[allow(clippy::too_many_arguments)]
pub fn record_vault<S: Storage>(
    storage: &mut S,
    height: u32,
    tx_index: u32,
    tx_hash: Hash,
    vault_id: &VaultId,
    kind: HistoryKind,
    owner: &Script,
    amounts: Balances,
    snapshot: Option<VaultSnapshot>,
) -> Result<(), BlockchainError> {
    let mut entry = entry(height, tx_index, tx_hash, kind, owner, amounts);
    entry.vault_snapshot = snapshot;
    storage.add_history(&HistorySubject::Vault(*vault_id), &entry)
}

pub fn record_vote<S: Storage>(
    storage: &mut S,
    tx: &TxContext,
    masternode_id: &MasternodeId,
    owner: &Script,
    cycle: u8,
) -> Result<(), BlockchainError> {
    let mut entry = entry(
        tx.block.height,
        tx.index,
        *tx.hash,
        HistoryKind::Tx(CustomTxType::Vote),
        owner,
        Balances::new(),
    );
    entry.cycle = Some(cycle);
    storage.add_history(&HistorySubject::Masternode(*masternode_id), &entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::prelude::*;
    use crate::{config::ChainParams, core::storage::ChainStore};
    use tessera_common::history::HistoryFilter;

    #[test]
    fn test_deltas_grouped_per_owner() {
        let alice = Script::p2pkh([1; 20]);
        let bob = Script::p2pkh([2; 20]);
        let grouped = group_deltas(vec![
            (alice.clone(), 0, -5),
            (bob.clone(), 0, 5),
            (alice.clone(), 1, 7),
        ])
        .unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].1.get(0), -5);
        assert_eq!(grouped[0].1.get(1), 7);
        assert_eq!(grouped[1].1.get(0), 5);
    }

    #[test]
    fn test_engine_entries_follow_transactions() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 4, 0);
        let alice = Script::p2pkh([1; 20]);
        let hash = Hash::new([9; 32]);
        let tx = TxContext { block: ctx, index: 0, hash: &hash };

        record_tx_deltas(&mut store, &tx, CustomTxType::AccountToAccount, vec![(alice.clone(), 0, 10)]).unwrap();
        record_engine(&mut store, &ctx, EngineEvent::Rewards, &alice, Balances::from_single(0, 3)).unwrap();
        // empty engine entries are skipped
        record_engine(&mut store, &ctx, EngineEvent::Commission, &alice, Balances::new()).unwrap();

        let entries = store
            .list_history(&HistorySubject::Account(alice), &HistoryFilter::default(), 4)
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, HistoryKind::Engine(EngineEvent::Rewards));
        assert_eq!(entries[1].tx_hash, hash);
    }
}
