//! Rewind integration tests
//!
//! Every block is journaled with the previous value of each key it wrote.
//! Rewinding must restore the exact state below the target height, and
//! replaying the same blocks must land on the same state again.

mod common;

use std::collections::BTreeMap;

use common::{address, TestChain};
use proptest::prelude::*;
use tessera_common::{
    amount::{Amount, TokenAmount, TokenId, COIN, NATIVE_TOKEN},
    script::Script,
    transaction::CustomTransaction,
};
use tessera_daemon::core::storage::{prelude::*, StorageBackend};

const ACCOUNTS: u8 = 3;
const BTC: TokenId = 1;

fn accounts() -> Vec<Script> {
    (1..=ACCOUNTS).map(address).collect()
}

// Balances of every test account plus the minted supply of each token
fn state_of<B: StorageBackend>(chain: &TestChain<B>) -> (BTreeMap<(Script, TokenId), Amount>, Vec<(TokenId, Amount)>) {
    let mut balances = BTreeMap::new();
    for account in accounts() {
        for token_id in [NATIVE_TOKEN, BTC] {
            balances.insert((account.clone(), token_id), chain.balance(&account, token_id));
        }
    }
    let supply = chain
        .store()
        .list_tokens()
        .unwrap()
        .into_iter()
        .map(|(id, token)| (id, token.minted))
        .collect();
    (balances, supply)
}

fn fund_accounts<B: StorageBackend>(chain: &mut TestChain<B>) {
    let txs = accounts().iter().map(|account| chain.fund(account, 100 * COIN)).collect::<Vec<_>>();
    chain.mine_ok(txs);
}

#[test]
fn test_rewind_undoes_token_creation() {
    let mut chain = TestChain::on_disk();
    fund_accounts(&mut chain);
    let before = state_of(&chain);

    let tx = chain.create_dat("BTC");
    chain.mine_ok(vec![tx]);
    let tx = chain.mint(&address(1), BTC, 5 * COIN);
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.balance(&address(1), BTC), 5 * COIN);

    assert_eq!(chain.rewind_to(1), 2);
    assert_eq!(chain.chain.get_tip_height().unwrap(), Some(1));
    assert!(chain.store().get_token(BTC).unwrap().is_none());
    assert_eq!(state_of(&chain), before);
    // the tip time goes back with the block
    assert_eq!(chain.time, common::GENESIS_TIME + common::BLOCK_TIME);

    // nothing left above the tip
    assert_eq!(chain.rewind_to(1), 0);

    // the id is handed out again
    let tx = chain.create_dat("ETH");
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.store().get_token_or_err(BTC).unwrap().symbol, "ETH");
    chain.assert_conservation();
}

#[test]
fn test_state_survives_reopen() {
    let mut chain = TestChain::on_disk();
    fund_accounts(&mut chain);
    let tx = chain.send(&address(1), &address(2), TokenAmount::new(NATIVE_TOKEN, 40 * COIN));
    chain.mine_ok(vec![tx]);
    let before = state_of(&chain);

    let mut chain = chain.reopen();
    assert_eq!(chain.chain.get_tip_height().unwrap(), Some(2));
    assert_eq!(state_of(&chain), before);
    assert_eq!(chain.balance(&address(2), NATIVE_TOKEN), 140 * COIN);

    // the journal is on disk as well
    assert_eq!(chain.rewind_to(1), 1);
    assert_eq!(chain.balance(&address(2), NATIVE_TOKEN), 100 * COIN);
    chain.assert_conservation();
}

#[test]
fn test_rejects_block_out_of_order() {
    let mut chain = TestChain::in_memory();
    fund_accounts(&mut chain);
    let block = tessera_daemon::core::blockchain::BlockInput::new(chain.height + 2, chain.time + common::BLOCK_TIME);
    assert!(chain.chain.apply_block(&block).is_err());
    assert_eq!(chain.chain.get_tip_height().unwrap(), Some(1));
}

// (from, to, amount) transfers between the test accounts
fn transfers() -> impl Strategy<Value = Vec<Vec<(u8, u8, Amount)>>> {
    let transfer = (1..=ACCOUNTS, 1..=ACCOUNTS, 1..=60 * COIN);
    prop::collection::vec(prop::collection::vec(transfer, 0..4), 1..8)
}

fn build_blocks<B: StorageBackend>(chain: &mut TestChain<B>, blocks: &[Vec<(u8, u8, Amount)>]) -> Vec<Vec<CustomTransaction>> {
    blocks
        .iter()
        .map(|block| {
            block
                .iter()
                .map(|(from, to, amount)| {
                    chain.send(&address(*from), &address(*to), TokenAmount::new(NATIVE_TOKEN, *amount))
                })
                .collect()
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // Rewinding to a height restores its state, replaying the blocks gives
    // back the same state
    #[test]
    fn test_rewind_and_replay(blocks in transfers(), target_offset in 0usize..8) {
        let mut chain = TestChain::in_memory();
        fund_accounts(&mut chain);
        let txs = build_blocks(&mut chain, &blocks);

        let mut states = vec![state_of(&chain)];
        for block in txs.iter() {
            // transfers above the balance are rejected, the others applied
            chain.mine(block.clone());
            states.push(state_of(&chain));
        }
        let tip = chain.height;
        let target = 1 + (target_offset as u32).min(tip - 1);

        prop_assert_eq!(chain.rewind_to(target), tip - target);
        prop_assert_eq!(&state_of(&chain), &states[(target - 1) as usize]);
        chain.assert_conservation();

        for block in txs.iter().skip((target - 1) as usize) {
            chain.mine(block.clone());
        }
        prop_assert_eq!(chain.height, tip);
        prop_assert_eq!(&state_of(&chain), states.last().unwrap());
    }
}
