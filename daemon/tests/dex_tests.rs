//! DEX integration tests
//!
//! Pools are created, funded and traded through custom transactions applied
//! in blocks, the way the block processor drives the engine.
//!
//! Properties tested:
//! - Fee direction of a pool side
//! - Composite swaps and their round trip never gaining tokens
//! - Locked pool liquidity and token locks

mod common;

use std::collections::BTreeMap;

use common::{address, TestChain};
use proptest::prelude::*;
use tessera_common::{
    amount::{Amount, Balances, TokenAmount, TokenId, COIN, NATIVE_TOKEN},
    attributes::LiveAttribute,
    dex::{PoolPrice, MINIMUM_LIQUIDITY},
    script::Script,
    transaction::{
        AddPoolLiquidityMessage, CompositeSwapMessage, CreatePoolPairMessage, CustomTransaction, CustomTxMessage,
        PoolSwapMessage, RemovePoolLiquidityMessage,
    },
};
use tessera_daemon::core::{
    attributes,
    blockchain::TxOutcome,
    error::ErrorKind,
    storage::{prelude::*, StorageBackend},
};

const DUSD: TokenId = 1;
// the DUSD-DFI share token takes id 2
const BTC: TokenId = 3;

fn create_pool<B: StorageBackend>(
    chain: &mut TestChain<B>,
    token_a: TokenId,
    token_b: TokenId,
    commission: Amount,
) -> CustomTransaction {
    let foundation = chain.foundation();
    let message = CustomTxMessage::CreatePoolPair(CreatePoolPairMessage {
        token_a,
        token_b,
        commission,
        owner: foundation.clone(),
        status: true,
        pair_symbol: String::new(),
        custom_rewards: Balances::new(),
    });
    chain.tx(message, vec![foundation])
}

fn add_liquidity<B: StorageBackend>(
    chain: &mut TestChain<B>,
    owner: &Script,
    a: (TokenId, Amount),
    b: (TokenId, Amount),
) -> CustomTransaction {
    let message = CustomTxMessage::AddPoolLiquidity(AddPoolLiquidityMessage {
        from: BTreeMap::from([(owner.clone(), [a, b].into_iter().collect())]),
        share_address: owner.clone(),
    });
    chain.tx(message, vec![owner.clone()])
}

fn swap_message(from: &Script, token_from: TokenId, amount_from: Amount, token_to: TokenId) -> PoolSwapMessage {
    PoolSwapMessage {
        from: from.clone(),
        token_from,
        amount_from,
        to: from.clone(),
        token_to,
        max_price: PoolPrice::unlimited(),
    }
}

fn swap<B: StorageBackend>(
    chain: &mut TestChain<B>,
    from: &Script,
    token_from: TokenId,
    amount_from: Amount,
    token_to: TokenId,
) -> CustomTransaction {
    let message = CustomTxMessage::PoolSwap(swap_message(from, token_from, amount_from, token_to));
    chain.tx(message, vec![from.clone()])
}

fn composite_swap<B: StorageBackend>(
    chain: &mut TestChain<B>,
    from: &Script,
    token_from: TokenId,
    amount_from: Amount,
    token_to: TokenId,
) -> CustomTransaction {
    let message = CustomTxMessage::PoolSwapV2(CompositeSwapMessage {
        swap: swap_message(from, token_from, amount_from, token_to),
        pool_ids: Vec::new(),
    });
    chain.tx(message, vec![from.clone()])
}

// DUSD (1) and a DUSD-DFI pool (2) holding 1000 DUSD / 100 DFI
fn dusd_pool<B: StorageBackend>(chain: &mut TestChain<B>, lp: &Script, commission: Amount) -> TokenId {
    let txs = vec![chain.create_dat("DUSD"), chain.fund(lp, 100 * COIN)];
    chain.mine_ok(txs);
    let txs = vec![chain.mint(lp, DUSD, 1000 * COIN), create_pool(chain, DUSD, NATIVE_TOKEN, commission)];
    chain.mine_ok(txs);
    let tx = add_liquidity(chain, lp, (DUSD, 1000 * COIN), (NATIVE_TOKEN, 100 * COIN));
    chain.mine_ok(vec![tx]);

    let (pool_id, _) = chain.store().get_pool_by_pair(DUSD, NATIVE_TOKEN).unwrap().unwrap();
    pool_id
}

#[test]
fn test_swap_fee_direction() {
    let mut chain = TestChain::on_disk();
    let lp = address(1);
    let trader = address(2);
    let pool_id = dusd_pool(&mut chain, &lp, 0);
    assert_eq!(chain.store().get_token_or_err(pool_id).unwrap().symbol, "DUSD-DFI");

    let fee_pct = format!("v0/poolpairs/{}/token_a_fee_pct", pool_id);
    let fee_direction = format!("v0/poolpairs/{}/token_a_fee_direction", pool_id);
    let txs = vec![
        chain.set_gov(&[(fee_pct.as_str(), "0.05"), (fee_direction.as_str(), "in")]),
        chain.fund(&trader, COIN),
    ];
    chain.mine_ok(txs);

    // DFI in, DUSD out: the fee only applies when DUSD is the input
    let tx = swap(&mut chain, &trader, NATIVE_TOKEN, COIN, DUSD);
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.balance(&trader, DUSD), 990_099_009);
    assert_eq!(chain.balance(&trader, NATIVE_TOKEN), 0);
    let pool = chain.store().get_pool_or_err(pool_id).unwrap();
    assert_eq!(pool.reserve_b, 101 * COIN);
    // the truncated output leaves one satoshi of DUSD that is burnt
    assert_eq!(pool.reserve_a, 1000 * COIN - 990_099_009 - 1);
    assert_eq!(attributes::get_live(chain.store(), LiveAttribute::DexFeeTokens).unwrap().get(DUSD), 1);

    let tx = swap(&mut chain, &trader, DUSD, 990_099_009, NATIVE_TOKEN);
    chain.mine_ok(vec![tx]);
    let fee = attributes::get_live(chain.store(), LiveAttribute::DexFeeTokens).unwrap().get(DUSD);
    assert_eq!(fee, 990_099_009 * 5 / 100 + 1);
    assert!(chain.balance(&trader, NATIVE_TOKEN) < COIN);
    chain.assert_conservation();
}

#[test]
fn test_composite_swap_crosses_two_pools() {
    let mut chain = TestChain::on_disk();
    let lp = address(1);
    let trader = address(2);
    let dusd_pool_id = dusd_pool(&mut chain, &lp, 0);

    let txs = vec![chain.create_dat("BTC"), chain.fund(&lp, 1000 * COIN)];
    chain.mine_ok(txs);
    let txs = vec![chain.mint(&lp, BTC, 10 * COIN), chain.mint(&trader, BTC, COIN)];
    chain.mine_ok(txs);
    let txs = vec![create_pool(&mut chain, BTC, NATIVE_TOKEN, COIN / 1000)];
    chain.mine_ok(txs);
    let tx = add_liquidity(&mut chain, &lp, (BTC, 10 * COIN), (NATIVE_TOKEN, 1000 * COIN));
    chain.mine_ok(vec![tx]);
    let (btc_pool_id, _) = chain.store().get_pool_by_pair(BTC, NATIVE_TOKEN).unwrap().unwrap();

    // the direct pool does not exist
    let tx = swap(&mut chain, &trader, BTC, COIN, DUSD);
    let result = chain.mine(vec![tx]);
    assert!(matches!(&result.txs[0], TxOutcome::Rejected { kind: ErrorKind::NotFound, .. }));

    let tx = composite_swap(&mut chain, &trader, BTC, COIN, DUSD);
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.balance(&trader, BTC), 0);
    let received = chain.balance(&trader, DUSD);
    assert!(received > 0);

    let btc_pool = chain.store().get_pool_or_err(btc_pool_id).unwrap();
    let dusd_pool = chain.store().get_pool_or_err(dusd_pool_id).unwrap();
    // the commission waits in the reward escrow of the pool
    assert_eq!(btc_pool.reserve_a, 11 * COIN - COIN / 1000);
    assert_eq!(btc_pool.reward_escrow.get(BTC), COIN / 1000);
    assert!(btc_pool.reserve_b < 1000 * COIN);
    let burnt = attributes::get_live(chain.store(), LiveAttribute::DexFeeTokens).unwrap().get(DUSD);
    assert!(burnt <= 1);
    assert_eq!(dusd_pool.reserve_a, 1000 * COIN - received - burnt);
    chain.assert_conservation();
}

#[test]
fn test_pool_keeps_minimum_liquidity() {
    let mut chain = TestChain::on_disk();
    let lp = address(1);
    let pool_id = dusd_pool(&mut chain, &lp, 0);

    let shares = chain.balance(&lp, pool_id);
    let pool = chain.store().get_pool_or_err(pool_id).unwrap();
    assert_eq!(shares, pool.total_liquidity - MINIMUM_LIQUIDITY);

    let message = CustomTxMessage::RemovePoolLiquidity(RemovePoolLiquidityMessage {
        from: lp.clone(),
        amount: TokenAmount::new(pool_id, shares),
    });
    let tx = chain.tx(message, vec![lp.clone()]);
    chain.mine_ok(vec![tx]);

    let pool = chain.store().get_pool_or_err(pool_id).unwrap();
    assert_eq!(pool.total_liquidity, MINIMUM_LIQUIDITY);
    assert!(pool.reserve_a > 0 && pool.reserve_b > 0);
    assert_eq!(chain.balance(&lp, pool_id), 0);
    chain.assert_conservation();
}

#[test]
fn test_locked_token_rejects_swaps() {
    let mut chain = TestChain::on_disk();
    let lp = address(1);
    let trader = address(2);
    dusd_pool(&mut chain, &lp, 0);
    let txs = vec![chain.set_gov(&[("v0/locks/token/1", "true")]), chain.fund(&trader, COIN)];
    chain.mine_ok(txs);

    let tx = swap(&mut chain, &trader, NATIVE_TOKEN, COIN, DUSD);
    let result = chain.mine(vec![tx]);
    match &result.txs[0] {
        TxOutcome::Rejected { kind, message, .. } => {
            assert_eq!(*kind, ErrorKind::TokenLocked);
            assert!(message.starts_with("token-locked"));
        }
        other => panic!("swap of a locked token was applied: {:?}", other),
    }
    assert_eq!(chain.balance(&trader, NATIVE_TOKEN), COIN);

    let tx = chain.set_gov(&[("v0/locks/token/1", "false")]);
    chain.mine_ok(vec![tx]);
    let tx = swap(&mut chain, &trader, NATIVE_TOKEN, COIN, DUSD);
    chain.mine_ok(vec![tx]);
    assert!(chain.balance(&trader, DUSD) > 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Swapping there and back again never returns more than was sent
    #[test]
    fn test_round_trip_never_gains(amount in 1_000i64..=50 * COIN, commission in 0i64..=COIN / 100) {
        let mut chain = TestChain::in_memory();
        let lp = address(1);
        let trader = address(2);
        dusd_pool(&mut chain, &lp, commission);
        let tx = chain.mint(&trader, DUSD, amount);
        chain.mine_ok(vec![tx]);

        let tx = composite_swap(&mut chain, &trader, DUSD, amount, NATIVE_TOKEN);
        chain.mine_ok(vec![tx]);
        let received = chain.balance(&trader, NATIVE_TOKEN);
        prop_assume!(received > 0);

        let tx = composite_swap(&mut chain, &trader, NATIVE_TOKEN, received, DUSD);
        let result = chain.mine(vec![tx]);
        prop_assume!(result.rejected_count == 0);
        prop_assert!(chain.balance(&trader, DUSD) <= amount);
        prop_assert_eq!(chain.balance(&trader, NATIVE_TOKEN), 0);
        chain.assert_conservation();
    }
}
