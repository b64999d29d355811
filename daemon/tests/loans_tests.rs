//! Vault and auction integration tests
//!
//! The whole loan lifecycle is driven through custom transactions: oracle
//! feeds, collateral and loan token setup, vaults, loans, liquidation by the
//! end of block checks and the auction settlement.

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{address, TestChain};
use serde_json::json;
use tessera_common::{
    amount::{Amount, Balances, TokenAmount, TokenId, COIN, NATIVE_TOKEN},
    attributes::LiveAttribute,
    crypto::Hash,
    loan::VaultState,
    oracle::CurrencyPair,
    script::Script,
    transaction::{
        AppointOracleMessage, AuctionBidMessage, CreateVaultMessage, CustomTransaction, CustomTxMessage,
        DepositToVaultMessage, LoanSchemeMessage, SetCollateralTokenMessage, SetLoanTokenMessage,
        SetOracleDataMessage, TakeLoanMessage, TokenPrices,
    },
};
use tessera_daemon::{
    core::{
        attributes,
        blockchain::TxOutcome,
        error::ErrorKind,
        loans,
        storage::{prelude::*, StorageBackend},
    },
    rpc::RpcHandler,
};

// first DAT after DFI
const TSLA: TokenId = 1;

fn prices(entries: &[(&str, Amount)]) -> TokenPrices {
    entries
        .iter()
        .map(|(token, price)| (token.to_string(), BTreeMap::from([("USD".to_owned(), *price)])))
        .collect()
}

fn oracle_owner() -> Script {
    address(7)
}

fn feed<B: StorageBackend>(chain: &mut TestChain<B>, oracle_id: Hash, entries: &[(&str, Amount)]) -> CustomTransaction {
    let message = CustomTxMessage::SetOracleData(SetOracleDataMessage {
        oracle_id,
        // the block the feed lands in
        timestamp: chain.time + common::BLOCK_TIME,
        prices: prices(entries),
    });
    chain.tx(message, vec![oracle_owner()])
}

// DFI collateral at $10, TSLA loan token at $100 and a C150 scheme at 1%.
// Returns the oracle id.
fn setup_loans<B: StorageBackend>(chain: &mut TestChain<B>, owner: &Script) -> Hash {
    let foundation = chain.foundation();
    let pairs: BTreeSet<CurrencyPair> = [CurrencyPair::usd("DFI"), CurrencyPair::usd("TSLA")].into_iter().collect();
    let appoint = chain.tx(
        CustomTxMessage::AppointOracle(AppointOracleMessage {
            owner: oracle_owner(),
            weightage: 1,
            pairs,
        }),
        vec![foundation.clone()],
    );
    let oracle_id = appoint.hash;

    let prices = feed(chain, oracle_id, &[("DFI", 10 * COIN), ("TSLA", 100 * COIN)]);
    let collateral = chain.tx(
        CustomTxMessage::SetCollateralToken(SetCollateralTokenMessage {
            token_id: NATIVE_TOKEN,
            factor: COIN,
            fixed_interval_price_id: CurrencyPair::usd("DFI"),
            activate_after_block: 0,
        }),
        vec![foundation.clone()],
    );
    let scheme = chain.tx(
        CustomTxMessage::LoanScheme(LoanSchemeMessage {
            identifier: "C150".to_owned(),
            ratio: 150,
            rate: COIN,
            update_height: 0,
        }),
        vec![foundation.clone()],
    );
    let loan_token = chain.tx(
        CustomTxMessage::SetLoanToken(SetLoanTokenMessage {
            symbol: "TSLA".to_owned(),
            name: "Tesla".to_owned(),
            fixed_interval_price_id: CurrencyPair::usd("TSLA"),
            mintable: true,
            interest: 0,
        }),
        vec![foundation],
    );
    let fund = chain.fund(owner, 1_000 * COIN);
    chain.mine_ok(vec![appoint, prices, collateral, scheme, loan_token, fund]);
    oracle_id
}

// Opens a vault on the default scheme and deposits DFI into it
fn open_vault<B: StorageBackend>(chain: &mut TestChain<B>, owner: &Script, collateral: Amount) -> Hash {
    let fee = chain.chain.params().vault_creation_fee;
    let create = chain
        .tx(
            CustomTxMessage::Vault(CreateVaultMessage {
                owner: owner.clone(),
                scheme_id: String::new(),
            }),
            Vec::new(),
        )
        .with_burnt_value(fee);
    let vault_id = create.hash;
    let deposit = chain.tx(
        CustomTxMessage::DepositToVault(DepositToVaultMessage {
            vault_id,
            from: owner.clone(),
            amount: TokenAmount::new(NATIVE_TOKEN, collateral),
        }),
        vec![owner.clone()],
    );
    chain.mine_ok(vec![create, deposit]);
    vault_id
}

fn take_loan<B: StorageBackend>(chain: &mut TestChain<B>, vault_id: Hash, owner: &Script, amount: Amount) -> CustomTransaction {
    chain.tx(
        CustomTxMessage::TakeLoan(TakeLoanMessage {
            vault_id,
            to: Script::empty(),
            amounts: Balances::from_single(TSLA, amount),
        }),
        vec![owner.clone()],
    )
}

fn bid<B: StorageBackend>(chain: &mut TestChain<B>, vault_id: Hash, from: &Script, amount: Amount) -> CustomTransaction {
    chain.tx(
        CustomTxMessage::AuctionBid(AuctionBidMessage {
            vault_id,
            index: 0,
            from: from.clone(),
            amount: TokenAmount::new(TSLA, amount),
        }),
        vec![from.clone()],
    )
}

fn state<B: StorageBackend>(chain: &TestChain<B>, vault_id: &Hash) -> VaultState {
    let ctx = chain.chain.tip_context().unwrap();
    loans::vault_state(chain.store(), &ctx, vault_id).unwrap()
}

fn rejection(outcome: &TxOutcome) -> ErrorKind {
    match outcome {
        TxOutcome::Rejected { kind, .. } => *kind,
        other => panic!("transaction was applied: {:?}", other),
    }
}

#[test]
fn test_liquidation_and_auction() {
    let mut chain = TestChain::on_disk();
    let owner = address(1);
    let oracle_id = setup_loans(&mut chain, &owner);
    // $1005 of collateral
    let vault_id = open_vault(&mut chain, &owner, 10_050_000_000);
    assert_eq!(chain.height, 2);

    // $668.896 of loan keeps the vault just above 150%
    let tx = take_loan(&mut chain, vault_id, &owner, 668_896_000);
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.balance(&owner, TSLA), 668_896_000);
    assert_eq!(state(&chain, &vault_id), VaultState::Active);

    let tx = feed(&mut chain, oracle_id, &[("DFI", 10 * COIN), ("TSLA", 101 * COIN)]);
    chain.mine_ok(vec![tx]);

    // $101 is only the next price after the first interval
    chain.mine_until(6);
    assert_eq!(state(&chain, &vault_id), VaultState::MayLiquidate);
    assert!(chain.store().get_auction(&vault_id).unwrap().is_none());

    chain.mine_until(12);
    assert_eq!(state(&chain, &vault_id), VaultState::InLiquidation);
    let batches = chain.store().list_auction_batches(&vault_id).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].collaterals.get(NATIVE_TOKEN), 10_050_000_000);
    assert_eq!(batches[0].loan_amount.amount, 668_896_000);
    let interest = batches[0].loan_interest;
    assert!(interest > 0);
    chain.assert_conservation();

    let first = address(8);
    let second = address(9);
    let txs = vec![chain.mint(&first, TSLA, 10 * COIN), chain.mint(&second, TSLA, 10 * COIN)];
    chain.mine_ok(txs);

    // below the debt plus the 5% penalty
    let tx = bid(&mut chain, vault_id, &first, 7 * COIN);
    let result = chain.mine(vec![tx]);
    assert_eq!(rejection(&result.txs[0]), ErrorKind::AmountOutOfRange);

    let tx = bid(&mut chain, vault_id, &first, 8 * COIN);
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.balance(&first, TSLA), 2 * COIN);

    // less than 1% above the current bid
    let tx = bid(&mut chain, vault_id, &second, 805_000_000);
    let result = chain.mine(vec![tx]);
    assert_eq!(rejection(&result.txs[0]), ErrorKind::AmountOutOfRange);

    let tx = bid(&mut chain, vault_id, &second, 9 * COIN);
    chain.mine_ok(vec![tx]);
    // the outbid amount is refunded
    assert_eq!(chain.balance(&first, TSLA), 10 * COIN);
    chain.assert_conservation();

    let end = 12 + chain.chain.params().auction_duration;
    chain.mine_until(end - 1);
    assert!(chain.store().get_auction(&vault_id).unwrap().is_some());
    chain.mine_until(end);

    assert_eq!(chain.balance(&second, NATIVE_TOKEN), 10_050_000_000);
    let debt = 668_896_000 + interest;
    let penalty = debt * 5 / 100;
    let excess = 9 * COIN - debt - penalty;
    assert_eq!(chain.balance(&owner, TSLA), 668_896_000 + excess);
    assert_eq!(
        attributes::get_live(chain.store(), LiveAttribute::AuctionBurn).unwrap().get(TSLA),
        interest + penalty
    );
    assert!(chain.store().get_auction(&vault_id).unwrap().is_none());
    assert!(chain.store().get_vault_loans(&vault_id).unwrap().is_empty());
    assert_eq!(state(&chain, &vault_id), VaultState::Active);
    chain.assert_conservation();
}

#[test]
fn test_price_deviation_freezes_vault() {
    let mut chain = TestChain::on_disk();
    let owner = address(1);
    let oracle_id = setup_loans(&mut chain, &owner);
    let vault_id = open_vault(&mut chain, &owner, 100 * COIN);

    // doubling the price is beyond the deviation threshold
    let tx = feed(&mut chain, oracle_id, &[("DFI", 10 * COIN), ("TSLA", 200 * COIN)]);
    chain.mine_ok(vec![tx]);
    chain.mine_until(6);

    let tx = take_loan(&mut chain, vault_id, &owner, COIN);
    let result = chain.mine(vec![tx]);
    match &result.txs[0] {
        TxOutcome::Rejected { kind, message, .. } => {
            assert_eq!(*kind, ErrorKind::PriceInvalid);
            assert!(message.starts_with("price-invalid"));
        }
        other => panic!("loan against an invalid price was applied: {:?}", other),
    }
    assert_eq!(chain.balance(&owner, TSLA), 0);

    let handler = RpcHandler::new();
    let info = handler
        .call(&chain.chain, "getVault", json!({ "vaultId": vault_id.to_hex() }))
        .unwrap();
    assert_eq!(info["state"], "frozen");
    assert_eq!(info["collateralValue"], -1);
    assert_eq!(info["collateralRatio"], -1);
    assert_eq!(info["nextCollateralRatio"], -1);

    // both slots agree again one interval later
    chain.mine_until(12);
    assert_eq!(state(&chain, &vault_id), VaultState::Active);
    let tx = take_loan(&mut chain, vault_id, &owner, COIN);
    chain.mine_ok(vec![tx]);
    assert_eq!(chain.balance(&owner, TSLA), COIN);
    chain.assert_conservation();
}

#[test]
fn test_vault_needs_exact_fee() {
    let mut chain = TestChain::in_memory();
    let owner = address(1);
    setup_loans(&mut chain, &owner);

    let fee = chain.chain.params().vault_creation_fee;
    let tx = chain
        .tx(
            CustomTxMessage::Vault(CreateVaultMessage {
                owner: owner.clone(),
                scheme_id: String::new(),
            }),
            Vec::new(),
        )
        .with_burnt_value(fee - 1);
    let result = chain.mine(vec![tx]);
    assert_eq!(rejection(&result.txs[0]), ErrorKind::InvalidParameter);
    assert!(chain.store().list_vaults().unwrap().is_empty());

    // only the owner may borrow against a vault
    let vault_id = open_vault(&mut chain, &owner, 100 * COIN);
    let stranger = address(3);
    let tx = take_loan(&mut chain, vault_id, &stranger, COIN);
    let result = chain.mine(vec![tx]);
    assert_eq!(rejection(&result.txs[0]), ErrorKind::AuthorizationFailed);
    chain.assert_conservation();
}
