//! Governance integration tests
//!
//! Masternodes are announced through block events and mint blocks, proposals
//! and votes are custom transactions, and cycles close at the end of the
//! block reaching their end height.

mod common;

use common::{address, TestChain};
use tessera_common::{
    amount::{Amount, COIN, NATIVE_TOKEN},
    crypto::Hash,
    governance::{MasternodeId, ProposalId, ProposalStatus, VoteDecision},
    script::Script,
    transaction::{CreateProposalMessage, CustomTransaction, CustomTxMessage, VoteMessage},
};
use tessera_daemon::core::{
    blockchain::{MasternodeEvent, TxOutcome},
    error::ErrorKind,
    governance,
    storage::{prelude::*, StorageBackend},
};

fn masternode(seed: u8) -> MasternodeId {
    Hash::new([seed; 32])
}

fn owner_of(seed: u8) -> Script {
    address(10 + seed)
}

fn operator_of(seed: u8) -> Script {
    address(20 + seed)
}

// Registers masternodes 1..=count, turns governance on and fills the
// community fund, then lets every masternode mint one block
fn setup_governance<B: StorageBackend>(chain: &mut TestChain<B>, count: u8, proposer: &Script) {
    let community_fund = chain.chain.params().community_fund.clone();
    let txs = vec![
        chain.set_gov(&[("v0/params/feature/gov", "true"), ("v0/params/feature/gov-payout", "true")]),
        chain.fund(&community_fund, 1_000 * COIN),
        chain.fund(proposer, 100 * COIN),
    ];
    let mut block = chain.next_block().with_txs(txs);
    for seed in 1..=count {
        block = block.with_masternode_event(MasternodeEvent::Register {
            id: masternode(seed),
            owner: owner_of(seed),
            operator: operator_of(seed),
        });
    }
    chain.apply(block);

    for seed in 1..=count {
        mint_by(chain, seed, Vec::new());
    }
}

fn mint_by<B: StorageBackend>(chain: &mut TestChain<B>, seed: u8, txs: Vec<CustomTransaction>) {
    let block = chain.next_block().with_txs(txs).with_minter(masternode(seed));
    let result = chain.apply(block);
    assert_eq!(result.rejected_count, 0, "rejected at height {}: {:?}", result.height, result.txs);
}

fn cfp<B: StorageBackend>(chain: &mut TestChain<B>, payout: &Script, amount: Amount, fee: Amount) -> CustomTransaction {
    let message = CustomTxMessage::CreateCfp(CreateProposalMessage {
        payout_address: payout.clone(),
        amount,
        cycles: 1,
        title: "Fund the explorer".to_owned(),
        context: "https://github.com/tessera/explorer".to_owned(),
        context_hash: String::new(),
        emergency: false,
    });
    chain.tx(message, Vec::new()).with_burnt_value(fee)
}

fn vote<B: StorageBackend>(chain: &mut TestChain<B>, proposal_id: ProposalId, seed: u8, decision: VoteDecision) -> CustomTransaction {
    let message = CustomTxMessage::Vote(VoteMessage {
        proposal_id,
        masternode_id: masternode(seed),
        decision,
    });
    chain.tx(message, vec![operator_of(seed)])
}

fn status<B: StorageBackend>(chain: &TestChain<B>, id: &ProposalId) -> ProposalStatus {
    chain.store().get_proposal_or_err(id).unwrap().status
}

#[test]
fn test_approved_cfp_is_paid() {
    let mut chain = TestChain::on_disk();
    let proposer = address(1);
    let payout = address(2);
    setup_governance(&mut chain, 3, &proposer);

    // 1% of 100 DFI is below the 10 DFI minimum
    let tx = cfp(&mut chain, &payout, 100 * COIN, 10 * COIN);
    let proposal_id = tx.hash;
    mint_by(&mut chain, 1, vec![tx]);
    let proposal = chain.store().get_proposal_or_err(&proposal_id).unwrap();
    assert_eq!(proposal.status, ProposalStatus::Voting);
    let end = proposal.cycle_end_height;
    assert!(end > chain.height);

    let txs = vec![
        vote(&mut chain, proposal_id, 1, VoteDecision::Yes),
        vote(&mut chain, proposal_id, 2, VoteDecision::Yes),
        vote(&mut chain, proposal_id, 3, VoteDecision::No),
    ];
    mint_by(&mut chain, 2, txs);

    chain.mine_until(end - 1);
    assert_eq!(status(&chain, &proposal_id), ProposalStatus::Voting);
    chain.mine_until(end);
    assert_eq!(status(&chain, &proposal_id), ProposalStatus::Completed);

    assert_eq!(chain.balance(&payout, NATIVE_TOKEN), 100 * COIN);
    let community_fund = chain.chain.params().community_fund.clone();
    assert_eq!(chain.balance(&community_fund, NATIVE_TOKEN), 900 * COIN);
    chain.assert_conservation();
}

#[test]
fn test_later_vote_replaces_earlier() {
    let mut chain = TestChain::on_disk();
    let proposer = address(1);
    let payout = address(2);
    setup_governance(&mut chain, 2, &proposer);

    let tx = cfp(&mut chain, &payout, 100 * COIN, 10 * COIN);
    let proposal_id = tx.hash;
    mint_by(&mut chain, 1, vec![tx]);

    let txs = vec![
        vote(&mut chain, proposal_id, 1, VoteDecision::Yes),
        vote(&mut chain, proposal_id, 2, VoteDecision::Yes),
    ];
    mint_by(&mut chain, 2, txs);
    let txs = vec![
        vote(&mut chain, proposal_id, 1, VoteDecision::No),
        vote(&mut chain, proposal_id, 2, VoteDecision::No),
    ];
    mint_by(&mut chain, 1, txs);

    let tally = governance::tally(chain.store(), &proposal_id, 1, chain.height).unwrap();
    assert_eq!(tally.yes, 0);
    assert_eq!(tally.no, 2);
    assert_eq!(tally.masternodes, 2);

    let end = chain.store().get_proposal_or_err(&proposal_id).unwrap().cycle_end_height;
    chain.mine_until(end);
    assert_eq!(status(&chain, &proposal_id), ProposalStatus::Rejected);
    assert_eq!(chain.balance(&payout, NATIVE_TOKEN), 0);
    chain.assert_conservation();
}

#[test]
fn test_vote_rules() {
    let mut chain = TestChain::on_disk();
    let proposer = address(1);
    let payout = address(2);
    setup_governance(&mut chain, 2, &proposer);

    // the fee has to match exactly
    let tx = cfp(&mut chain, &payout, 100 * COIN, 5 * COIN);
    let result = chain.mine(vec![tx]);
    assert!(matches!(&result.txs[0], TxOutcome::Rejected { kind: ErrorKind::InvalidParameter, .. }));

    let tx = cfp(&mut chain, &payout, 100 * COIN, 10 * COIN);
    let proposal_id = tx.hash;
    chain.mine_ok(vec![tx]);

    // signed by the owner instead of the operator
    let message = CustomTxMessage::Vote(VoteMessage {
        proposal_id,
        masternode_id: masternode(1),
        decision: VoteDecision::Yes,
    });
    let tx = chain.tx(message, vec![owner_of(1)]);
    let result = chain.mine(vec![tx]);
    assert!(matches!(&result.txs[0], TxOutcome::Rejected { kind: ErrorKind::AuthorizationFailed, .. }));

    // past the activation window a masternode that stopped minting may not vote
    let window = chain.chain.params().gov.activation_window;
    let last_minted = chain.store().get_masternode_or_err(&masternode(2)).unwrap().last_minted_height.unwrap();
    chain.mine_until(last_minted + window + 1);
    let tx = vote(&mut chain, proposal_id, 2, VoteDecision::Yes);
    let result = chain.mine(vec![tx]);
    assert!(matches!(&result.txs[0], TxOutcome::Rejected { kind: ErrorKind::InvalidState, .. }));

    // minting again restores the right to vote
    let tx = vote(&mut chain, proposal_id, 2, VoteDecision::Yes);
    mint_by(&mut chain, 2, vec![tx]);
    let tally = governance::tally(chain.store(), &proposal_id, 1, chain.height).unwrap();
    assert_eq!(tally.yes, 1);
}

#[test]
fn test_governance_needs_feature() {
    let mut chain = TestChain::in_memory();
    let proposer = address(1);
    let txs = vec![chain.fund(&proposer, 100 * COIN)];
    chain.mine_ok(txs);

    let tx = cfp(&mut chain, &address(2), 100 * COIN, 10 * COIN);
    let result = chain.mine(vec![tx]);
    assert!(matches!(&result.txs[0], TxOutcome::Rejected { kind: ErrorKind::FeatureDisabled, .. }));
    assert!(chain.store().list_proposals().unwrap().is_empty());
}
