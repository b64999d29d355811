// Governance
//
// Community fund proposals and votes of confidence are voted on by
// masternodes in fixed length cycles. The tally runs at the end of the block
// closing a cycle. Masternodes themselves are registered by the block
// processor through the hooks at the bottom of this module.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use serde::Serialize;
use tessera_common::{
    amount::{mul_div, multiply_amounts, Amount, Balances, TokenAmount, COIN, NATIVE_TOKEN},
    attributes::{AttributeKey, Feature, GovAttribute, LiveAttribute},
    crypto::Hash,
    governance::{
        Masternode, MasternodeId, Proposal, ProposalId, ProposalKind, ProposalStatus, VoteDecision,
        MAX_PROPOSAL_CONTEXT_HASH_LENGTH, MAX_PROPOSAL_CONTEXT_LENGTH, MAX_PROPOSAL_TITLE_LENGTH,
    },
    history::EngineEvent,
    script::Script,
    transaction::{CreateProposalMessage, VoteMessage},
};

use super::{
    accounts, attributes,
    context::{BlockContext, TxContext},
    error::BlockchainError,
    hard_fork::HardFork,
    history,
    storage::Storage,
};

/// Vote counts of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub yes: u32,
    pub no: u32,
    pub neutral: u32,
    // Masternodes able to vote when the cycle closed
    pub masternodes: u32,
}

impl Tally {
    pub fn votes(&self) -> u32 {
        self.yes + self.no + self.neutral
    }

    // Every vote counts toward the quorum
    pub fn has_quorum(&self, quorum: Amount) -> bool {
        self.masternodes > 0 && self.votes() as i128 * COIN as i128 >= quorum as i128 * self.masternodes as i128
    }

    pub fn is_approved(&self, threshold: Amount, exclude_neutral: bool) -> bool {
        let counted = if exclude_neutral {
            self.yes + self.no
        } else {
            self.votes()
        };
        counted > 0 && self.yes as i128 * COIN as i128 >= threshold as i128 * counted as i128
    }
}

fn validate_text(message: &CreateProposalMessage) -> Result<(), BlockchainError> {
    if message.title.is_empty() {
        return Err(BlockchainError::InvalidParameter("Proposal title cannot be empty".to_owned()));
    }
    if message.title.len() > MAX_PROPOSAL_TITLE_LENGTH {
        return Err(BlockchainError::InvalidParameter(format!(
            "Proposal title cannot be more than {} bytes",
            MAX_PROPOSAL_TITLE_LENGTH
        )));
    }
    if message.context.is_empty() || message.context.len() > MAX_PROPOSAL_CONTEXT_LENGTH {
        return Err(BlockchainError::InvalidParameter(format!(
            "Proposal context must be between 1 and {} bytes",
            MAX_PROPOSAL_CONTEXT_LENGTH
        )));
    }
    if message.context_hash.len() > MAX_PROPOSAL_CONTEXT_HASH_LENGTH {
        return Err(BlockchainError::InvalidParameter(format!(
            "Proposal context hash cannot be more than {} bytes",
            MAX_PROPOSAL_CONTEXT_HASH_LENGTH
        )));
    }
    Ok(())
}

/// Fee a proposal creation must burn.
pub fn proposal_fee<S: Storage>(
    storage: &S,
    ctx: &BlockContext,
    kind: ProposalKind,
    amount: Amount,
) -> Result<Amount, BlockchainError> {
    let gov = &ctx.params.gov;
    Ok(match kind {
        ProposalKind::CommunityFundProposal => {
            let pct = attributes::gov_amount(storage, GovAttribute::CfpFee, gov.cfp_fee)?;
            multiply_amounts(amount, pct)?.max(gov.cfp_min_fee)
        }
        ProposalKind::VoteOfConfidence => attributes::gov_amount(storage, GovAttribute::VocFee, gov.voc_fee)?,
        ProposalKind::EmergencyVoteOfConfidence => {
            attributes::gov_amount(storage, GovAttribute::VocEmergencyFee, gov.emergency_fee)?
        }
    })
}

fn voting_period<S: Storage>(storage: &S, ctx: &BlockContext, kind: ProposalKind) -> Result<u32, BlockchainError> {
    let period = if kind.is_emergency() {
        attributes::gov_integer(storage, GovAttribute::VocEmergencyPeriod, ctx.params.gov.emergency_period as u64)?
    } else {
        attributes::gov_integer(storage, GovAttribute::VotingPeriod, ctx.params.gov.voting_period as u64)?
    };
    u32::try_from(period.max(1)).map_err(|_| BlockchainError::InvalidState(format!("Invalid voting period {}", period)))
}

// Regular cycles end on multiples of the period, with at least half a period
// left to vote. Emergency votes run for one full period from creation.
fn first_cycle_end(height: u32, period: u32, emergency: bool) -> u32 {
    if emergency {
        return height + period;
    }
    let end = height + (period - height % period);
    if end - height < period / 2 {
        end + period
    } else {
        end
    }
}

/// Creates a CFP or a VoC. `fee` is the native value burnt by the
/// transaction.
pub fn create_proposal<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    tx_hash: &Hash,
    cfp: bool,
    message: &CreateProposalMessage,
    fee: Amount,
) -> Result<ProposalId, BlockchainError> {
    attributes::ensure_feature(storage, Feature::Gov)?;
    validate_text(message)?;

    let kind = match (cfp, message.emergency) {
        (true, true) => {
            return Err(BlockchainError::InvalidParameter(
                "Community fund proposals cannot be emergencies".to_owned(),
            ))
        }
        (true, false) => ProposalKind::CommunityFundProposal,
        (false, true) => ProposalKind::EmergencyVoteOfConfidence,
        (false, false) => ProposalKind::VoteOfConfidence,
    };

    let cycles = if kind.is_cfp() {
        if message.amount <= 0 {
            return Err(BlockchainError::InvalidAmount(message.amount));
        }
        if message.payout_address.is_empty() {
            return Err(BlockchainError::InvalidParameter("Payout address cannot be empty".to_owned()));
        }
        let max_cycles = attributes::gov_integer(storage, GovAttribute::CfpMaxCycles, ctx.params.gov.cfp_max_cycles as u64)?;
        if message.cycles == 0 || message.cycles as u64 > max_cycles {
            return Err(BlockchainError::InvalidParameter(format!(
                "Proposal cycles must be between 1 and {}",
                max_cycles
            )));
        }
        message.cycles
    } else {
        if message.amount != 0 {
            return Err(BlockchainError::InvalidAmount(message.amount));
        }
        if message.cycles > 1 {
            return Err(BlockchainError::InvalidParameter(
                "Votes of confidence run for a single cycle".to_owned(),
            ));
        }
        1
    };

    let required = proposal_fee(storage, ctx, kind, message.amount)?;
    if fee != required {
        return Err(BlockchainError::InvalidParameter(format!(
            "Proposal fee must be {}, got {}",
            required, fee
        )));
    }
    if storage.get_proposal(tx_hash)?.is_some() {
        return Err(BlockchainError::ProposalExists(*tx_hash));
    }

    let gov = &ctx.params.gov;
    let period = voting_period(storage, ctx, kind)?;
    let cycle_end_height = first_cycle_end(ctx.height, period, kind.is_emergency());
    let (quorum, approval_threshold) = match kind {
        ProposalKind::CommunityFundProposal => (
            attributes::gov_amount(storage, GovAttribute::Quorum, gov.quorum)?,
            attributes::gov_amount(storage, GovAttribute::CfpApprovalThreshold, gov.cfp_approval_threshold)?,
        ),
        ProposalKind::VoteOfConfidence => (
            attributes::gov_amount(storage, GovAttribute::Quorum, gov.quorum)?,
            attributes::gov_amount(storage, GovAttribute::VocApprovalThreshold, gov.voc_approval_threshold)?,
        ),
        ProposalKind::EmergencyVoteOfConfidence => (
            attributes::gov_amount(storage, GovAttribute::VocEmergencyQuorum, gov.emergency_quorum)?,
            attributes::gov_amount(
                storage,
                GovAttribute::VocEmergencyApprovalThreshold,
                gov.emergency_approval_threshold,
            )?,
        ),
    };

    // the part of the fee that is not burnt waits for the voters
    let redistribute = attributes::get_bool(storage, &AttributeKey::Gov(GovAttribute::FeeRedistribution), false)?;
    let burnt = if redistribute {
        let pct = attributes::gov_amount(storage, GovAttribute::FeeBurnPct, gov.fee_burn_pct)?;
        multiply_amounts(fee, pct)?
    } else {
        fee
    };
    accounts::add_minted(storage, TokenAmount::new(NATIVE_TOKEN, fee))?;
    accounts::credit_burn(
        storage,
        ctx,
        TokenAmount::new(NATIVE_TOKEN, burnt),
        Some(LiveAttribute::ProposalFeeBurn),
    )?;

    let proposal = Proposal {
        kind,
        title: message.title.clone(),
        context: message.context.clone(),
        context_hash: message.context_hash.clone(),
        amount: message.amount,
        cycles,
        payout_address: message.payout_address.clone(),
        creation_height: ctx.height,
        current_cycle: 1,
        cycle_end_height,
        proposal_end_height: cycle_end_height + (cycles as u32 - 1) * period,
        voting_period: period,
        status: ProposalStatus::Voting,
        fee,
        fee_redistribution: fee - burnt,
        quorum,
        approval_threshold,
        paid: 0,
    };
    storage.set_proposal(tx_hash, &proposal)?;
    metrics::counter!("tessera_proposals_created").increment(1);
    info!(
        "created {} {} '{}' ending cycle 1 at {}",
        proposal.kind, tx_hash, proposal.title, cycle_end_height
    );
    Ok(*tx_hash)
}

/// A masternode may vote when it is active and minted a block within the
/// activation window.
pub fn is_eligible_voter(masternode: &Masternode, ctx: &BlockContext) -> bool {
    if !masternode.is_active(ctx.height) {
        return false;
    }
    masternode
        .last_minted_height
        .is_some_and(|minted| ctx.height.saturating_sub(minted) <= ctx.params.gov.activation_window)
}

/// Records the vote of a masternode for the current cycle, replacing any
/// earlier vote of the same cycle. Operator authorization is checked by the
/// caller.
pub fn vote<S: Storage>(storage: &mut S, tx: &TxContext, message: &VoteMessage) -> Result<(), BlockchainError> {
    let ctx = &tx.block;
    attributes::ensure_feature(storage, Feature::Gov)?;
    let proposal = storage.get_proposal_or_err(&message.proposal_id)?;
    if proposal.status != ProposalStatus::Voting {
        return Err(BlockchainError::InvalidState(format!(
            "Proposal {} is not in voting period",
            message.proposal_id
        )));
    }
    if ctx.height > proposal.cycle_end_height {
        return Err(BlockchainError::InvalidState(format!(
            "Voting cycle of proposal {} is over",
            message.proposal_id
        )));
    }

    let masternode = storage.get_masternode_or_err(&message.masternode_id)?;
    if !is_eligible_voter(&masternode, ctx) {
        return Err(BlockchainError::InvalidState(format!(
            "Masternode {} is not active or has not minted a block recently",
            message.masternode_id
        )));
    }

    storage.set_vote(&message.proposal_id, proposal.current_cycle, &message.masternode_id, message.decision)?;
    history::record_vote(storage, tx, &message.masternode_id, &masternode.owner, proposal.current_cycle)?;
    debug!(
        "masternode {} voted {} on {} cycle {}",
        message.masternode_id, message.decision, message.proposal_id, proposal.current_cycle
    );
    Ok(())
}

/// Counts the votes of a cycle against the masternodes active at `height`.
pub fn tally<S: Storage>(storage: &S, id: &ProposalId, cycle: u8, height: u32) -> Result<Tally, BlockchainError> {
    let mut tally = Tally {
        masternodes: storage
            .list_masternodes()?
            .iter()
            .filter(|(_, masternode)| masternode.is_active(height))
            .count() as u32,
        ..Default::default()
    };
    for (_, decision) in storage.get_votes(id, cycle)? {
        match decision {
            VoteDecision::Yes => tally.yes += 1,
            VoteDecision::No => tally.no += 1,
            VoteDecision::Neutral => tally.neutral += 1,
        }
    }
    Ok(tally)
}

// Pays the held part of the creation fee to the owners of every masternode
// that voted, the rounding remainder is burnt
fn redistribute_fee<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    id: &ProposalId,
    proposal: &Proposal,
) -> Result<(), BlockchainError> {
    if proposal.fee_redistribution == 0 {
        return Ok(());
    }
    let mut voters = BTreeSet::new();
    for cycle in 1..=proposal.current_cycle {
        for (masternode_id, _) in storage.get_votes(id, cycle)? {
            voters.insert(masternode_id);
        }
    }

    let mut owners: Vec<Script> = Vec::with_capacity(voters.len());
    for masternode_id in voters {
        match storage.get_masternode(&masternode_id)? {
            Some(masternode) => owners.push(masternode.owner),
            None => warn!("voter {} of proposal {} is no longer registered", masternode_id, id),
        }
    }

    let mut paid = 0;
    if !owners.is_empty() {
        let share = proposal.fee_redistribution / owners.len() as Amount;
        for owner in owners.iter() {
            accounts::credit(storage, owner, TokenAmount::new(NATIVE_TOKEN, share))?;
            history::record_engine(
                storage,
                ctx,
                EngineEvent::FeeRedistribution,
                owner,
                Balances::from_single(NATIVE_TOKEN, share),
            )?;
            paid += share;
        }
    }
    accounts::credit_burn(
        storage,
        ctx,
        TokenAmount::new(NATIVE_TOKEN, proposal.fee_redistribution - paid),
        Some(LiveAttribute::ProposalFeeBurn),
    )
}

// Moves the installment of the cycle from the community fund
fn pay_installment<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    proposal: &mut Proposal,
) -> Result<bool, BlockchainError> {
    let payout = proposal.cycle_payout(proposal.current_cycle);
    if payout == 0 || !attributes::is_feature_enabled(storage, Feature::GovPayout)? {
        return Ok(true);
    }
    let fund = &ctx.params.community_fund;
    if storage.get_balance(fund, NATIVE_TOKEN)? < payout {
        warn!("community fund cannot pay {} to proposal '{}'", payout, proposal.title);
        return Ok(false);
    }
    accounts::transfer(storage, fund, &proposal.payout_address, TokenAmount::new(NATIVE_TOKEN, payout))?;
    history::record_engine(
        storage,
        ctx,
        EngineEvent::ProposalPayout,
        &proposal.payout_address,
        Balances::from_single(NATIVE_TOKEN, payout),
    )?;
    proposal.paid += payout;
    Ok(true)
}

fn close_cycle<S: Storage>(storage: &mut S, ctx: &BlockContext, id: &ProposalId) -> Result<(), BlockchainError> {
    let mut proposal = storage.get_proposal_or_err(id)?;
    if proposal.status != ProposalStatus::Voting {
        return Ok(());
    }

    let tally = tally(storage, id, proposal.current_cycle, ctx.height)?;
    let exclude_neutral = ctx.is_active(HardFork::NextNetworkUpgrade);
    let approved = tally.has_quorum(proposal.quorum) && tally.is_approved(proposal.approval_threshold, exclude_neutral);
    info!(
        "proposal {} cycle {}: {} yes {} no {} neutral of {} masternodes, {}",
        id,
        proposal.current_cycle,
        tally.yes,
        tally.no,
        tally.neutral,
        tally.masternodes,
        if approved { "approved" } else { "rejected" }
    );

    let funded = approved && pay_installment(storage, ctx, &mut proposal)?;
    if !funded {
        proposal.status = ProposalStatus::Rejected;
    } else if proposal.current_cycle >= proposal.cycles {
        proposal.status = ProposalStatus::Completed;
    } else {
        // later cycles are voted again from scratch, on the schedule set at creation
        proposal.current_cycle += 1;
        let remaining = (proposal.cycles - proposal.current_cycle) as u32 * proposal.voting_period;
        proposal.cycle_end_height = (proposal.proposal_end_height - remaining).max(ctx.height + 1);
    }

    if proposal.status != ProposalStatus::Voting {
        redistribute_fee(storage, ctx, id, &proposal)?;
        metrics::counter!("tessera_proposals_closed", "status" => proposal.status.to_string()).increment(1);
    }
    storage.set_proposal(id, &proposal)
}

/// End of block tally of the cycles ending at this height. A proposal that
/// cannot be closed is rolled back and tallied again at the next height,
/// the block is not failed.
pub fn close_cycles<S: Storage>(storage: &mut S, ctx: &BlockContext) -> Result<usize, BlockchainError> {
    let mut closed = 0;
    for id in storage.get_proposals_ending_at(ctx.height)? {
        storage.start_snapshot()?;
        match close_cycle(storage, ctx, &id) {
            Ok(()) => {
                storage.end_snapshot(true)?;
                closed += 1;
            }
            Err(e) => {
                storage.end_snapshot(false)?;
                if let Some(mut proposal) = storage.get_proposal(&id)? {
                    if proposal.status == ProposalStatus::Voting {
                        proposal.cycle_end_height = ctx.height + 1;
                        storage.set_proposal(&id, &proposal)?;
                    }
                }
                warn!("cannot close cycle of proposal {}, retrying at {}: {}", id, ctx.height + 1, e);
            }
        }
    }
    Ok(closed)
}

/// Registers a masternode announced by the block processor.
pub fn register_masternode<S: Storage>(
    storage: &mut S,
    id: &MasternodeId,
    owner: Script,
    operator: Script,
    height: u32,
) -> Result<(), BlockchainError> {
    if storage.get_masternode(id)?.is_some() {
        return Err(BlockchainError::InvalidState(format!("Masternode {} already registered", id)));
    }
    if storage.get_masternode_by_operator(&operator)?.is_some() {
        return Err(BlockchainError::InvalidState(format!(
            "Operator {} already runs a masternode",
            operator
        )));
    }
    debug!("registering masternode {} at height {}", id, height);
    storage.set_masternode(
        id,
        &Masternode {
            owner,
            operator,
            creation_height: height,
            resign_height: None,
            minted_blocks: 0,
            last_minted_height: None,
        },
    )
}

pub fn resign_masternode<S: Storage>(storage: &mut S, id: &MasternodeId, height: u32) -> Result<(), BlockchainError> {
    let mut masternode = storage.get_masternode_or_err(id)?;
    if masternode.resign_height.is_some() {
        return Err(BlockchainError::InvalidState(format!("Masternode {} already resigned", id)));
    }
    masternode.resign_height = Some(height);
    debug!("masternode {} resigns at height {}", id, height);
    storage.set_masternode(id, &masternode)
}

pub fn record_minted_block<S: Storage>(storage: &mut S, id: &MasternodeId, height: u32) -> Result<(), BlockchainError> {
    let mut masternode = storage.get_masternode_or_err(id)?;
    masternode.minted_blocks += 1;
    masternode.last_minted_height = Some(height);
    storage.set_masternode(id, &masternode)
}

/// Proposal with the votes of its current cycle, as shown to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalInfo {
    pub proposal_id: ProposalId,
    #[serde(flatten)]
    pub proposal: Proposal,
    pub votes: Tally,
    // Approval in 8 decimals of the current cycle, -1 without votes
    pub approval_rate: Amount,
}

pub fn get_proposal_info<S: Storage>(storage: &S, ctx: &BlockContext, id: &ProposalId) -> Result<ProposalInfo, BlockchainError> {
    let proposal = storage.get_proposal_or_err(id)?;
    let votes = tally(storage, id, proposal.current_cycle, ctx.height)?;
    let counted = if ctx.is_active(HardFork::NextNetworkUpgrade) {
        votes.yes + votes.no
    } else {
        votes.votes()
    };
    let approval_rate = if counted == 0 {
        -1
    } else {
        mul_div(votes.yes as Amount, COIN, counted as Amount)?
    };
    Ok(ProposalInfo {
        proposal_id: *id,
        proposal,
        votes,
        approval_rate,
    })
}
