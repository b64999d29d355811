use log::trace;
use tessera_common::{
    crypto::Hash,
    governance::{MasternodeId, Proposal, ProposalId, ProposalStatus, VoteDecision},
    serializer::Serializer,
};

use crate::core::{
    error::BlockchainError,
    storage::{build_height_key, build_vote_key, build_vote_prefix, ChainStore, Column, StorageBackend},
};

/// Proposals and their votes.
///
/// Proposals still voting are indexed by the end height of their current
/// cycle so that the cycle closure only visits those.
pub trait GovernanceProvider {
    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, BlockchainError>;

    fn set_proposal(&mut self, id: &ProposalId, proposal: &Proposal) -> Result<(), BlockchainError>;

    fn list_proposals(&self) -> Result<Vec<(ProposalId, Proposal)>, BlockchainError>;

    fn get_proposals_ending_at(&self, height: u32) -> Result<Vec<ProposalId>, BlockchainError>;

    fn set_vote(
        &mut self,
        id: &ProposalId,
        cycle: u8,
        masternode: &MasternodeId,
        decision: VoteDecision,
    ) -> Result<(), BlockchainError>;

    fn get_votes(&self, id: &ProposalId, cycle: u8) -> Result<Vec<(MasternodeId, VoteDecision)>, BlockchainError>;

    fn get_proposal_or_err(&self, id: &ProposalId) -> Result<Proposal, BlockchainError> {
        self.get_proposal(id)?.ok_or(BlockchainError::ProposalNotFound(*id))
    }
}

impl<B: StorageBackend> GovernanceProvider for ChainStore<B> {
    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, BlockchainError> {
        self.load_optional_from_disk(Column::Proposals, id)
    }

    fn set_proposal(&mut self, id: &ProposalId, proposal: &Proposal) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "set proposal {} status {} cycle {}/{}",
                id,
                proposal.status,
                proposal.current_cycle,
                proposal.cycles
            );
        }

        if let Some(previous) = self.get_proposal(id)? {
            if previous.status == ProposalStatus::Voting {
                self.remove_from_disk(
                    Column::ActiveProposals,
                    build_height_key(previous.cycle_end_height, id.as_bytes()),
                )?;
            }
        }
        if proposal.status == ProposalStatus::Voting {
            self.insert_raw(
                Column::ActiveProposals,
                build_height_key(proposal.cycle_end_height, id.as_bytes()),
                Vec::new(),
            )?;
        }
        self.insert_into_disk(Column::Proposals, id.as_bytes().to_vec(), proposal)
    }

    fn list_proposals(&self) -> Result<Vec<(ProposalId, Proposal)>, BlockchainError> {
        self.scan_prefix::<Proposal>(Column::Proposals, &[])?
            .into_iter()
            .map(|(key, proposal)| Ok((Hash::from_bytes(&key)?, proposal)))
            .collect()
    }

    fn get_proposals_ending_at(&self, height: u32) -> Result<Vec<ProposalId>, BlockchainError> {
        self.scan_prefix_raw(Column::ActiveProposals, &height.to_be_bytes())?
            .into_iter()
            .map(|(key, _)| Ok(Hash::from_bytes(&key[4..])?))
            .collect()
    }

    fn set_vote(
        &mut self,
        id: &ProposalId,
        cycle: u8,
        masternode: &MasternodeId,
        decision: VoteDecision,
    ) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::Votes, build_vote_key(id, cycle, masternode), &decision)
    }

    fn get_votes(&self, id: &ProposalId, cycle: u8) -> Result<Vec<(MasternodeId, VoteDecision)>, BlockchainError> {
        let prefix = build_vote_prefix(id, cycle);
        self.scan_prefix::<VoteDecision>(Column::Votes, &prefix)?
            .into_iter()
            .map(|(key, decision)| Ok((Hash::from_bytes(&key[prefix.len()..])?, decision)))
            .collect()
    }
}
