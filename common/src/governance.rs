use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
    amount::Amount,
    crypto::Hash,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

pub const MAX_PROPOSAL_TITLE_LENGTH: usize = 128;
pub const MAX_PROPOSAL_CONTEXT_LENGTH: usize = 512;
pub const MAX_PROPOSAL_CONTEXT_HASH_LENGTH: usize = 512;

pub type ProposalId = Hash;
pub type MasternodeId = Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ProposalKind {
    CommunityFundProposal,
    VoteOfConfidence,
    EmergencyVoteOfConfidence,
}

impl ProposalKind {
    pub fn is_cfp(&self) -> bool {
        matches!(self, ProposalKind::CommunityFundProposal)
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, ProposalKind::EmergencyVoteOfConfidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProposalStatus {
    Voting,
    Rejected,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VoteDecision {
    Yes,
    No,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub kind: ProposalKind,
    pub title: String,
    pub context: String,
    pub context_hash: String,
    pub amount: Amount,
    pub cycles: u8,
    pub payout_address: Script,
    pub creation_height: u32,
    pub current_cycle: u8,
    pub cycle_end_height: u32,
    pub proposal_end_height: u32,
    pub voting_period: u32,
    pub status: ProposalStatus,
    pub fee: Amount,
    // Part of the fee paid out to voting masternodes when the proposal ends
    pub fee_redistribution: Amount,
    // 8 decimal fractions, frozen at creation
    pub quorum: Amount,
    pub approval_threshold: Amount,
    // Sum of installments already paid
    pub paid: Amount,
}

impl Proposal {
    // Installment paid at the end of a successful cycle
    pub fn cycle_payout(&self, cycle: u8) -> Amount {
        if !self.kind.is_cfp() || self.cycles == 0 {
            return 0;
        }

        let cycles = self.cycles as Amount;
        let base = self.amount / cycles;
        if cycle == self.cycles {
            self.amount - base * (cycles - 1)
        } else {
            base
        }
    }
}

impl Serializer for ProposalKind {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            ProposalKind::CommunityFundProposal => 0x01,
            ProposalKind::VoteOfConfidence => 0x02,
            ProposalKind::EmergencyVoteOfConfidence => 0x03,
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0x01 => ProposalKind::CommunityFundProposal,
            0x02 => ProposalKind::VoteOfConfidence,
            0x03 => ProposalKind::EmergencyVoteOfConfidence,
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

impl Serializer for ProposalStatus {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            ProposalStatus::Voting => 0x01,
            ProposalStatus::Rejected => 0x02,
            ProposalStatus::Completed => 0x03,
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0x01 => ProposalStatus::Voting,
            0x02 => ProposalStatus::Rejected,
            0x03 => ProposalStatus::Completed,
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

impl Serializer for VoteDecision {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            VoteDecision::Yes => 0x01,
            VoteDecision::No => 0x02,
            VoteDecision::Neutral => 0x03,
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0x01 => VoteDecision::Yes,
            0x02 => VoteDecision::No,
            0x03 => VoteDecision::Neutral,
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

impl Serializer for Proposal {
    fn write(&self, writer: &mut Writer) {
        self.kind.write(writer);
        writer.write_string(&self.title);
        writer.write_string(&self.context);
        writer.write_string(&self.context_hash);
        writer.write_i64(self.amount);
        writer.write_u8(self.cycles);
        self.payout_address.write(writer);
        writer.write_u32(self.creation_height);
        writer.write_u8(self.current_cycle);
        writer.write_u32(self.cycle_end_height);
        writer.write_u32(self.proposal_end_height);
        writer.write_u32(self.voting_period);
        self.status.write(writer);
        writer.write_i64(self.fee);
        writer.write_i64(self.fee_redistribution);
        writer.write_i64(self.quorum);
        writer.write_i64(self.approval_threshold);
        writer.write_i64(self.paid);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            kind: reader.read()?,
            title: reader.read_string()?,
            context: reader.read_string()?,
            context_hash: reader.read_string()?,
            amount: reader.read_i64()?,
            cycles: reader.read_u8()?,
            payout_address: reader.read()?,
            creation_height: reader.read_u32()?,
            current_cycle: reader.read_u8()?,
            cycle_end_height: reader.read_u32()?,
            proposal_end_height: reader.read_u32()?,
            voting_period: reader.read_u32()?,
            status: reader.read()?,
            fee: reader.read_i64()?,
            fee_redistribution: reader.read_i64()?,
            quorum: reader.read_i64()?,
            approval_threshold: reader.read_i64()?,
            paid: reader.read_i64()?,
        })
    }
}

/// Registry entry for a block producing masternode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Masternode {
    pub owner: Script,
    pub operator: Script,
    pub creation_height: u32,
    pub resign_height: Option<u32>,
    pub minted_blocks: u32,
    pub last_minted_height: Option<u32>,
}

impl Masternode {
    pub fn is_active(&self, height: u32) -> bool {
        self.creation_height <= height && self.resign_height.map_or(true, |h| h > height)
    }
}

impl Serializer for Masternode {
    fn write(&self, writer: &mut Writer) {
        self.owner.write(writer);
        self.operator.write(writer);
        writer.write_u32(self.creation_height);
        self.resign_height.write(writer);
        writer.write_u32(self.minted_blocks);
        self.last_minted_height.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            owner: reader.read()?,
            operator: reader.read()?,
            creation_height: reader.read_u32()?,
            resign_height: reader.read()?,
            minted_blocks: reader.read_u32()?,
            last_minted_height: reader.read()?,
        })
    }
}
