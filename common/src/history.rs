use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
    amount::Balances,
    crypto::Hash,
    loan::VaultSnapshot,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
    transaction::CustomTxType,
};

/// Entity a history entry is indexed under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "id")]
pub enum HistorySubject {
    Account(Script),
    Vault(Hash),
    Masternode(Hash),
}

impl HistorySubject {
    pub fn tag(&self) -> u8 {
        match self {
            HistorySubject::Account(_) => b'a',
            HistorySubject::Vault(_) => b'v',
            HistorySubject::Masternode(_) => b'm',
        }
    }

    pub fn id_bytes(&self) -> Vec<u8> {
        match self {
            HistorySubject::Account(script) => script.as_bytes().to_vec(),
            HistorySubject::Vault(id) | HistorySubject::Masternode(id) => id.as_bytes().to_vec(),
        }
    }
}

/// Events written by the engine outside of a user transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EngineEvent {
    Commission,
    Rewards,
    Liquidation,
    AuctionWon,
    AuctionRefund,
    AuctionRestart,
    LoanSettled,
    TokenSplit,
    ProposalPayout,
    FeeRedistribution,
    SchemeMigration,
    EvmFees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "source", content = "name")]
pub enum HistoryKind {
    Tx(CustomTxType),
    Engine(EngineEvent),
}

impl HistoryKind {
    pub fn name(&self) -> String {
        match self {
            HistoryKind::Tx(kind) => kind.to_string(),
            HistoryKind::Engine(event) => event.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub block_height: u32,
    pub tx_index: u32,
    pub tx_hash: Hash,
    pub kind: HistoryKind,
    pub owner: Script,
    // Signed token deltas
    pub amounts: Balances,
    pub vault_snapshot: Option<VaultSnapshot>,
    // Governance cycle, for masternode vote entries
    pub cycle: Option<u8>,
}

impl Serializer for HistoryKind {
    fn write(&self, writer: &mut Writer) {
        match self {
            HistoryKind::Tx(kind) => {
                writer.write_u8(0);
                writer.write_u8(kind.discriminator());
            }
            HistoryKind::Engine(event) => {
                writer.write_u8(1);
                writer.write_string(event.as_ref());
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => {
                let id = reader.read_u8()?;
                HistoryKind::Tx(
                    CustomTxType::from_discriminator(id).ok_or(ReaderError::UnknownDiscriminator(id))?,
                )
            }
            1 => {
                let name = reader.read_string()?;
                HistoryKind::Engine(name.parse().map_err(|_| ReaderError::InvalidValue)?)
            }
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

impl Serializer for HistoryEntry {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.block_height);
        writer.write_u32(self.tx_index);
        self.tx_hash.write(writer);
        self.kind.write(writer);
        self.owner.write(writer);
        self.amounts.write(writer);
        self.vault_snapshot.write(writer);
        self.cycle.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            block_height: reader.read_u32()?,
            tx_index: reader.read_u32()?,
            tx_hash: reader.read()?,
            kind: reader.read()?,
            owner: reader.read()?,
            amounts: reader.read()?,
            vault_snapshot: reader.read()?,
            cycle: reader.read()?,
        })
    }
}

/// Filters accepted by the history queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    pub max_block_height: Option<u32>,
    pub depth: Option<u32>,
    pub token: Option<u32>,
    pub tx_type: Option<CustomTxType>,
    pub limit: Option<usize>,
    pub cycle: Option<u8>,
}

impl HistoryFilter {
    pub fn matches(&self, entry: &HistoryEntry, tip: u32) -> bool {
        if let Some(max) = self.max_block_height {
            if entry.block_height > max {
                return false;
            }
        }

        if let Some(depth) = self.depth {
            let start = self.max_block_height.unwrap_or(tip);
            if entry.block_height < start.saturating_sub(depth) {
                return false;
            }
        }

        if let Some(token) = self.token {
            if entry.amounts.get(token) == 0 {
                return false;
            }
        }

        if let Some(tx_type) = self.tx_type {
            if entry.kind != HistoryKind::Tx(tx_type) {
                return false;
            }
        }

        if let Some(cycle) = self.cycle {
            if entry.cycle != Some(cycle) {
                return false;
            }
        }

        true
    }
}
