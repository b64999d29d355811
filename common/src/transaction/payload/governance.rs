use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    amount::Amount, crypto::Hash, governance::VoteDecision, impl_serializer, script::Script,
};

// path -> textual value
pub type GovVariables = BTreeMap<String, String>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SetGovMessage {
    pub variables: GovVariables,
}

impl_serializer!(SetGovMessage { variables });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SetGovHeightMessage {
    pub variables: GovVariables,
    pub start_height: u32,
}

impl_serializer!(SetGovHeightMessage {
    variables,
    start_height
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreateProposalMessage {
    pub payout_address: Script,
    pub amount: Amount,
    pub cycles: u8,
    pub title: String,
    pub context: String,
    pub context_hash: String,
    pub emergency: bool,
}

impl_serializer!(CreateProposalMessage {
    payout_address,
    amount,
    cycles,
    title,
    context,
    context_hash,
    emergency
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VoteMessage {
    pub proposal_id: Hash,
    pub masternode_id: Hash,
    pub decision: VoteDecision,
}

impl_serializer!(VoteMessage {
    proposal_id,
    masternode_id,
    decision
});
