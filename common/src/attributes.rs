use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};
use thiserror::Error;

use crate::{
    amount::{format_amount, parse_amount, Amount, Balances, TokenId, COIN},
    dex::FeeDirection,
    script::AddressFormat,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

pub const ATTRIBUTES_VERSION: &str = "v0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    #[error("Unsupported attribute path: {0}")]
    UnknownPath(String),
    #[error("Invalid value for {path}: {value}")]
    InvalidValue { path: String, value: String },
    #[error("Attribute {0} is read-only")]
    ReadOnly(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay, AsRefStr, EnumIter)]
pub enum Feature {
    #[strum(serialize = "evm")]
    Evm,
    #[strum(serialize = "transferdomain")]
    TransferDomain,
    #[strum(serialize = "gov")]
    Gov,
    #[strum(serialize = "gov-payout")]
    GovPayout,
    #[strum(serialize = "dfip2201")]
    Dfip2201,
    #[strum(serialize = "dfip2203")]
    Dfip2203,
    #[strum(serialize = "dfip2206a")]
    Dfip2206a,
    #[strum(serialize = "dfip2211d")]
    Dfip2211d,
    #[strum(serialize = "dfip2211f")]
    Dfip2211f,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenAttribute {
    PaybackDfi,
    PaybackDfiFeePct,
    LoanPayback(TokenId),
    LoanPaybackFeePct(TokenId),
    DexInFeePct,
    DexOutFeePct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PoolAttribute {
    TokenAFeePct,
    TokenBFeePct,
    TokenAFeeDirection,
    TokenBFeeDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum GovAttribute {
    VotingPeriod,
    Quorum,
    CfpApprovalThreshold,
    VocApprovalThreshold,
    VocEmergencyPeriod,
    VocEmergencyFee,
    VocEmergencyQuorum,
    VocEmergencyApprovalThreshold,
    FeeRedistribution,
    FeeBurnPct,
    CfpFee,
    VocFee,
    CfpMaxCycles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay, AsRefStr)]
pub enum TransferDirection {
    #[strum(serialize = "dvm-to-evm")]
    DvmToEvm,
    #[strum(serialize = "evm-to-dvm")]
    EvmToDvm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay, AsRefStr)]
pub enum TransferDomainAttribute {
    #[strum(serialize = "enabled")]
    Enabled,
    #[strum(serialize = "dat-enabled")]
    DatEnabled,
    #[strum(serialize = "native-enabled")]
    NativeEnabled,
    #[strum(serialize = "src-formats")]
    SrcFormats,
    #[strum(serialize = "dest-formats")]
    DestFormats,
    #[strum(serialize = "auth-formats")]
    AuthFormats,
}

/// Read-only accounting maintained by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, StrumDisplay, AsRefStr, EnumIter)]
pub enum LiveAttribute {
    #[strum(serialize = "dexfeetokens")]
    DexFeeTokens,
    #[strum(serialize = "payback_burn")]
    PaybackBurn,
    #[strum(serialize = "auction_burn")]
    AuctionBurn,
    #[strum(serialize = "proposal_fee_burn")]
    ProposalFeeBurn,
    #[strum(serialize = "split_dust")]
    SplitDust,
    #[strum(serialize = "transferdomain/dvm-to-evm")]
    TransferDomainIn,
    #[strum(serialize = "transferdomain/evm-to-dvm")]
    TransferDomainOut,
    #[strum(serialize = "evm/block/fee_burnt")]
    EvmFeeBurnt,
    #[strum(serialize = "evm/block/fee_priority")]
    EvmFeePriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    Feature(Feature),
    LpSplit(TokenId),
    Token(TokenId, TokenAttribute),
    PoolPair(TokenId, PoolAttribute),
    TokenLock(TokenId),
    OracleSplits(u32),
    Gov(GovAttribute),
    TransferDomain(TransferDirection, TransferDomainAttribute),
    Live(LiveAttribute),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    // 8 decimal fraction within [0, 1]
    Percent,
    Amount,
    Integer,
    Direction,
    Formats,
    Splits,
    Balances,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Percent(Amount),
    Amount(Amount),
    Integer(u64),
    Direction(FeeDirection),
    Formats(BTreeSet<AddressFormat>),
    // token id to multiplier, negative multipliers merge
    Splits(BTreeMap<TokenId, i32>),
    Balances(Balances),
}

fn parse_id(part: Option<&&str>) -> Option<TokenId> {
    part.and_then(|p| p.parse().ok())
}

impl AttributeKey {
    pub fn value_type(&self) -> ValueType {
        match self {
            AttributeKey::Feature(_) | AttributeKey::TokenLock(_) => ValueType::Bool,
            AttributeKey::LpSplit(_) => ValueType::Percent,
            AttributeKey::Token(_, attr) => match attr {
                TokenAttribute::PaybackDfi | TokenAttribute::LoanPayback(_) => ValueType::Bool,
                _ => ValueType::Percent,
            },
            AttributeKey::PoolPair(_, attr) => match attr {
                PoolAttribute::TokenAFeePct | PoolAttribute::TokenBFeePct => ValueType::Percent,
                PoolAttribute::TokenAFeeDirection | PoolAttribute::TokenBFeeDirection => {
                    ValueType::Direction
                }
            },
            AttributeKey::OracleSplits(_) => ValueType::Splits,
            AttributeKey::Gov(attr) => match attr {
                GovAttribute::VotingPeriod
                | GovAttribute::VocEmergencyPeriod
                | GovAttribute::CfpMaxCycles => ValueType::Integer,
                GovAttribute::VocEmergencyFee | GovAttribute::CfpFee | GovAttribute::VocFee => {
                    ValueType::Amount
                }
                GovAttribute::FeeRedistribution => ValueType::Bool,
                _ => ValueType::Percent,
            },
            AttributeKey::TransferDomain(_, attr) => match attr {
                TransferDomainAttribute::SrcFormats
                | TransferDomainAttribute::DestFormats
                | TransferDomainAttribute::AuthFormats => ValueType::Formats,
                _ => ValueType::Bool,
            },
            AttributeKey::Live(_) => ValueType::Balances,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, AttributeKey::Live(_))
    }

    pub fn parse_value(&self, value: &str) -> Result<AttributeValue, AttributeError> {
        let invalid = || AttributeError::InvalidValue {
            path: self.to_string(),
            value: value.to_string(),
        };

        Ok(match self.value_type() {
            ValueType::Bool => match value {
                "true" => AttributeValue::Bool(true),
                "false" => AttributeValue::Bool(false),
                _ => return Err(invalid()),
            },
            ValueType::Percent => {
                let amount = parse_amount(value).ok_or_else(invalid)?;
                if !(0..=COIN).contains(&amount) {
                    return Err(invalid());
                }
                AttributeValue::Percent(amount)
            }
            ValueType::Amount => {
                let amount = parse_amount(value).ok_or_else(invalid)?;
                if amount < 0 {
                    return Err(invalid());
                }
                AttributeValue::Amount(amount)
            }
            ValueType::Integer => AttributeValue::Integer(value.parse().map_err(|_| invalid())?),
            ValueType::Direction => {
                AttributeValue::Direction(FeeDirection::from_str(value).map_err(|_| invalid())?)
            }
            ValueType::Formats => {
                let mut formats = BTreeSet::new();
                for item in value.split(',').filter(|s| !s.is_empty()) {
                    let format = AddressFormat::from_str(item.trim()).map_err(|_| invalid())?;
                    if format == AddressFormat::Unknown {
                        return Err(invalid());
                    }
                    formats.insert(format);
                }
                AttributeValue::Formats(formats)
            }
            ValueType::Splits => {
                let mut splits = BTreeMap::new();
                for item in value.split(',').filter(|s| !s.is_empty()) {
                    let (id, multiplier) = item.trim().split_once('/').ok_or_else(invalid)?;
                    let id: TokenId = id.parse().map_err(|_| invalid())?;
                    let multiplier: i32 = multiplier.parse().map_err(|_| invalid())?;
                    if multiplier == 0 || multiplier == 1 || multiplier == -1 {
                        return Err(invalid());
                    }
                    if splits.insert(id, multiplier).is_some() {
                        return Err(invalid());
                    }
                }
                if splits.is_empty() {
                    return Err(invalid());
                }
                AttributeValue::Splits(splits)
            }
            ValueType::Balances => return Err(AttributeError::ReadOnly(self.to_string())),
        })
    }
}

impl FromStr for AttributeKey {
    type Err = AttributeError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let unknown = || AttributeError::UnknownPath(path.to_string());
        let parts: Vec<&str> = path.split('/').collect();
        if parts.first() != Some(&ATTRIBUTES_VERSION) {
            return Err(unknown());
        }

        let key = match parts.get(1..).unwrap_or(&[]) {
            ["params", "feature", name] => {
                AttributeKey::Feature(Feature::from_str(name).map_err(|_| unknown())?)
            }
            ["params", "lp_splits", id] => {
                AttributeKey::LpSplit(parse_id(Some(id)).ok_or_else(unknown)?)
            }
            ["token", id, rest @ ..] => {
                let id = parse_id(Some(id)).ok_or_else(unknown)?;
                let attr = match rest {
                    ["payback_dfi"] => TokenAttribute::PaybackDfi,
                    ["payback_dfi_fee_pct"] => TokenAttribute::PaybackDfiFeePct,
                    ["loan_payback", other] => {
                        TokenAttribute::LoanPayback(parse_id(Some(other)).ok_or_else(unknown)?)
                    }
                    ["loan_payback_fee_pct", other] => TokenAttribute::LoanPaybackFeePct(
                        parse_id(Some(other)).ok_or_else(unknown)?,
                    ),
                    ["dex_in_fee_pct"] => TokenAttribute::DexInFeePct,
                    ["dex_out_fee_pct"] => TokenAttribute::DexOutFeePct,
                    _ => return Err(unknown()),
                };
                AttributeKey::Token(id, attr)
            }
            ["poolpairs", id, name] => AttributeKey::PoolPair(
                parse_id(Some(id)).ok_or_else(unknown)?,
                PoolAttribute::from_str(name).map_err(|_| unknown())?,
            ),
            ["locks", "token", id] => AttributeKey::TokenLock(parse_id(Some(id)).ok_or_else(unknown)?),
            ["oracles", "splits", height] => {
                AttributeKey::OracleSplits(height.parse().map_err(|_| unknown())?)
            }
            ["gov", "proposals", name] => {
                AttributeKey::Gov(GovAttribute::from_str(name).map_err(|_| unknown())?)
            }
            ["transferdomain", direction, name] => AttributeKey::TransferDomain(
                TransferDirection::from_str(direction).map_err(|_| unknown())?,
                TransferDomainAttribute::from_str(name).map_err(|_| unknown())?,
            ),
            ["live", "economy", rest @ ..] => {
                AttributeKey::Live(LiveAttribute::from_str(&rest.join("/")).map_err(|_| unknown())?)
            }
            _ => return Err(unknown()),
        };

        Ok(key)
    }
}

impl Display for AttributeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/", ATTRIBUTES_VERSION)?;
        match self {
            AttributeKey::Feature(feature) => write!(f, "params/feature/{}", feature),
            AttributeKey::LpSplit(id) => write!(f, "params/lp_splits/{}", id),
            AttributeKey::Token(id, attr) => {
                write!(f, "token/{}/", id)?;
                match attr {
                    TokenAttribute::PaybackDfi => write!(f, "payback_dfi"),
                    TokenAttribute::PaybackDfiFeePct => write!(f, "payback_dfi_fee_pct"),
                    TokenAttribute::LoanPayback(other) => write!(f, "loan_payback/{}", other),
                    TokenAttribute::LoanPaybackFeePct(other) => {
                        write!(f, "loan_payback_fee_pct/{}", other)
                    }
                    TokenAttribute::DexInFeePct => write!(f, "dex_in_fee_pct"),
                    TokenAttribute::DexOutFeePct => write!(f, "dex_out_fee_pct"),
                }
            }
            AttributeKey::PoolPair(id, attr) => write!(f, "poolpairs/{}/{}", id, attr),
            AttributeKey::TokenLock(id) => write!(f, "locks/token/{}", id),
            AttributeKey::OracleSplits(height) => write!(f, "oracles/splits/{}", height),
            AttributeKey::Gov(attr) => write!(f, "gov/proposals/{}", attr),
            AttributeKey::TransferDomain(direction, attr) => {
                write!(f, "transferdomain/{}/{}", direction, attr)
            }
            AttributeKey::Live(attr) => write!(f, "live/economy/{}", attr),
        }
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Percent(v) | AttributeValue::Amount(v) => write!(f, "{}", format_amount(*v)),
            AttributeValue::Integer(v) => write!(f, "{}", v),
            AttributeValue::Direction(v) => write!(f, "{}", v),
            AttributeValue::Formats(formats) => {
                let items: Vec<&str> = formats.iter().map(|f| f.as_ref()).collect();
                write!(f, "{}", items.join(","))
            }
            AttributeValue::Splits(splits) => {
                let items: Vec<String> = splits.iter().map(|(id, m)| format!("{}/{}", id, m)).collect();
                write!(f, "{}", items.join(","))
            }
            AttributeValue::Balances(balances) => {
                let items: Vec<String> = balances
                    .iter()
                    .map(|(id, amount)| format!("{}@{}", format_amount(amount), id))
                    .collect();
                write!(f, "{}", items.join(","))
            }
        }
    }
}

impl Serializer for AttributeValue {
    fn write(&self, writer: &mut Writer) {
        match self {
            AttributeValue::Bool(v) => {
                writer.write_u8(0);
                writer.write_bool(*v);
            }
            AttributeValue::Percent(v) => {
                writer.write_u8(1);
                writer.write_i64(*v);
            }
            AttributeValue::Amount(v) => {
                writer.write_u8(2);
                writer.write_i64(*v);
            }
            AttributeValue::Integer(v) => {
                writer.write_u8(3);
                writer.write_u64(*v);
            }
            AttributeValue::Direction(v) => {
                writer.write_u8(4);
                writer.write_u8(match v {
                    FeeDirection::Both => 0,
                    FeeDirection::In => 1,
                    FeeDirection::Out => 2,
                });
            }
            AttributeValue::Formats(v) => {
                writer.write_u8(5);
                v.write(writer);
            }
            AttributeValue::Splits(v) => {
                writer.write_u8(6);
                v.write(writer);
            }
            AttributeValue::Balances(v) => {
                writer.write_u8(7);
                v.write(writer);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => AttributeValue::Bool(reader.read_bool()?),
            1 => AttributeValue::Percent(reader.read_i64()?),
            2 => AttributeValue::Amount(reader.read_i64()?),
            3 => AttributeValue::Integer(reader.read_u64()?),
            4 => AttributeValue::Direction(match reader.read_u8()? {
                0 => FeeDirection::Both,
                1 => FeeDirection::In,
                2 => FeeDirection::Out,
                id => return Err(ReaderError::UnknownDiscriminator(id)),
            }),
            5 => AttributeValue::Formats(reader.read()?),
            6 => AttributeValue::Splits(reader.read()?),
            7 => AttributeValue::Balances(reader.read()?),
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_paths() {
        for path in [
            "v0/params/feature/evm",
            "v0/params/feature/gov-payout",
            "v0/token/5/loan_payback/7",
            "v0/token/5/dex_in_fee_pct",
            "v0/poolpairs/3/token_a_fee_direction",
            "v0/locks/token/4",
            "v0/oracles/splits/500",
            "v0/gov/proposals/cfp_approval_threshold",
            "v0/gov/proposals/voc_emergency_approval_threshold",
            "v0/transferdomain/dvm-to-evm/src-formats",
            "v0/live/economy/evm/block/fee_burnt",
        ] {
            let key: AttributeKey = path.parse().unwrap();
            assert_eq!(key.to_string(), path);
        }
    }

    #[test]
    fn test_reject_unknown_paths() {
        assert!("v1/params/feature/evm".parse::<AttributeKey>().is_err());
        assert!("v0/params/feature/warp".parse::<AttributeKey>().is_err());
        assert!("v0/token/x/payback_dfi".parse::<AttributeKey>().is_err());
        assert!("v0/locks/token".parse::<AttributeKey>().is_err());
    }

    #[test]
    fn test_parse_values() {
        let key: AttributeKey = "v0/poolpairs/3/token_a_fee_pct".parse().unwrap();
        assert_eq!(key.parse_value("0.05").unwrap(), AttributeValue::Percent(5_000_000));
        assert!(key.parse_value("1.5").is_err());

        let key: AttributeKey = "v0/oracles/splits/500".parse().unwrap();
        let value = key.parse_value("5/2,6/-3").unwrap();
        assert_eq!(value.to_string(), "5/2,6/-3");
        assert!(key.parse_value("5/1").is_err());

        let key: AttributeKey = "v0/transferdomain/evm-to-dvm/dest-formats".parse().unwrap();
        let value = key.parse_value("p2pkh,bech32").unwrap();
        assert_eq!(value.to_string(), "p2pkh,bech32");

        let key: AttributeKey = "v0/live/economy/dexfeetokens".parse().unwrap();
        assert!(matches!(key.parse_value("1"), Err(AttributeError::ReadOnly(_))));
    }
}
