use strum::{AsRefStr, Display, EnumIter};
use tessera_common::{
    amount::{Amount, AmountError, TokenId},
    attributes::AttributeError,
    crypto::Hash,
    oracle::CurrencyPair,
    serializer::ReaderError,
};
use thiserror::Error;

use super::{hard_fork::HardFork, storage::Column};

/// Stable failure classes surfaced to the block processor and the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    AuthorizationFailed,
    NotFound,
    AlreadyExists,
    AmountOutOfRange,
    InsufficientFunds,
    TokenLocked,
    PriceInvalid,
    RatioBelowScheme,
    MinCollateralViolation,
    LimitReached,
    FeatureDisabled,
    ForkNotActive,
    WireMalformed,
    TooManyHops,
    PriceTooHigh,
    EvmPreValidationFailed,
    InvalidParameter,
    InvalidState,
    Internal,
}

impl ErrorKind {
    // Test observable prefix of every error message of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            ErrorKind::AuthorizationFailed => "authorization-failed",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::AmountOutOfRange => "amount-out-of-range",
            ErrorKind::InsufficientFunds => "insufficient-funds",
            ErrorKind::TokenLocked => "token-locked",
            ErrorKind::PriceInvalid => "price-invalid",
            ErrorKind::RatioBelowScheme => "ratio-below-scheme",
            ErrorKind::MinCollateralViolation => "min-collateral-violation",
            ErrorKind::LimitReached => "limit-reached",
            ErrorKind::FeatureDisabled => "feature-disabled",
            ErrorKind::ForkNotActive => "fork-not-active",
            ErrorKind::WireMalformed => "wire-malformed",
            ErrorKind::TooManyHops => "too-many-hops",
            ErrorKind::PriceTooHigh => "price-too-high",
            ErrorKind::EvmPreValidationFailed => "evm-pre-validation-failed",
            ErrorKind::InvalidParameter => "invalid-parameter",
            ErrorKind::InvalidState => "invalid-state",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("Missing authorization of {0}")]
    MissingAuth(String),

    #[error("Token {0} not found")]
    TokenNotFound(TokenId),
    #[error("Token with symbol {0} not found")]
    TokenSymbolNotFound(String),
    #[error("Pool pair {0} not found")]
    PoolNotFound(TokenId),
    #[error("Oracle {0} not found")]
    OracleNotFound(Hash),
    #[error("Vault {0} not found")]
    VaultNotFound(Hash),
    #[error("Loan scheme {0} not found")]
    SchemeNotFound(String),
    #[error("Proposal {0} not found")]
    ProposalNotFound(Hash),
    #[error("Masternode {0} not found")]
    MasternodeNotFound(Hash),
    #[error("No auction batch {1} for vault {0}")]
    AuctionNotFound(Hash, u32),
    #[error("Fixed interval price {0} not found")]
    PriceNotFound(CurrencyPair),
    #[error("Token {0} is not a valid collateral")]
    CollateralTokenNotFound(TokenId),
    #[error("Token {0} is not a loan token")]
    LoanTokenNotFound(TokenId),
    #[error("Cannot find a swap path from {0} to {1}")]
    NoSwapPath(TokenId, TokenId),
    #[error("Data not found on disk in column {0}")]
    NotFoundOnDisk(Column),

    #[error("Token {0} already exists")]
    TokenExists(String),
    #[error("Pool pair for tokens {0} and {1} already exists")]
    PoolExists(TokenId, TokenId),
    #[error("Loan scheme {0} already exists")]
    SchemeExists(String),
    #[error("A loan scheme with ratio {0} and rate {1} already exists")]
    SchemeParamsExist(u32, Amount),
    #[error("Oracle {0} already exists")]
    OracleExists(Hash),
    #[error("Vault {0} already exists")]
    VaultExists(Hash),
    #[error("Proposal {0} already exists")]
    ProposalExists(Hash),

    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error("Amount {0} is out of range")]
    InvalidAmount(Amount),
    #[error("Source amount must be equal to destination amount")]
    AmountMismatch,
    #[error("Bid {bid} is below the minimum of {min}")]
    BidTooLow { bid: Amount, min: Amount },

    #[error("Token {0} is locked")]
    TokenLocked(TokenId),
    #[error("Fixed interval price {0} is invalid")]
    PriceInvalid(CurrencyPair),
    #[error("No live oracles for {0}")]
    NoLiveOracles(CurrencyPair),
    #[error("Vault does not have enough collateralization ratio defined by loan scheme - {ratio} < {required}")]
    RatioBelowScheme { ratio: i64, required: u32 },
    #[error("At least 50% of the minimum required collateral must be in {0}")]
    MinCollateral(String),

    #[error("{0}")]
    LimitReached(String),
    #[error("{0} is disabled")]
    FeatureDisabled(String),
    #[error("Cannot be used before {0} fork")]
    ForkNotActive(HardFork),
    #[error(transparent)]
    Wire(#[from] ReaderError),
    #[error("Swap path has {0} hops, the maximum is 3")]
    TooManyHops(usize),
    #[error("Price is higher than indicated in pools {0:?}")]
    PriceTooHigh(Vec<TokenId>),
    #[error("{0}")]
    EvmPreValidation(String),
    #[error("Cannot transfer inside same domain")]
    SameDomain,

    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("Vault {0} is under liquidation")]
    VaultInLiquidation(Hash),

    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        use BlockchainError::*;
        match self {
            Unauthorized(_) | MissingAuth(_) => ErrorKind::AuthorizationFailed,
            TokenNotFound(_)
            | TokenSymbolNotFound(_)
            | PoolNotFound(_)
            | OracleNotFound(_)
            | VaultNotFound(_)
            | SchemeNotFound(_)
            | ProposalNotFound(_)
            | MasternodeNotFound(_)
            | AuctionNotFound(_, _)
            | PriceNotFound(_)
            | CollateralTokenNotFound(_)
            | LoanTokenNotFound(_)
            | NoSwapPath(_, _)
            | NotFoundOnDisk(_) => ErrorKind::NotFound,
            TokenExists(_)
            | PoolExists(_, _)
            | SchemeExists(_)
            | SchemeParamsExist(_, _)
            | OracleExists(_)
            | VaultExists(_)
            | ProposalExists(_) => ErrorKind::AlreadyExists,
            Amount(AmountError::Insufficient { .. }) => ErrorKind::InsufficientFunds,
            Amount(_) | InvalidAmount(_) | AmountMismatch | BidTooLow { .. } => ErrorKind::AmountOutOfRange,
            TokenLocked(_) => ErrorKind::TokenLocked,
            PriceInvalid(_) | NoLiveOracles(_) => ErrorKind::PriceInvalid,
            RatioBelowScheme { .. } => ErrorKind::RatioBelowScheme,
            MinCollateral(_) => ErrorKind::MinCollateralViolation,
            LimitReached(_) => ErrorKind::LimitReached,
            FeatureDisabled(_) => ErrorKind::FeatureDisabled,
            ForkNotActive(_) => ErrorKind::ForkNotActive,
            Wire(_) => ErrorKind::WireMalformed,
            TooManyHops(_) => ErrorKind::TooManyHops,
            PriceTooHigh(_) => ErrorKind::PriceTooHigh,
            EvmPreValidation(_) | SameDomain => ErrorKind::EvmPreValidationFailed,
            Attribute(_) | InvalidParameter(_) => ErrorKind::InvalidParameter,
            InvalidState(_) | VaultInLiquidation(_) => ErrorKind::InvalidState,
            Any(_) => ErrorKind::Internal,
        }
    }

    // Message as shown by the query layer
    pub fn to_prefixed_string(&self) -> String {
        format!("{}: {}", self.kind().prefix(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_prefixes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in ErrorKind::iter() {
            assert!(seen.insert(kind.prefix()));
            assert_eq!(kind.prefix(), kind.to_string());
        }
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = BlockchainError::Amount(AmountError::Insufficient {
            token_id: 0,
            available: 1,
            requested: 2,
        });
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(BlockchainError::SameDomain.kind(), ErrorKind::EvmPreValidationFailed);
        assert_eq!(
            BlockchainError::Wire(ReaderError::InvalidSize).kind(),
            ErrorKind::WireMalformed
        );
        assert!(BlockchainError::TokenLocked(5)
            .to_prefixed_string()
            .starts_with("token-locked: "));
    }
}
