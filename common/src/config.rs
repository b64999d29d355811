use crate::amount::{Amount, TokenId, COIN};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Native coin
pub const NATIVE_SYMBOL: &str = "DFI";
pub const NATIVE_TOKEN_ID: TokenId = 0;
// Stable loan token used for settlement and payback conversions
pub const DUSD_SYMBOL: &str = "DUSD";
pub const USD_CURRENCY: &str = "USD";

// 30 second blocks
pub const BLOCKS_PER_DAY: u32 = 2880;
pub const BLOCKS_PER_YEAR: u32 = BLOCKS_PER_DAY * 365;

// Oracle fixed interval price refresh, in blocks
pub const FIXED_INTERVAL_PRICE_BLOCKS: u32 = 120;
// Maximum deviation between active and next price, 30%
pub const PRICE_DEVIATION_THRESHOLD: Amount = 30 * COIN / 100;

// Vaults and auctions
pub const VAULT_CREATION_FEE: Amount = 2 * COIN;
pub const AUCTION_DURATION_BLOCKS: u32 = 36;
pub const DEFAULT_LIQUIDATION_PENALTY: Amount = 5 * COIN / 100;
// A bid must beat the previous one by 1%
pub const MIN_BID_INCREMENT: Amount = COIN / 100;
// USD value of loan backed by a single auction batch
pub const MAX_LOAN_PER_BATCH: Amount = 10_000 * COIN;
// Share of the minimum collateral that must be native coin (or DUSD)
pub const MIN_NATIVE_COLLATERAL_SHARE: Amount = COIN / 2;
pub const DEFAULT_PAYBACK_PENALTY: Amount = COIN / 100;

// Governance
pub const GOV_VOTING_PERIOD: u32 = 130;
pub const GOV_EMERGENCY_PERIOD: u32 = 25;
pub const GOV_QUORUM: Amount = COIN / 100;
pub const GOV_CFP_APPROVAL: Amount = COIN / 2;
pub const GOV_VOC_APPROVAL: Amount = 66_670_000;
pub const GOV_EMERGENCY_QUORUM: Amount = 9 * COIN / 100;
pub const GOV_EMERGENCY_APPROVAL: Amount = 66_670_000;
pub const GOV_CFP_FEE_PCT: Amount = COIN / 100;
pub const GOV_MIN_CFP_FEE: Amount = 10 * COIN;
pub const GOV_VOC_FEE: Amount = 50 * COIN;
pub const GOV_EMERGENCY_FEE: Amount = 10_000 * COIN;
pub const GOV_FEE_BURN_PCT: Amount = COIN / 2;
pub const GOV_CFP_MAX_CYCLES: u8 = 100;
// Blocks a masternode must have minted in to be allowed to vote
pub const GOV_ACTIVATION_WINDOW: u32 = 2 * BLOCKS_PER_DAY * 30;
