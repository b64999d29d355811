mod attribute;
mod auction;
mod balance;
mod evm;
mod governance;
mod history;
mod journal;
mod loan;
mod masternode;
mod oracle;
mod pool;
mod snapshot;
mod token;
mod vault;

pub use self::{
    attribute::AttributeProvider, auction::AuctionProvider, balance::BalanceProvider, evm::EvmProvider,
    governance::GovernanceProvider, history::HistoryProvider, journal::JournalProvider, loan::LoanProvider,
    masternode::MasternodeProvider, oracle::OracleProvider, pool::PoolProvider, snapshot::SnapshotProvider,
    token::TokenProvider, vault::VaultProvider,
};
