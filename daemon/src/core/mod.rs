pub mod error;
pub mod hard_fork;
pub mod storage;

pub mod accounts;
pub mod attributes;
pub mod blockchain;
pub mod context;
pub mod dex;
pub mod evm;
pub mod governance;
pub mod history;
pub mod interpreter;
pub mod loans;
pub mod oracle;
pub mod tokens;
