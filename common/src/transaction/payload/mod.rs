mod account;
mod evm;
mod governance;
mod loan;
mod oracle;
mod pool;
mod token;

pub use account::*;
pub use evm::*;
pub use governance::*;
pub use loan::*;
pub use oracle::*;
pub use pool::*;
pub use token::*;
