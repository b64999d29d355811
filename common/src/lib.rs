#![allow(clippy::module_inception)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::type_complexity)]

pub mod amount;
pub mod api;
pub mod attributes;
pub mod config;
pub mod crypto;
pub mod dex;
pub mod evm;
pub mod governance;
pub mod history;
pub mod loan;
pub mod oracle;
pub mod script;
pub mod serializer;
pub mod token;
pub mod transaction;
