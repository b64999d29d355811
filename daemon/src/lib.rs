// Tessera daemon library
// State transition engine driven by the external block processor

#![allow(clippy::int_plus_one)]
#![allow(clippy::needless_borrow)]
#![allow(clippy::type_complexity)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::uninlined_format_args)]

extern crate log;

pub mod config;
pub mod core;
pub mod rpc;
