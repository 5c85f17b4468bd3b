//! Small pieces of shared infrastructure, kept out of the `apply` binary
//! crate so that process-level concerns (logging, signals) and the LSN
//! type are not tangled up with apply logic.

pub mod logging;
pub mod lsn;
pub mod signals;
