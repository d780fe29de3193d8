//! Infrastructure layer - network, ledger and record sinks

pub mod blockchain;
pub mod persistence;
pub mod rpc;
