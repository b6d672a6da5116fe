//! Infrastructure layer: collaborator seams (host chain, persistence,
//! broadcast transport, TSS engine, bitcoin helper) plus config and logging.

pub mod btc;
pub mod chain;
pub mod config;
pub mod logging;
pub mod persistence;
pub mod registry;
pub mod retry;
pub mod transport;
pub mod tss;
