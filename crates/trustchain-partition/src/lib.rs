//! # trustchain partition
//!
//! Replay and caching of partition chains.
//!
//! A [`PartitionChain`] subscribes to one partition through a bridge and
//! folds the delivered records into materialized state: current entities,
//! full history, head versions, and the public and wrapped key indices.
//! Records that fail validation, legality or authority checks are kept out
//! of that state and listed in an audit trail instead.
//!
//! The [`Registry`] opens chains on demand, one per [`PartitionKey`], and
//! evicts them when idle or over capacity.
//!
//! [`PartitionKey`]: trustchain_core::PartitionKey

pub mod chain;
pub mod config;
pub mod error;
pub mod registry;

pub use chain::{ChainStatus, HistoryEntry, PartitionChain, Rejection};
pub use config::{ChainConfig, RegistryConfig};
pub use error::{ChainError, Result};
pub use registry::{Registry, RegistryBuilder, SeedHook};
