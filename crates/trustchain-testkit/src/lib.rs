//! # trustchain testkit
//!
//! Shared test support:
//!
//! - **Fixtures**: [`Party`] bundles a signing identity with a reader key
//! - **Entities**: a small banking schema ([`Account`], [`Transaction`],
//!   [`Note`], [`Coin`])
//! - **Records**: helpers that sign entity records without going through the
//!   facade
//! - **Generators**: proptest strategies, including whole record histories
//!
//! ```rust
//! use trustchain_testkit::{records, Account, Party};
//!
//! let alice = Party::new(1);
//! let (meta, record) = records::create(&alice.signer, &Account::new("alice", 10));
//! assert_eq!(record.id(), meta.id);
//! ```

pub mod entities;
pub mod fixtures;
pub mod generators;
pub mod records;

pub use entities::{sample_schema, Account, Coin, Note, Transaction};
pub use fixtures::{init_tracing, partition, Party};
