//! # trustchain bridge
//!
//! Transport between a partition chain and the ordered log behind it.
//!
//! - [`RamBridge`] keeps logs in process memory, shared through a
//!   [`RamNetwork`].
//! - [`SqliteBridge`] keeps them in a SQLite file through a [`SqliteLog`].
//!
//! Both deliver every record of the partition, in offset order, to a single
//! [`RecordSink`], and both answer the sync handshake: a [`SyncTicket`]
//! captures the end of the log, and finishing it waits until the sink has
//! been fed that far.

pub mod error;
pub mod migration;
pub mod ram;
pub mod sqlite;
pub mod ticket;
pub mod traits;

pub use error::{BridgeError, Result};
pub use ram::{RamBridge, RamLog, RamNetwork};
pub use sqlite::{SqliteBridge, SqliteLog};
pub use ticket::SyncTicket;
pub use traits::{Bridge, BridgeConfig, BridgeFactory, LogEntry, RecordSink};
