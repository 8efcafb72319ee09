//! Sync tickets and delivery progress.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{BridgeError, Result};

/// End of the log at the moment a sync started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncTicket(pub u64);

impl SyncTicket {
    pub fn offset(&self) -> u64 {
        self.0
    }
}

/// Highest offset handed to the subscriber, observable by waiters.
#[derive(Debug)]
pub(crate) struct Delivery {
    delivered: watch::Sender<u64>,
}

impl Delivery {
    pub(crate) fn new() -> Self {
        let (delivered, _) = watch::channel(0);
        Self { delivered }
    }

    pub(crate) fn advance(&self, offset: u64) {
        self.delivered.send_if_modified(|current| {
            if offset > *current {
                *current = offset;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn delivered(&self) -> u64 {
        *self.delivered.borrow()
    }

    pub(crate) fn reached(&self, ticket: SyncTicket) -> bool {
        self.delivered() >= ticket.0
    }

    pub(crate) async fn wait(
        &self,
        partition: &str,
        ticket: SyncTicket,
        timeout: Duration,
    ) -> Result<()> {
        let mut rx = self.delivered.subscribe();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|d| *d >= ticket.0)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::Closed(partition.to_string())),
            Err(_) => Err(BridgeError::SyncTimeout {
                partition: partition.to_string(),
                ticket: ticket.0,
                delivered: self.delivered(),
            }),
        };
        result
    }
}
