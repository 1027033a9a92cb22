//! Inbox reads and long-poll
//!
//! Cursor-ordered reads over a recipient's deliveries. A long-poll
//! subscribes to the mailbox channel *before* the first read so a hint
//! arriving mid-read is buffered rather than lost, then performs exactly
//! one re-read after a notification, the deadline, or cancellation.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::DeliveryHint;
use crate::data::repositories::deliveries::{self, InboxFilter};
use crate::data::types::{Cursor, InboxEntry};

use super::service::BrokerService;
use super::BrokerError;

/// One page of a recipient's inbox
#[derive(Debug)]
pub struct InboxPage {
    pub entries: Vec<InboxEntry>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Wait for the next hint; lag counts as a wake-up (state changed), a
/// closed channel degrades to waiting out the deadline.
async fn next_hint(rx: &mut broadcast::Receiver<DeliveryHint>) {
    loop {
        match rx.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl BrokerService {
    /// Read one page of the inbox without waiting
    pub async fn read_inbox(
        &self,
        agent_id: &str,
        filter: &InboxFilter,
        cursor: Cursor,
        limit: u32,
    ) -> Result<InboxPage, BrokerError> {
        let (entries, next_cursor, has_more) =
            deliveries::list_inbox(self.store().pool(), agent_id, filter, cursor, limit).await?;
        Ok(InboxPage {
            entries,
            next_cursor,
            has_more,
        })
    }

    /// Read the inbox, waiting up to `wait` for a delivery when empty
    ///
    /// The wait is clamped to the configured ceiling. Exactly one re-read
    /// happens after wake-up; an empty result tells the caller to poll
    /// again.
    pub async fn read_inbox_wait(
        &self,
        agent_id: &str,
        filter: &InboxFilter,
        cursor: Cursor,
        limit: u32,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<InboxPage, BrokerError> {
        let wait = wait.min(self.config().long_poll_max);
        if wait.is_zero() {
            return self.read_inbox(agent_id, filter, cursor, limit).await;
        }

        // Subscribe first: a hint racing the initial read parks in the
        // channel instead of vanishing.
        let mut rx = self.bus().subscribe_mailbox(agent_id);

        let page = self.read_inbox(agent_id, filter, cursor, limit).await?;
        if !page.entries.is_empty() {
            return Ok(page);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = next_hint(&mut rx) => {}
            _ = tokio::time::sleep(wait) => {}
        }

        self.read_inbox(agent_id, filter, cursor, limit).await
    }
}
