//! Message broker
//!
//! The façade the API layer calls: routing and delivery planning, publish,
//! claim/ack/nack/renew, cursor-paged inbox reads with long-poll, and the
//! background sweeper.

pub mod inbox;
pub mod planner;
pub mod service;
pub mod sweeper;

pub use inbox::InboxPage;
pub use planner::PublishSpec;
pub use service::BrokerService;

use thiserror::Error;

use crate::data::StoreError;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Shape, size, enum, or required-field failure
    #[error("Validation: {0}")]
    Validation(String),

    /// Target entity absent or inactive
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks the right to the target
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}
