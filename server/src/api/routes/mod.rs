//! HTTP route modules

pub mod agents;
pub mod groups;
pub mod health;
pub mod messages;
pub mod stats;
pub mod topics;
