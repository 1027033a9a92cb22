//! HTTP and stream surface

pub mod auth;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod types;
pub mod ws;

pub use auth::{AuthGate, Identity};
pub use server::ApiServer;
pub use types::ApiError;
