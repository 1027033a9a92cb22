//! Identity and capability gate

pub mod gate;
pub mod identity;
pub mod middleware;

pub use gate::{AuthGate, GateError, Registration};
pub use identity::{Action, Identity, Resource};
pub use middleware::{AuthState, extract_token, require_auth};
