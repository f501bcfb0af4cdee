//! Gateway: the HTTP control plane for the web client and the Telegram relay.
//!
//! One port serves the completion endpoint, the relay send/drain pair, the
//! config record, interaction CRUD, command execution, and the heavy task.

mod error;
mod server;

pub use error::ApiError;
pub use server::{build_router, run_gateway, GatewayState};
