//! Request middleware: network guard (outermost) and authentication.

pub mod auth;
pub mod network;

pub use auth::{AuthCoordinator, auth_middleware};
pub use network::{NetworkState, client_ip, network_middleware};
