//! `forgeguard-core`: shared identifiers and primitives.
//!
//! This crate contains no I/O and no authorization policy.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{GroupId, OrgUnitId, PrincipalId, RoleId, SessionId};
