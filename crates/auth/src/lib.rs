//! `forgeguard-auth`: pure authentication/authorization model.
//!
//! This crate is intentionally decoupled from HTTP and storage: stores,
//! caches and directories are reached through traits implemented elsewhere.

pub mod authorize;
pub mod capability;
pub mod claims;
pub mod error;
pub mod principal;
pub mod roles;
pub mod session;
pub mod token;

pub use authorize::{
    AccessDecision, ApprovalPolicy, DenialKind, PermissionEngine, allowed, authorize, evaluate,
};
pub use capability::{Action, CapabilitySet, Module, ModuleAccess, SubModule};
pub use claims::{TokenClaims, validate_claims};
pub use error::AuthError;
pub use principal::{DirectoryError, Principal, ProfileDirectory};
pub use roles::{DataScope, Role, RoleCode};
pub use session::{DeviceInfo, Session, SessionPolicy, SessionRecord};
pub use token::{TokenCodec, TokenError, TokenPayload, VerifiedToken};

pub use forgeguard_core::{GroupId, OrgUnitId, PrincipalId, RoleId, SessionId};
