//! Infrastructure layer: session storage, caches, profile directory,
//! network allowlist and audit sinks.

pub mod allowlist;
pub mod audit;
pub mod directory;
pub mod login;
pub mod session_store;

pub use allowlist::{
    AllowlistConfig, AllowlistError, AllowlistSnapshot, AllowlistSource,
    InMemoryAllowlistSource, NetworkAllowlistGuard, NetworkDecision, PostgresAllowlistSource,
    SnapshotState,
};
pub use audit::{AuditEmitter, AuditError, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use directory::{InMemoryProfileDirectory, PostgresProfileDirectory};
pub use login::{
    InMemoryLoginVerifier, LoginVerifier, PasswordError, PostgresLoginVerifier,
    hash_password_light, verify_password, verify_password_blocking,
};
pub use session_store::{
    InMemorySessionCache, InMemorySessionRepository, PostgresSessionRepository, SessionCache,
    SessionRepository, SessionStore, StoreError,
};
#[cfg(feature = "redis")]
pub use session_store::RedisSessionCache;
