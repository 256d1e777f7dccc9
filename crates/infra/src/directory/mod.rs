//! Read-only access to principal profiles (profile + role + placement).

mod in_memory;
mod postgres;

pub use in_memory::InMemoryProfileDirectory;
pub use postgres::PostgresProfileDirectory;
