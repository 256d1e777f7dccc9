use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use forgeguard_core::RoleId;

use crate::capability::CapabilitySet;

/// Stable business code of a role (e.g. "admin", "group_lead", "member").
///
/// Codes are opaque at this layer; only the approval policy compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Breadth of records a role may see or act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataScope {
    #[serde(rename = "ALL")]
    All,
    /// Same organizational unit.
    #[serde(rename = "PROJECT")]
    Project,
    /// Same working group.
    #[serde(rename = "GROUP")]
    Group,
    /// Only the principal's own records.
    #[serde(rename = "SELF")]
    SelfOnly,
}

impl DataScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataScope::All => "ALL",
            DataScope::Project => "PROJECT",
            DataScope::Group => "GROUP",
            DataScope::SelfOnly => "SELF",
        }
    }
}

impl core::str::FromStr for DataScope {
    type Err = forgeguard_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(DataScope::All),
            "PROJECT" => Ok(DataScope::Project),
            "GROUP" => Ok(DataScope::Group),
            "SELF" => Ok(DataScope::SelfOnly),
            other => Err(forgeguard_core::DomainError::validation(format!(
                "unknown data scope '{other}'"
            ))),
        }
    }
}

/// Role definition (read-mostly reference data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub code: RoleCode,
    pub data_scope: DataScope,
    pub can_manage_subordinates: bool,
    pub capabilities: CapabilitySet,
}
