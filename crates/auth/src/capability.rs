use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

macro_rules! name_newtype {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Cow<'static, str>);

        impl $t {
            pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&'static str> for $t {
            fn from(value: &'static str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

name_newtype!(
    /// Top-level business module (e.g. "finance", "hr.attendance").
    Module
);
name_newtype!(
    /// Area inside a module (e.g. "invoices").
    SubModule
);
name_newtype!(
    /// Operation on a sub-module (e.g. "view", "approve", "export").
    Action
);

/// Role capabilities: module → sub-module → allowed actions.
///
/// Stored as JSON in the role table; the shape is enforced by the types here
/// rather than by ad-hoc nested maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(HashMap<Module, HashMap<SubModule, HashSet<Action>>>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style grant.
    pub fn grant(
        mut self,
        module: impl Into<Module>,
        sub_module: impl Into<SubModule>,
        action: impl Into<Action>,
    ) -> Self {
        self.insert(module.into(), sub_module.into(), action.into());
        self
    }

    pub fn insert(&mut self, module: Module, sub_module: SubModule, action: Action) {
        self.0
            .entry(module)
            .or_default()
            .entry(sub_module)
            .or_default()
            .insert(action);
    }

    pub fn permits(&self, module: &Module, sub_module: &SubModule, action: &Action) -> bool {
        self.0
            .get(module)
            .and_then(|subs| subs.get(sub_module))
            .is_some_and(|actions| actions.contains(action))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|subs| subs.values().all(HashSet::is_empty))
    }
}

/// Modules a principal may reach at all (department/role level).
///
/// Entries are `*` (everything), `prefix.*` (the prefix module and anything
/// below it) or an exact module name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleAccess(Vec<String>);

impl ModuleAccess {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    pub fn all() -> Self {
        Self(vec!["*".to_string()])
    }

    pub fn patterns(&self) -> &[String] {
        &self.0
    }

    pub fn includes(&self, module: &Module) -> bool {
        let module = module.as_str();
        self.0.iter().any(|pattern| pattern_matches(pattern, module))
    }
}

fn pattern_matches(pattern: &str, module: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    match pattern.strip_suffix(".*") {
        Some(prefix) => {
            module == prefix
                || module
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
        None => pattern == module,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_lookup_requires_exact_triple() {
        let caps = CapabilitySet::new()
            .grant("finance", "invoices", "view")
            .grant("finance", "invoices", "approve");

        assert!(caps.permits(&"finance".into(), &"invoices".into(), &"view".into()));
        assert!(!caps.permits(&"finance".into(), &"invoices".into(), &"delete".into()));
        assert!(!caps.permits(&"finance".into(), &"payments".into(), &"view".into()));
        assert!(!caps.permits(&"hr".into(), &"invoices".into(), &"view".into()));
    }

    #[test]
    fn capability_set_deserializes_from_nested_json() {
        let json = serde_json::json!({
            "finance": { "invoices": ["view", "export"] },
            "hr": { "leave": ["approve"] }
        });

        let caps: CapabilitySet = serde_json::from_value(json).unwrap();
        assert!(caps.permits(&"hr".into(), &"leave".into(), &"approve".into()));
        assert!(caps.permits(&"finance".into(), &"invoices".into(), &"export".into()));
        assert!(!caps.is_empty());
    }

    #[test]
    fn module_access_patterns() {
        let access = ModuleAccess::new(["finance.*", "hr.attendance"]);

        assert!(access.includes(&"finance".into()));
        assert!(access.includes(&"finance.invoices".into()));
        assert!(!access.includes(&"financeops".into()));
        assert!(access.includes(&"hr.attendance".into()));
        assert!(!access.includes(&"hr".into()));
        assert!(!access.includes(&"hr.payroll".into()));

        assert!(ModuleAccess::all().includes(&"anything".into()));
        assert!(!ModuleAccess::default().includes(&"finance".into()));
    }
}
