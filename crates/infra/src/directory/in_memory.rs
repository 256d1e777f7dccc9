use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use forgeguard_auth::{DirectoryError, Principal, ProfileDirectory, Role};
use forgeguard_core::{PrincipalId, RoleId};

/// In-memory profile directory for tests and dev.
#[derive(Debug, Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<PrincipalId, Principal>>,
    offline: AtomicBool,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, principal: Principal) {
        if let Ok(mut map) = self.profiles.write() {
            map.insert(principal.id, principal);
        }
    }

    pub fn remove(&self, id: PrincipalId) -> Option<Principal> {
        self.profiles.write().ok()?.remove(&id)
    }

    /// Replace the role definition on every principal holding `role.id`.
    /// Returns how many profiles changed.
    pub fn update_role(&self, role: &Role) -> usize {
        let Ok(mut map) = self.profiles.write() else {
            return 0;
        };
        let mut changed = 0;
        for principal in map.values_mut().filter(|p| p.role.id == role.id) {
            principal.role = role.clone();
            changed += 1;
        }
        changed
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("profile store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn profile_with_role(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Option<Principal>, DirectoryError> {
        self.check_online()?;
        let map = self
            .profiles
            .read()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".to_string()))?;
        Ok(map.get(&principal_id).cloned())
    }

    async fn principals_with_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<PrincipalId>, DirectoryError> {
        self.check_online()?;
        let map = self
            .profiles
            .read()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".to_string()))?;
        Ok(map
            .values()
            .filter(|p| p.role.id == role_id)
            .map(|p| p.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use forgeguard_auth::{CapabilitySet, DataScope, ModuleAccess, RoleCode};

    use super::*;

    fn principal(role: &Role) -> Principal {
        Principal {
            id: PrincipalId::new(),
            display_name: "someone".to_string(),
            role: role.clone(),
            org_unit_id: None,
            group_id: None,
            module_access: ModuleAccess::all(),
        }
    }

    #[tokio::test]
    async fn role_updates_reach_every_holder() {
        let role = Role {
            id: RoleId::new(),
            code: RoleCode::new("clerk"),
            data_scope: DataScope::SelfOnly,
            can_manage_subordinates: false,
            capabilities: CapabilitySet::new(),
        };
        let dir = InMemoryProfileDirectory::new();
        let a = principal(&role);
        let b = principal(&role);
        dir.upsert(a.clone());
        dir.upsert(b.clone());

        let mut holders = dir.principals_with_role(role.id).await.unwrap();
        holders.sort_by_key(|id| *id.as_uuid());
        let mut expected = vec![a.id, b.id];
        expected.sort_by_key(|id| *id.as_uuid());
        assert_eq!(holders, expected);

        let widened = Role {
            capabilities: CapabilitySet::new().grant("finance", "invoices", "view"),
            ..role.clone()
        };
        assert_eq!(dir.update_role(&widened), 2);
        let reloaded = dir.profile_with_role(a.id).await.unwrap().unwrap();
        assert_eq!(reloaded.role, widened);
    }

    #[tokio::test]
    async fn offline_directory_reports_unavailable() {
        let dir = InMemoryProfileDirectory::new();
        dir.set_offline(true);
        assert!(matches!(
            dir.profile_with_role(PrincipalId::new()).await,
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
