use forgeguard_auth::{Principal, PrincipalId, SessionId};

/// Authenticated caller for a request.
///
/// Inserted as a request extension by the auth middleware; handlers behind
/// it can rely on it being present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
    session_id: SessionId,
}

impl PrincipalContext {
    pub fn new(principal: Principal, session_id: SessionId) -> Self {
        Self {
            principal,
            session_id,
        }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}
