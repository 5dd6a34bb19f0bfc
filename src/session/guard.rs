// Route guarding on top of the session state

use std::sync::Arc;

use super::state::SessionMachine;

/// Decision for a navigation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    RedirectToLogin,
}

/// Keeps unauthenticated users away from routes that need a session
#[derive(Clone)]
pub struct RouteGuard {
    session: Arc<SessionMachine>,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionMachine>) -> Self {
        Self { session }
    }

    pub fn check(&self, requires_auth: bool) -> Navigation {
        if requires_auth && !self.session.is_logged_in() {
            Navigation::RedirectToLogin
        } else {
            Navigation::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemoryCredentialStore;
    use crate::session::types::CredentialPair;

    #[test]
    fn test_guard_follows_session() {
        let session = Arc::new(SessionMachine::restore(Arc::new(MemoryCredentialStore::new())));
        let guard = RouteGuard::new(session.clone());

        assert_eq!(guard.check(false), Navigation::Proceed);
        assert_eq!(guard.check(true), Navigation::RedirectToLogin);

        session.on_login(CredentialPair::new("A1", "Bearer"));
        assert_eq!(guard.check(true), Navigation::Proceed);

        // Still authenticated while a refresh is in flight
        session.on_refresh_start();
        assert_eq!(guard.check(true), Navigation::Proceed);

        session.on_logout();
        assert_eq!(guard.check(true), Navigation::RedirectToLogin);
    }
}
