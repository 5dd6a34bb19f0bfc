// Session state machine
// LoggedOut / LoggedIn / Refreshing, kept consistent with the credential store

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use super::store::CredentialStore;
use super::types::{CredentialPair, CredentialSnapshot, Generation, SessionState};

struct Inner {
    state: SessionState,

    /// Present whenever `state` is LoggedIn or Refreshing
    current: Option<CredentialSnapshot>,

    /// Highest generation ever handed out; never reused within the process
    last_generation: Option<Generation>,

    /// Set once the login surface was requested for the current logout
    login_prompted: bool,
}

/// Observable in-memory session state
///
/// Every mutator is a single transition performed under one lock, with the
/// credential store written inside the same critical section, so no reader
/// can see `LoggedIn` next to a stale or missing pair.
pub struct SessionMachine {
    inner: Mutex<Inner>,
    store: Arc<dyn CredentialStore>,
    tx: watch::Sender<SessionState>,
}

impl SessionMachine {
    /// Derive the initial state from whatever the store holds
    pub fn restore(store: Arc<dyn CredentialStore>) -> Self {
        let current = store.load().map(|pair| CredentialSnapshot {
            generation: Generation::FIRST,
            pair,
        });

        let state = match &current {
            Some(snapshot) => SessionState::LoggedIn(snapshot.generation),
            None => SessionState::LoggedOut,
        };
        tracing::info!("Session restored: {}", state);

        let (tx, _) = watch::channel(state);
        Self {
            inner: Mutex::new(Inner {
                state,
                last_generation: current.as_ref().map(|s| s.generation),
                current,
                login_prompted: false,
            }),
            store,
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Fields are only assigned after the store call, so a poisoned Inner is consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.tx.send_replace(state);
    }

    fn persist(&self, pair: &CredentialPair) {
        if let Err(e) = self.store.save(pair) {
            tracing::error!("Failed to persist credentials: {:#}", e);
        }
    }

    fn forget(&self) {
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear persisted credentials: {:#}", e);
        }
    }

    fn next_generation(inner: &mut Inner) -> Generation {
        let generation = inner
            .last_generation
            .map(Generation::next)
            .unwrap_or(Generation::FIRST);
        inner.last_generation = Some(generation);
        generation
    }

    pub fn current(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_logged_in(&self) -> bool {
        self.current().is_logged_in()
    }

    /// Current pair and its generation, `None` when logged out
    pub fn snapshot(&self) -> Option<CredentialSnapshot> {
        self.lock().current.clone()
    }

    /// Receiver that observes every transition
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Record a successful sign-in; replaces any existing session
    pub fn on_login(&self, pair: CredentialPair) -> Generation {
        let mut inner = self.lock();
        self.persist(&pair);

        let generation = Self::next_generation(&mut inner);
        inner.current = Some(CredentialSnapshot { generation, pair });
        inner.login_prompted = false;
        self.publish(&mut inner, SessionState::LoggedIn(generation));

        tracing::info!("Logged in ({})", generation);
        generation
    }

    /// LoggedIn(g) -> Refreshing(g); `None` if there is nothing to refresh
    pub fn on_refresh_start(&self) -> Option<Generation> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::LoggedIn(generation) => {
                self.publish(&mut inner, SessionState::Refreshing(generation));
                tracing::debug!("Refreshing credentials ({})", generation);
                Some(generation)
            }
            other => {
                tracing::debug!("Refresh start ignored in state: {}", other);
                None
            }
        }
    }

    /// Refreshing(g) -> LoggedIn(g+1)
    ///
    /// Returns `None` and leaves everything untouched when the session is no
    /// longer refreshing `generation` (an explicit logout or login happened
    /// while the refresh was in flight). A pair without a refresh token keeps
    /// the previous one.
    pub fn on_refresh_success(
        &self,
        generation: Generation,
        mut pair: CredentialPair,
    ) -> Option<CredentialSnapshot> {
        let mut inner = self.lock();
        if inner.state != SessionState::Refreshing(generation) {
            tracing::info!(
                "Discarding refreshed credentials for {}, session is now {}",
                generation,
                inner.state
            );
            return None;
        }

        if pair.refresh_token.is_none() {
            pair.refresh_token = inner
                .current
                .as_ref()
                .and_then(|s| s.pair.refresh_token.clone());
        }
        self.persist(&pair);

        let next = Self::next_generation(&mut inner);
        let snapshot = CredentialSnapshot {
            generation: next,
            pair,
        };
        inner.current = Some(snapshot.clone());
        self.publish(&mut inner, SessionState::LoggedIn(next));

        tracing::info!("Credentials refreshed ({} -> {})", generation, next);
        Some(snapshot)
    }

    /// Refreshing(g) -> LoggedOut, clearing the store
    /// Returns false when the session already moved on.
    pub fn on_refresh_failure(&self, generation: Generation) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Refreshing(generation) {
            return false;
        }

        self.forget();
        inner.current = None;
        self.publish(&mut inner, SessionState::LoggedOut);

        tracing::warn!("Credential refresh failed, session ended ({})", generation);
        true
    }

    /// Any state -> LoggedOut, clearing the store
    /// Returns whether a session was actually ended.
    pub fn on_logout(&self) -> bool {
        let mut inner = self.lock();
        self.forget();

        let was_logged_in = inner.state.is_logged_in();
        inner.current = None;
        if was_logged_in {
            self.publish(&mut inner, SessionState::LoggedOut);
            tracing::info!("Logged out");
        }
        was_logged_in
    }

    /// True exactly once per logout: whoever gets it presents the login surface
    pub fn claim_login_prompt(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.is_logged_in() || inner.login_prompted {
            return false;
        }
        inner.login_prompted = true;
        true
    }
}
