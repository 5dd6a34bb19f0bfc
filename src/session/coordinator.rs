// Single-flight refresh coordination
// At most one refresh call per credential generation; every concurrent
// caller receives the outcome of that one call.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::oneshot;

use super::refresh::Refresher;
use super::state::SessionMachine;
use super::types::{CredentialPair, Generation};
use crate::error::SessionError;

/// Why a refresh did not produce credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct RefreshFailure {
    /// False when the refresh endpoint rejected the session itself
    pub retryable: bool,
    pub reason: String,
}

impl RefreshFailure {
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self {
            retryable: false,
            reason: reason.into(),
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            retryable: true,
            reason: reason.into(),
        }
    }

    fn from_error(err: &SessionError) -> Self {
        match err {
            SessionError::AuthorizationExpired | SessionError::Validation { .. } => {
                Self::terminal(format!("refresh rejected: {}", err))
            }
            other => Self::retryable(format!("refresh failed: {}", other)),
        }
    }
}

impl From<RefreshFailure> for SessionError {
    fn from(failure: RefreshFailure) -> Self {
        SessionError::SessionExpired {
            retryable: failure.retryable,
            reason: failure.reason,
        }
    }
}

type Outcome = Result<CredentialPair, RefreshFailure>;

/// The one live refresh; waiters are settled in attachment order
struct PendingRefresh {
    generation: Generation,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

struct Inner {
    session: Arc<SessionMachine>,
    refresher: Arc<dyn Refresher>,
    pending: Mutex<Option<PendingRefresh>>,
}

/// Sole dispatcher of refresh calls
///
/// Lock order: the pending slot is taken before the session lock, never the
/// other way around.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(session: Arc<SessionMachine>, refresher: Arc<dyn Refresher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                refresher,
                pending: Mutex::new(None),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a refresh call is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.pending().is_some()
    }

    #[cfg(test)]
    fn waiters(&self) -> usize {
        self.pending().as_ref().map_or(0, |p| p.waiters.len())
    }

    /// Obtain credentials newer than `failed`
    ///
    /// Joins the in-flight refresh if there is one; returns the current pair
    /// without any call if the session already moved past `failed`;
    /// otherwise dispatches exactly one refresh and waits for it.
    ///
    /// A refresh started for a generation older than `failed` belongs to a
    /// superseded session: the caller waits for it to settle and then asks
    /// again, so the newer session gets a refresh of its own.
    pub async fn request_refresh(&self, failed: Generation) -> Result<CredentialPair, RefreshFailure> {
        loop {
            let (rx, superseded) = {
                let mut slot = self.pending();
                let session = &self.inner.session;

                if !session.is_logged_in() {
                    return Err(RefreshFailure::terminal("no active session to refresh"));
                }

                let (tx, rx) = oneshot::channel();
                if let Some(pending) = slot.as_mut() {
                    let superseded = pending.generation < failed;
                    tracing::debug!(
                        failed = %failed,
                        refreshing = %pending.generation,
                        waiters = pending.waiters.len() + 1,
                        superseded = superseded,
                        "Joining in-flight refresh"
                    );
                    pending.waiters.push(tx);
                    (rx, superseded)
                } else {
                    let current = match session.snapshot() {
                        Some(snapshot) => snapshot,
                        None => return Err(RefreshFailure::terminal("no active session to refresh")),
                    };

                    if current.generation != failed {
                        tracing::debug!(
                            failed = %failed,
                            current = %current.generation,
                            "Credentials already refreshed, skipping refresh call"
                        );
                        return Ok(current.pair);
                    }

                    let generation = match session.on_refresh_start() {
                        Some(generation) => generation,
                        None => return Err(RefreshFailure::terminal("session cannot be refreshed")),
                    };

                    *slot = Some(PendingRefresh {
                        generation,
                        waiters: vec![tx],
                    });
                    self.dispatch(generation, current.pair);
                    (rx, false)
                }
            };

            let outcome = rx.await.unwrap_or_else(|_| {
                Err(RefreshFailure::retryable("refresh was abandoned before settling"))
            });
            if !superseded {
                return outcome;
            }
        }
    }

    /// Spawn the refresh call; waiters are settled even if every caller is dropped
    fn dispatch(&self, generation: Generation, current: CredentialPair) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(this.inner.refresher.refresh(&current))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(SessionError::Internal(anyhow::anyhow!("refresh call panicked")))
                });
            this.settle(generation, result);
        });
    }

    fn settle(&self, generation: Generation, result: Result<CredentialPair, SessionError>) {
        let mut slot = self.pending();
        let pending = match slot.take() {
            Some(pending) if pending.generation == generation => pending,
            other => {
                tracing::error!("Refresh for {} settled without a matching pending entry", generation);
                *slot = other;
                return;
            }
        };

        let session = &self.inner.session;
        let outcome = match result {
            Ok(pair) => match session.on_refresh_success(generation, pair) {
                Some(snapshot) => Ok(snapshot.pair),
                // Logout or re-login raced the refresh: its result is dropped
                None => match (session.is_logged_in(), session.snapshot()) {
                    (true, Some(snapshot)) => Ok(snapshot.pair),
                    _ => Err(RefreshFailure::terminal(
                        "session ended while the refresh was in flight",
                    )),
                },
            },
            Err(err) => {
                let failure = RefreshFailure::from_error(&err);
                if session.on_refresh_failure(generation) {
                    Err(failure)
                } else {
                    // A re-login happened meanwhile; its pair is newer than the one that failed
                    match (session.is_logged_in(), session.snapshot()) {
                        (true, Some(snapshot)) => Ok(snapshot.pair),
                        _ => Err(failure),
                    }
                }
            }
        };

        tracing::debug!(
            generation = %generation,
            waiters = pending.waiters.len(),
            success = outcome.is_ok(),
            "Settling refresh"
        );

        for waiter in pending.waiters {
            // A dropped receiver only means that caller went away
            let _ = waiter.send(outcome.clone());
        }
    }
}
