// Navigation collaborator
// Invoked on terminal failures so the application can present the right surface

/// Application-side navigation hooks
pub trait Navigator: Send + Sync {
    /// The session is gone; present a login surface
    fn go_to_login(&self);

    /// An unexpected failure reached the caller; present a generic error surface
    fn go_to_error_surface(&self);
}

/// Navigator for headless use: reports through the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn go_to_login(&self) {
        tracing::warn!("Session ended, sign in again to continue");
    }

    fn go_to_error_surface(&self) {
        tracing::error!("The API reported an unexpected failure");
    }
}
