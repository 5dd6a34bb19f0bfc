// Session module
// Credential persistence, session state, and single-flight refresh

mod coordinator;
mod guard;
mod refresh;
mod state;
mod store;
mod types;

pub use coordinator::{RefreshCoordinator, RefreshFailure};
pub use guard::{Navigation, RouteGuard};
pub use refresh::{decode_issued_credentials, RefreshEndpoint, Refresher};
pub use state::SessionMachine;
pub use store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore, AUTH_CONTEXT_KEY};
pub use types::{CredentialPair, CredentialSnapshot, Generation, LoginRequest, SessionState};
