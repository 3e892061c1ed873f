//! Identity and session lifecycle for the client.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod store;

pub use principal::{Identity, Principal, ANONYMOUS_PRINCIPAL};
pub use session::{Session, SessionManager, SessionSnapshot, SessionState};
pub use provider::{AuthProvider, Challenge, ChallengePrompt, HttpAuthProvider, StaticAuthProvider, DEFAULT_DELEGATION_TTL};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};
