//! Readiness view over the session, shared by every data-fetching path.

use crate::actor::ActorHandle;
use crate::identity::Session;

#[derive(Debug, Clone, Default)]
pub struct ActorAccessor {
    pub actor: Option<ActorHandle>,
    pub authenticated: bool,
}

impl ActorAccessor {
    pub fn from_session(session: &Session) -> Self {
        Self { actor: session.actor.clone(), authenticated: session.authenticated }
    }

    /// A usable handle is present and the user is authenticated.
    pub fn is_ready(&self) -> bool { self.actor.is_some() && self.authenticated }

    /// The handle, only when ready.
    pub fn ready_actor(&self) -> Option<&ActorHandle> {
        if self.is_ready() { self.actor.as_ref() } else { None }
    }
}
