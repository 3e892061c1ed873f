use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use super::principal::{Identity, Principal};
use super::provider::AuthProvider;
use super::store::CredentialStore;
use crate::accessor::ActorAccessor;
use crate::actor::{ActorFactory, ActorHandle};
use crate::error::AppError;
use crate::tprintln;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Anonymous,
    Authenticating,
    Authenticated,
}

/// `actor` is present exactly when `identity` is; both are replaced together.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub authenticated: bool,
    pub identity: Option<Identity>,
    pub actor: Option<ActorHandle>,
}

impl Session {
    fn anonymous() -> Self { Self::default() }

    fn authenticated(identity: Identity, actor: ActorHandle) -> Self {
        Self { authenticated: true, identity: Some(identity), actor: Some(actor) }
    }
}

/// What observers of the session see on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub authenticated: bool,
    pub principal: Option<Principal>,
    pub generation: u64,
}

struct Inner {
    state: SessionState,
    session: Session,
    /// Bumped on every identity change; late results from an older
    /// generation must not be applied.
    generation: u64,
    /// Bumped per login attempt and on logout, so a ceremony that finishes
    /// after it was superseded is discarded.
    ceremony: u64,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            authenticated: self.session.authenticated,
            principal: self.session.identity.as_ref().map(|i| i.principal.clone()),
            generation: self.generation,
        }
    }
}

/// Sole owner and mutator of the [`Session`].
pub struct SessionManager {
    inner: RwLock<Inner>,
    factory: ActorFactory,
    provider: Arc<dyn AuthProvider>,
    store: Arc<dyn CredentialStore>,
    changes: watch::Sender<SessionSnapshot>,
    errors: broadcast::Sender<AppError>,
}

impl SessionManager {
    pub fn new(factory: ActorFactory, provider: Arc<dyn AuthProvider>, store: Arc<dyn CredentialStore>) -> Self {
        let inner = Inner { state: SessionState::Uninitialized, session: Session::anonymous(), generation: 0, ceremony: 0 };
        let (changes, _) = watch::channel(inner.snapshot());
        let (errors, _) = broadcast::channel(16);
        Self { inner: RwLock::new(inner), factory, provider, store, changes, errors }
    }

    pub fn factory(&self) -> &ActorFactory { &self.factory }
    pub fn state(&self) -> SessionState { self.inner.read().state }
    pub fn is_authenticated(&self) -> bool { self.inner.read().session.authenticated }
    pub fn generation(&self) -> u64 { self.inner.read().generation }
    pub fn snapshot(&self) -> SessionSnapshot { self.inner.read().snapshot() }
    pub fn session(&self) -> Session { self.inner.read().session.clone() }
    pub fn principal(&self) -> Option<Principal> { self.inner.read().session.identity.as_ref().map(|i| i.principal.clone()) }
    pub fn current_actor(&self) -> Option<ActorHandle> { self.inner.read().session.actor.clone() }

    /// Readiness view and the generation it was taken in, read atomically.
    pub fn accessor(&self) -> (ActorAccessor, u64) {
        let g = self.inner.read();
        (ActorAccessor::from_session(&g.session), g.generation)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> { self.changes.subscribe() }
    pub fn subscribe_errors(&self) -> broadcast::Receiver<AppError> { self.errors.subscribe() }

    fn publish(&self) {
        let snap = self.inner.read().snapshot();
        self.changes.send_replace(snap);
    }

    fn report(&self, err: AppError) {
        warn!(target: "academic_chain::identity", "session.error {}", err);
        // no subscribers is fine, the log line above is the record
        let _ = self.errors.send(err);
    }

    /// Resolve a previously persisted credential without user interaction.
    /// Never fails: anything that goes wrong leaves the session anonymous.
    pub async fn restore(&self) {
        match self.state() {
            SessionState::Authenticated | SessionState::Authenticating => {
                tprintln!("session.restore skipped: already {:?}", self.state());
                return;
            }
            SessionState::Uninitialized | SessionState::Anonymous => {}
        }
        let ticket = self.inner.read().ceremony;

        let loaded = match self.store.load().await {
            Ok(v) => v,
            Err(e) => {
                self.report(e.into());
                None
            }
        };
        let identity = match loaded {
            Some(id) if id.is_expired() => {
                info!(target: "academic_chain::identity", "session.restore credential for {} expired", id.principal);
                if let Err(e) = self.store.clear().await {
                    self.report(e.into());
                }
                None
            }
            other => other,
        };

        let actor = identity.as_ref().map(|id| self.factory.build(Some(id)));
        {
            let mut g = self.inner.write();
            if g.ceremony != ticket || matches!(g.state, SessionState::Authenticated | SessionState::Authenticating) {
                // a login or logout overtook this restore
                let settled = g.state == SessionState::Uninitialized;
                if settled {
                    g.state = SessionState::Anonymous;
                }
                drop(g);
                if settled {
                    self.publish();
                }
                return;
            }
            match (identity, actor) {
                (Some(id), Some(actor)) => {
                    info!(target: "academic_chain::identity", "session.restore principal={}", id.principal);
                    g.session = Session::authenticated(id, actor);
                    g.state = SessionState::Authenticated;
                    g.generation += 1;
                }
                _ => {
                    g.state = SessionState::Anonymous;
                }
            }
        }
        self.publish();
    }

    /// Run the authentication ceremony. Returns whether the session ended
    /// up authenticated; failures go to the error channel, not the caller.
    pub async fn login(&self) -> bool {
        let ticket = {
            let mut g = self.inner.write();
            match g.state {
                SessionState::Authenticated => return true,
                SessionState::Authenticating => {
                    warn!(target: "academic_chain::identity", "session.login ignored: a login is already in progress");
                    return false;
                }
                SessionState::Uninitialized => {
                    warn!(target: "academic_chain::identity", "session.login ignored: session not restored yet");
                    return false;
                }
                SessionState::Anonymous => {}
            }
            g.state = SessionState::Authenticating;
            g.ceremony += 1;
            g.ceremony
        };
        self.publish();

        match self.provider.authenticate().await {
            Ok(identity) => {
                // persist first; the ticket check below decides whether it stays
                if let Err(e) = self.store.save(&identity).await {
                    // still logged in for this process, just not restorable
                    error!(target: "academic_chain::identity", "session.login could not persist credential: {}", e);
                    self.report(e.into());
                }
                let actor = self.factory.build(Some(&identity));
                let committed = {
                    let mut g = self.inner.write();
                    if g.ceremony != ticket || g.state != SessionState::Authenticating {
                        false
                    } else {
                        g.session = Session::authenticated(identity.clone(), actor);
                        g.state = SessionState::Authenticated;
                        g.generation += 1;
                        true
                    }
                };
                if !committed {
                    info!(target: "academic_chain::identity", "session.login discarded: superseded while authenticating");
                    // a logout may have cleared the store before the save above landed
                    if let Err(e) = self.store.clear().await {
                        self.report(e.into());
                    }
                    return false;
                }
                self.publish();
                info!(target: "academic_chain::identity", "session.login principal={}", identity.principal);
                true
            }
            Err(e) => {
                let reverted = {
                    let mut g = self.inner.write();
                    if g.ceremony == ticket && g.state == SessionState::Authenticating {
                        g.state = SessionState::Anonymous;
                        true
                    } else {
                        false
                    }
                };
                if reverted {
                    self.publish();
                }
                self.report(e);
                false
            }
        }
    }

    /// Drop the identity and its handle, then revoke the stored credential.
    /// The in-memory session is cleared before the first suspension point.
    pub async fn logout(&self) {
        let changed = {
            let mut g = self.inner.write();
            g.ceremony += 1;
            let had_identity = g.session.identity.is_some();
            if had_identity {
                g.session = Session::anonymous();
                g.generation += 1;
            }
            let prev = g.state;
            if matches!(prev, SessionState::Authenticated | SessionState::Authenticating) {
                g.state = SessionState::Anonymous;
            }
            had_identity || prev != g.state
        };
        if changed {
            self.publish();
            info!(target: "academic_chain::identity", "session.logout");
        }
        if let Err(e) = self.store.clear().await {
            self.report(e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::memory::{MemoryConnector, MemoryState};
    use crate::config::Network;
    use crate::identity::{MemoryCredentialStore, StaticAuthProvider, StoreError};
    use chrono::{Duration, Utc};

    fn identity(p: &str) -> Identity {
        Identity { principal: Principal::new(p), delegation: "d".into(), expires_at: Utc::now() + Duration::hours(1) }
    }

    fn manager(provider: StaticAuthProvider, store: Arc<MemoryCredentialStore>) -> (SessionManager, Arc<MemoryState>) {
        let state = MemoryState::new();
        let factory = ActorFactory::new(Arc::new(MemoryConnector::new(state.clone())), Network::Ic);
        (SessionManager::new(factory, Arc::new(provider), store), state)
    }

    #[tokio::test]
    async fn restore_without_credential_is_anonymous() {
        let (sm, state) = manager(StaticAuthProvider::scripted(vec![]), Arc::new(MemoryCredentialStore::new()));
        assert_eq!(sm.state(), SessionState::Uninitialized);
        sm.restore().await;
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(sm.current_actor().is_none());
        assert_eq!(state.builds(), 0);
    }

    #[tokio::test]
    async fn restore_with_credential_authenticates() {
        let store = Arc::new(MemoryCredentialStore::with_identity(identity("alice")));
        let (sm, _) = manager(StaticAuthProvider::scripted(vec![]), store);
        sm.restore().await;
        assert_eq!(sm.state(), SessionState::Authenticated);
        assert_eq!(sm.principal(), Some(Principal::new("alice")));
        assert_eq!(sm.generation(), 1);
        let s = sm.session();
        assert_eq!(s.actor.is_some(), s.identity.is_some());
    }

    #[tokio::test]
    async fn restore_drops_expired_credential() {
        let mut id = identity("alice");
        id.expires_at = Utc::now() - Duration::minutes(1);
        let store = Arc::new(MemoryCredentialStore::with_identity(id));
        let (sm, _) = manager(StaticAuthProvider::scripted(vec![]), store.clone());
        sm.restore().await;
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(store.peek().is_none());
    }

    #[tokio::test]
    async fn login_before_restore_is_ignored() {
        let provider = StaticAuthProvider::approving(identity("alice"));
        let (sm, _) = manager(provider, Arc::new(MemoryCredentialStore::new()));
        assert!(!sm.login().await);
        assert_eq!(sm.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn login_success_persists_and_publishes() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (sm, _) = manager(StaticAuthProvider::approving(identity("alice")), store.clone());
        let mut rx = sm.subscribe();
        sm.restore().await;
        assert!(sm.login().await);
        assert_eq!(sm.state(), SessionState::Authenticated);
        assert_eq!(store.peek().map(|i| i.principal), Some(Principal::new("alice")));
        let snap = rx.borrow_and_update().clone();
        assert!(snap.authenticated);
        assert_eq!(snap.generation, 1);
        // already authenticated: no second ceremony
        assert!(sm.login().await);
    }

    #[tokio::test]
    async fn login_failure_reverts_and_reports() {
        let provider = StaticAuthProvider::scripted(vec![Err(AppError::auth("login_cancelled", "window closed"))]);
        let (sm, _) = manager(provider, Arc::new(MemoryCredentialStore::new()));
        let mut errors = sm.subscribe_errors();
        sm.restore().await;
        assert!(!sm.login().await);
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(sm.current_actor().is_none());
        let err = errors.try_recv().unwrap();
        assert_eq!(err.code_str(), "login_cancelled");
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (sm, _) = manager(StaticAuthProvider::approving(identity("alice")), store.clone());
        sm.restore().await;
        assert!(sm.login().await);
        sm.logout().await;
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(!sm.is_authenticated());
        assert!(sm.current_actor().is_none());
        assert!(store.peek().is_none());
        assert_eq!(sm.generation(), 2);
        let (acc, _) = sm.accessor();
        assert!(!acc.is_ready());
    }

    #[tokio::test]
    async fn restore_when_authenticated_keeps_handle() {
        let store = Arc::new(MemoryCredentialStore::new());
        let (sm, state) = manager(StaticAuthProvider::approving(identity("alice")), store);
        sm.restore().await;
        sm.login().await;
        let before = sm.current_actor().unwrap();
        let builds = state.builds();
        let generation = sm.generation();
        sm.restore().await;
        let after = sm.current_actor().unwrap();
        assert!(ActorHandle::ptr_eq(&before, &after));
        assert_eq!(state.builds(), builds);
        assert_eq!(sm.generation(), generation);
    }

    /// Memory store whose reads and writes take a while.
    struct SlowStore {
        inner: MemoryCredentialStore,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl CredentialStore for SlowStore {
        async fn load(&self) -> Result<Option<Identity>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.load().await
        }
        async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.save(identity).await
        }
        async fn clear(&self) -> Result<(), StoreError> { self.inner.clear().await }
    }

    fn slow_manager(provider: StaticAuthProvider, store: Arc<SlowStore>) -> Arc<SessionManager> {
        let factory = ActorFactory::new(Arc::new(MemoryConnector::new(MemoryState::new())), Network::Ic);
        Arc::new(SessionManager::new(factory, Arc::new(provider), store))
    }

    fn slow_store() -> Arc<SlowStore> {
        Arc::new(SlowStore { inner: MemoryCredentialStore::new(), delay: std::time::Duration::from_millis(50) })
    }

    async fn wait_for(sm: &SessionManager, state: SessionState) {
        let mut rx = sm.subscribe();
        while rx.borrow_and_update().state != state {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn logout_while_credential_is_saving_wins() {
        let store = slow_store();
        let sm = slow_manager(StaticAuthProvider::approving(identity("alice")), store.clone());
        sm.restore().await;

        let login = tokio::spawn({
            let sm = sm.clone();
            async move { sm.login().await }
        });
        wait_for(&sm, SessionState::Authenticating).await;
        sm.logout().await;

        assert!(!login.await.unwrap());
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(store.inner.peek().is_none());
        sm.restore().await;
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(sm.principal().is_none());
    }

    #[tokio::test]
    async fn logout_after_login_leaves_nothing_to_restore() {
        let store = slow_store();
        let sm = slow_manager(StaticAuthProvider::approving(identity("alice")), store.clone());
        sm.restore().await;

        let login = tokio::spawn({
            let sm = sm.clone();
            async move { sm.login().await }
        });
        wait_for(&sm, SessionState::Authenticated).await;
        sm.logout().await;
        assert!(login.await.unwrap());

        assert!(store.inner.peek().is_none());
        sm.restore().await;
        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(sm.principal().is_none());
    }

    #[tokio::test]
    async fn logout_during_restore_still_settles_anonymous() {
        let store = Arc::new(SlowStore {
            inner: MemoryCredentialStore::with_identity(identity("alice")),
            delay: std::time::Duration::from_millis(50),
        });
        let sm = slow_manager(StaticAuthProvider::approving(identity("bob")), store.clone());

        let restore = tokio::spawn({
            let sm = sm.clone();
            async move { sm.restore().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sm.logout().await;
        restore.await.unwrap();

        assert_eq!(sm.state(), SessionState::Anonymous);
        assert!(sm.principal().is_none());
        assert!(sm.login().await);
        assert_eq!(sm.principal(), Some(Principal::new("bob")));
    }
}
