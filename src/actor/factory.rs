use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::Backend;
use crate::config::Network;
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, Principal};

/// Root key of a non-production replica. Replies are only trusted once the
/// key is installed; on the public network nothing is required.
#[derive(Debug)]
pub struct TrustAnchor {
    required: bool,
    key: RwLock<Option<String>>,
}

impl TrustAnchor {
    pub fn new(required: bool) -> Self { Self { required, key: RwLock::new(None) } }
    pub fn is_required(&self) -> bool { self.required }
    pub fn key(&self) -> Option<String> { self.key.read().clone() }
    pub fn install(&self, key: String) { *self.key.write() = Some(key); }

    /// Check the key a replica presented with its reply.
    pub fn verify(&self, presented: Option<&str>) -> AppResult<()> {
        if !self.required { return Ok(()); }
        let guard = self.key.read();
        match (guard.as_deref(), presented) {
            (None, _) => Err(AppError::transport(
                "untrusted_replica",
                "replica root key was never fetched; ensure the local replica is running",
            )),
            (Some(trusted), Some(p)) if trusted != p => Err(AppError::transport(
                "untrusted_replica",
                "replica presented a root key that does not match the trusted one",
            )),
            _ => Ok(()),
        }
    }
}

/// Transport-specific construction of a backend for one identity.
#[async_trait]
pub trait Connector: Send + Sync {
    fn connect(&self, identity: Option<&Identity>, trust: Arc<TrustAnchor>) -> Arc<dyn Backend>;
    async fn fetch_root_key(&self) -> AppResult<String>;
}

/// A callable handle. Cloning shares the same underlying backend.
#[derive(Clone)]
pub struct ActorHandle {
    backend: Arc<dyn Backend>,
    principal: Option<Principal>,
}

impl ActorHandle {
    pub fn principal(&self) -> Option<&Principal> { self.principal.as_ref() }
    pub fn is_anonymous(&self) -> bool { self.principal.is_none() }
    /// Same handle instance, not merely the same identity.
    pub fn ptr_eq(a: &ActorHandle, b: &ActorHandle) -> bool { Arc::ptr_eq(&a.backend, &b.backend) }
}

impl Deref for ActorHandle {
    type Target = dyn Backend;
    fn deref(&self) -> &Self::Target { self.backend.as_ref() }
}

impl Debug for ActorHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.principal {
            Some(p) => write!(f, "ActorHandle({})", p),
            None => f.write_str("ActorHandle(anonymous)"),
        }
    }
}

#[derive(Clone)]
pub struct ActorFactory {
    connector: Arc<dyn Connector>,
    network: Network,
    trust: Arc<TrustAnchor>,
    bootstrap_started: Arc<AtomicBool>,
}

impl ActorFactory {
    pub fn new(connector: Arc<dyn Connector>, network: Network) -> Self {
        Self {
            connector,
            network,
            trust: Arc::new(TrustAnchor::new(!network.is_production())),
            bootstrap_started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn network(&self) -> Network { self.network }
    pub fn trust(&self) -> Arc<TrustAnchor> { self.trust.clone() }

    /// Build a handle for `identity`, or an anonymous one. Never blocks on
    /// the trust bootstrap; the first build merely starts it.
    pub fn build(&self, identity: Option<&Identity>) -> ActorHandle {
        self.spawn_trust_bootstrap();
        let backend = self.connector.connect(identity, self.trust.clone());
        let principal = identity.map(|i| i.principal.clone());
        debug!(target: "academic_chain::actor", "actor.build principal={}", principal.as_ref().map(|p| p.as_str()).unwrap_or("anonymous"));
        ActorHandle { backend, principal }
    }

    fn spawn_trust_bootstrap(&self) {
        if self.network.is_production() || self.bootstrap_started.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let this = self.clone();
                rt.spawn(async move {
                    this.bootstrap_trust().await;
                });
            }
            Err(_) => {
                // retried on the next build made from inside a runtime
                self.bootstrap_started.store(false, Ordering::SeqCst);
                warn!(target: "academic_chain::actor", "trust.bootstrap deferred: no async runtime");
            }
        }
    }

    /// Fetch and install the replica root key. Best effort: a failure is
    /// logged and later calls fail with `untrusted_replica`.
    pub async fn bootstrap_trust(&self) -> bool {
        if !self.trust.is_required() || self.trust.key().is_some() {
            return true;
        }
        match self.connector.fetch_root_key().await {
            Ok(key) => {
                self.trust.install(key);
                info!(target: "academic_chain::actor", "trust.bootstrap root key installed");
                true
            }
            Err(e) => {
                warn!(target: "academic_chain::actor", "trust.bootstrap failed, is the local replica running? {}", e);
                false
            }
        }
    }
}
