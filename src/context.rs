//! Application context: one session, one cache and the mutations bound to it.
//! Everything a front end needs is reached from here; there are no globals.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info};

use crate::actor::{ActorFactory, ActorHandle, Connector, HttpConnector, Paper, SubmitPaperArgs, SubmitReviewArgs, UserProfile, UserRole};
use crate::cache::{needs_profile_setup, Mutation, QueryClient};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{
    AuthProvider, Challenge, ChallengePrompt, CredentialStore, FileCredentialStore, HttpAuthProvider, Principal, SessionManager,
};

/// The signed-in user's own papers and how they were received.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub principal: Principal,
    pub profile: Option<UserProfile>,
    pub papers: Vec<Paper>,
    pub total_reviews: u64,
    pub avg_rating: f64,
}

impl DashboardSummary {
    pub fn from_papers(principal: Principal, profile: Option<UserProfile>, all: &[Paper]) -> Self {
        let papers: Vec<Paper> = all.iter().filter(|p| p.author == principal).cloned().collect();
        let total_reviews = papers.iter().map(|p| p.review_count).sum();
        let avg_rating = if papers.is_empty() {
            0.0
        } else {
            papers.iter().map(|p| p.aggregate_rating).sum::<f64>() / papers.len() as f64
        };
        Self { principal, profile, papers, total_reviews, avg_rating }
    }
}

pub struct AppContext {
    config: Config,
    session: Arc<SessionManager>,
    queries: QueryClient,
    pub save_profile: Mutation<UserProfile>,
    pub submit_paper: Mutation<SubmitPaperArgs>,
    pub submit_review: Mutation<SubmitReviewArgs>,
}

impl AppContext {
    pub fn new(config: Config, connector: Arc<dyn Connector>, provider: Arc<dyn AuthProvider>, store: Arc<dyn CredentialStore>) -> Self {
        let factory = ActorFactory::new(connector, config.network);
        let session = Arc::new(SessionManager::new(factory, provider, store));
        let queries = QueryClient::new(session.clone(), config.gc_time);
        Self {
            save_profile: Mutation::new(queries.clone()),
            submit_paper: Mutation::new(queries.clone()),
            submit_review: Mutation::new(queries.clone()),
            config,
            session,
            queries,
        }
    }

    /// Wire the HTTP transport, the device-flow login and the credential file.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let connector = HttpConnector::from_config(&config)?;
        let prompt: ChallengePrompt = Arc::new(print_challenge);
        let provider = HttpAuthProvider::new(connector.client(), &config.identity_provider, prompt);
        let store = FileCredentialStore::new(config.credential_path());
        info!(target: "academic_chain::context", "context.http host={} canister={} network={:?}", config.host, config.canister_id, config.network);
        Ok(Self::new(config, Arc::new(connector), Arc::new(provider), Arc::new(store)))
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn session(&self) -> &Arc<SessionManager> { &self.session }
    pub fn queries(&self) -> &QueryClient { &self.queries }

    /// Install the replica root key (best effort), restore a persisted login,
    /// then bring the cache in line with it.
    pub async fn init(&self) {
        self.session.factory().bootstrap_trust().await;
        self.session.restore().await;
        self.queries.on_session_changed();
    }

    pub async fn login(&self) -> bool {
        let ok = self.session.login().await;
        self.queries.on_session_changed();
        ok
    }

    pub async fn logout(&self) {
        self.session.logout().await;
        self.queries.on_session_changed();
    }

    /// Public paper list through an anonymous handle. Bypasses the cache and
    /// the readiness gate, so it works before login.
    pub async fn browse_papers(&self) -> AppResult<Vec<Paper>> {
        let anon = self.session.factory().build(None);
        let papers = anon.get_all_papers().await?;
        debug!(target: "academic_chain::context", "browse papers={}", papers.len());
        Ok(papers)
    }

    pub async fn needs_profile_setup(&self) -> bool {
        let profile = self.queries.caller_profile().await;
        needs_profile_setup(self.session.is_authenticated(), &profile)
    }

    /// None while not signed in.
    pub async fn dashboard(&self) -> AppResult<Option<DashboardSummary>> {
        let Some(principal) = self.session.principal() else {
            return Ok(None);
        };
        let papers = self.queries.all_papers().await;
        if let Some(e) = papers.error.clone() {
            return Err(e);
        }
        if papers.is_not_ready() {
            return Ok(None);
        }
        let profile = self.queries.caller_profile().await.value.flatten();
        Ok(Some(DashboardSummary::from_papers(principal, profile, &papers.value_or_default())))
    }

    fn ready_actor(&self) -> AppResult<ActorHandle> {
        let (accessor, _) = self.session.accessor();
        accessor
            .ready_actor()
            .cloned()
            .ok_or_else(|| AppError::transport("actor_unavailable", "Actor not available: sign in first"))
    }

    // Role and admin calls are rare and not cached.

    pub async fn caller_role(&self) -> AppResult<UserRole> { self.ready_actor()?.get_caller_user_role().await }

    pub async fn is_admin(&self) -> AppResult<bool> { self.ready_actor()?.is_caller_admin().await }

    pub async fn initialize_access_control(&self) -> AppResult<()> { self.ready_actor()?.initialize_access_control().await }

    pub async fn assign_role(&self, user: &Principal, role: UserRole) -> AppResult<()> {
        self.ready_actor()?.assign_caller_user_role(user, role).await
    }

    pub async fn user_profile(&self, user: &Principal) -> AppResult<Option<UserProfile>> {
        self.ready_actor()?.get_user_profile(user).await
    }

    pub fn shutdown(&self) {
        let dropped = self.queries.len();
        self.queries.clear();
        info!(target: "academic_chain::context", "context.shutdown entries={}", dropped);
    }
}

fn print_challenge(c: &Challenge) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "To sign in, open {} and enter code {}", c.verification_url, c.user_code);
    let _ = out.flush();
}
