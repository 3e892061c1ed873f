//! In-process stand-in for the remote service. Backs the CLI's `--offline`
//! mode and the test suites: it counts calls per operation, can hold a call
//! until released, and can fail the next call of an operation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::factory::{Connector, TrustAnchor};
use super::{Backend, Paper, Review, SubmitPaperArgs, SubmitReviewArgs, UserProfile, UserRole};
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, Principal};

#[derive(Default)]
struct Data {
    papers: Vec<Paper>,
    reviews: Vec<Review>,
    profiles: HashMap<Principal, UserProfile>,
    roles: HashMap<Principal, UserRole>,
    admin_initialized: bool,
}

pub struct MemoryState {
    data: Mutex<Data>,
    calls: Mutex<HashMap<&'static str, usize>>,
    holds: Mutex<HashMap<&'static str, VecDeque<oneshot::Receiver<()>>>>,
    failures: Mutex<HashMap<&'static str, VecDeque<AppError>>>,
    root_key: RwLock<Option<String>>,
    builds: AtomicUsize,
}

impl MemoryState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(Data::default()),
            calls: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            root_key: RwLock::new(Some("local-replica-root-key".to_string())),
            builds: AtomicUsize::new(0),
        })
    }

    pub fn seed_paper(&self, paper: Paper) { self.data.lock().papers.push(paper); }
    pub fn seed_review(&self, review: Review) { self.data.lock().reviews.push(review); }
    pub fn set_profile(&self, user: &Principal, profile: UserProfile) { self.data.lock().profiles.insert(user.clone(), profile); }
    pub fn profile(&self, user: &Principal) -> Option<UserProfile> { self.data.lock().profiles.get(user).cloned() }
    pub fn papers(&self) -> Vec<Paper> { self.data.lock().papers.clone() }
    pub fn set_root_key(&self, key: Option<String>) { *self.root_key.write() = key; }

    /// Number of times `method` was invoked through any handle.
    pub fn calls(&self, method: &str) -> usize { self.calls.lock().get(method).copied().unwrap_or(0) }
    pub fn total_calls(&self) -> usize { self.calls.lock().values().sum() }
    pub fn builds(&self) -> usize { self.builds.load(Ordering::SeqCst) }

    /// The next call of `method` computes its reply immediately but does not
    /// return it until the returned sender fires (or is dropped).
    pub fn hold_next(&self, method: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.holds.lock().entry(method).or_default().push_back(rx);
        tx
    }

    pub fn fail_next(&self, method: &'static str, err: AppError) {
        self.failures.lock().entry(method).or_default().push_back(err);
    }

    fn record(&self, method: &'static str) {
        *self.calls.lock().entry(method).or_insert(0) += 1;
    }

    fn take_hold(&self, method: &'static str) -> Option<oneshot::Receiver<()>> {
        self.holds.lock().get_mut(method).and_then(|q| q.pop_front())
    }

    fn take_failure(&self, method: &'static str) -> Option<AppError> {
        self.failures.lock().get_mut(method).and_then(|q| q.pop_front())
    }
}

pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new(state: Arc<MemoryState>) -> Self { Self { state } }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn connect(&self, identity: Option<&Identity>, trust: Arc<TrustAnchor>) -> Arc<dyn Backend> {
        self.state.builds.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryBackend { state: self.state.clone(), caller: identity.map(|i| i.principal.clone()), trust })
    }

    async fn fetch_root_key(&self) -> AppResult<String> {
        self.state.record("fetch_root_key");
        self.state.root_key.read().clone().ok_or_else(|| AppError::transport("replica_unreachable", "no local replica answered"))
    }
}

pub struct MemoryBackend {
    state: Arc<MemoryState>,
    caller: Option<Principal>,
    trust: Arc<TrustAnchor>,
}

fn now_nanos() -> i64 { Utc::now().timestamp_nanos_opt().unwrap_or(0) }

fn identity_required() -> AppError {
    AppError::auth("caller_identity_required", "Unauthorized: anonymous callers cannot perform this operation")
}

impl MemoryBackend {
    /// Shared call path: count, compute, wait for a hold, then apply
    /// injected failures and the trust check.
    async fn call<T>(&self, method: &'static str, compute: impl FnOnce(&mut Data, Option<&Principal>) -> AppResult<T>) -> AppResult<T> {
        self.state.record(method);
        let reply = {
            let mut data = self.state.data.lock();
            compute(&mut data, self.caller.as_ref())
        };
        if let Some(rx) = self.state.take_hold(method) {
            let _ = rx.await;
        }
        if let Some(err) = self.state.take_failure(method) {
            return Err(err);
        }
        let presented = self.state.root_key.read().clone();
        self.trust.verify(presented.as_deref())?;
        reply
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn assign_caller_user_role(&self, user: &Principal, role: UserRole) -> AppResult<()> {
        let user = user.clone();
        self.call("assign_caller_user_role", move |d, caller| {
            let caller = caller.ok_or_else(identity_required)?;
            if d.roles.get(caller) != Some(&UserRole::Admin) {
                return Err(AppError::rejected("remote_rejected", "Unauthorized: only admins can assign user roles"));
            }
            d.roles.insert(user, role);
            Ok(())
        }).await
    }

    async fn get_all_papers(&self) -> AppResult<Vec<Paper>> {
        self.call("get_all_papers", |d, _| Ok(d.papers.clone())).await
    }

    async fn get_caller_user_profile(&self) -> AppResult<Option<UserProfile>> {
        self.call("get_caller_user_profile", |d, caller| {
            let caller = caller.ok_or_else(identity_required)?;
            Ok(d.profiles.get(caller).cloned())
        }).await
    }

    async fn get_caller_user_role(&self) -> AppResult<UserRole> {
        self.call("get_caller_user_role", |d, caller| {
            Ok(caller.and_then(|c| d.roles.get(c).copied()).unwrap_or(if caller.is_some() { UserRole::User } else { UserRole::Guest }))
        }).await
    }

    async fn get_paper(&self, paper_id: &str) -> AppResult<Option<Paper>> {
        let id = paper_id.to_string();
        self.call("get_paper", move |d, _| Ok(d.papers.iter().find(|p| p.id == id).cloned())).await
    }

    async fn get_reviews_for_paper(&self, paper_id: &str) -> AppResult<Vec<Review>> {
        let id = paper_id.to_string();
        self.call("get_reviews_for_paper", move |d, _| Ok(d.reviews.iter().filter(|r| r.paper_id == id).cloned().collect())).await
    }

    async fn get_user_profile(&self, user: &Principal) -> AppResult<Option<UserProfile>> {
        let user = user.clone();
        self.call("get_user_profile", move |d, _| Ok(d.profiles.get(&user).cloned())).await
    }

    async fn get_user_token_balance(&self) -> AppResult<u64> {
        self.call("get_user_token_balance", |d, caller| {
            let caller = caller.ok_or_else(identity_required)?;
            Ok(d.profiles.get(caller).map(|p| p.token_balance).unwrap_or(0))
        }).await
    }

    async fn initialize_access_control(&self) -> AppResult<()> {
        self.call("initialize_access_control", |d, caller| {
            let caller = caller.ok_or_else(identity_required)?;
            if !d.admin_initialized {
                d.roles.insert(caller.clone(), UserRole::Admin);
                d.admin_initialized = true;
            } else {
                d.roles.entry(caller.clone()).or_insert(UserRole::User);
            }
            Ok(())
        }).await
    }

    async fn is_caller_admin(&self) -> AppResult<bool> {
        self.call("is_caller_admin", |d, caller| Ok(caller.map(|c| d.roles.get(c) == Some(&UserRole::Admin)).unwrap_or(false))).await
    }

    async fn save_caller_user_profile(&self, profile: &UserProfile) -> AppResult<()> {
        let profile = profile.clone();
        self.call("save_caller_user_profile", move |d, caller| {
            let caller = caller.ok_or_else(identity_required)?;
            d.profiles.insert(caller.clone(), profile);
            Ok(())
        }).await
    }

    async fn submit_paper(&self, args: &SubmitPaperArgs) -> AppResult<()> {
        let args = args.clone();
        self.call("submit_paper", move |d, caller| {
            let caller = caller.ok_or_else(identity_required)?.clone();
            if d.papers.iter().any(|p| p.id == args.id) {
                return Err(AppError::rejected("remote_rejected".to_string(), format!("paper {} already exists", args.id)));
            }
            for cited in &args.citations {
                if !d.papers.iter().any(|p| &p.id == cited) {
                    return Err(AppError::rejected("remote_rejected".to_string(), format!("cited paper {} does not exist", cited)));
                }
                if !d.reviews.iter().any(|r| &r.paper_id == cited && r.reviewer == caller) {
                    return Err(AppError::rejected("remote_rejected".to_string(), format!("must review paper before citing it: {}", cited)));
                }
            }
            d.papers.push(Paper {
                id: args.id,
                title: args.title,
                abstract_text: args.abstract_text,
                author: caller,
                submission_date: now_nanos(),
                citations: args.citations,
                review_count: 0,
                aggregate_rating: 0.0,
                file_reference: args.file_reference,
                external_link: args.external_link,
            });
            Ok(())
        }).await
    }

    async fn submit_review(&self, args: &SubmitReviewArgs) -> AppResult<()> {
        let args = args.clone();
        self.call("submit_review", move |d, caller| {
            let caller = caller.ok_or_else(identity_required)?.clone();
            if !(1..=5).contains(&args.rating) {
                return Err(AppError::rejected("remote_rejected", "rating must be between 1 and 5"));
            }
            if !d.papers.iter().any(|p| p.id == args.paper_id) {
                return Err(AppError::rejected("remote_rejected".to_string(), format!("paper {} does not exist", args.paper_id)));
            }
            d.reviews.push(Review {
                id: args.id,
                paper_id: args.paper_id.clone(),
                reviewer: caller,
                rating: args.rating,
                feedback: args.feedback,
                submission_date: now_nanos(),
            });
            let ratings: Vec<u64> = d.reviews.iter().filter(|r| r.paper_id == args.paper_id).map(|r| r.rating).collect();
            if let Some(paper) = d.papers.iter_mut().find(|p| p.id == args.paper_id) {
                paper.review_count = ratings.len() as u64;
                paper.aggregate_rating = ratings.iter().sum::<u64>() as f64 / ratings.len() as f64;
            }
            Ok(())
        }).await
    }
}

/// A paper authored by `author`, for seeding.
pub fn sample_paper(id: &str, title: &str, author: &Principal) -> Paper {
    Paper {
        id: id.to_string(),
        title: title.to_string(),
        abstract_text: format!("Abstract of {}", title),
        author: author.clone(),
        submission_date: now_nanos(),
        citations: Vec::new(),
        review_count: 0,
        aggregate_rating: 0.0,
        file_reference: None,
        external_link: None,
    }
}
