//! Callable handles bound to the remote service interface.
//! `Backend` is the fixed interface; `ActorFactory` builds a handle for the
//! current identity (or none) through a `Connector`.

mod types;
mod factory;
mod http;
pub mod memory;

pub use types::{new_record_id, ExternalBlob, Paper, Review, SubmitPaperArgs, SubmitReviewArgs, Time, UserProfile, UserRole};
pub use factory::{ActorFactory, ActorHandle, Connector, TrustAnchor};
pub use http::{HttpBackend, HttpConnector, ROOT_KEY_HEADER};

use async_trait::async_trait;

use crate::error::AppResult;
use crate::identity::Principal;

/// The remote service's operations. Reads have no side effects; mutations
/// are called at most once per user action and never retried here.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn assign_caller_user_role(&self, user: &Principal, role: UserRole) -> AppResult<()>;
    async fn get_all_papers(&self) -> AppResult<Vec<Paper>>;
    async fn get_caller_user_profile(&self) -> AppResult<Option<UserProfile>>;
    async fn get_caller_user_role(&self) -> AppResult<UserRole>;
    async fn get_paper(&self, paper_id: &str) -> AppResult<Option<Paper>>;
    async fn get_reviews_for_paper(&self, paper_id: &str) -> AppResult<Vec<Review>>;
    async fn get_user_profile(&self, user: &Principal) -> AppResult<Option<UserProfile>>;
    async fn get_user_token_balance(&self) -> AppResult<u64>;
    async fn initialize_access_control(&self) -> AppResult<()>;
    async fn is_caller_admin(&self) -> AppResult<bool>;
    async fn save_caller_user_profile(&self, profile: &UserProfile) -> AppResult<()>;
    async fn submit_paper(&self, args: &SubmitPaperArgs) -> AppResult<()>;
    async fn submit_review(&self, args: &SubmitReviewArgs) -> AppResult<()>;
}
