use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::client::QueryClient;
use super::registry::{invalidation_set, MutationOp};
use crate::actor::{ActorHandle, SubmitPaperArgs, SubmitReviewArgs, UserProfile};
use crate::error::{AppError, AppResult};

/// Arguments of one write operation against the remote service.
#[async_trait]
pub trait MutationArgs: Send + Sync {
    fn op(&self) -> MutationOp;
    /// Short parameter summary for logs and `MutationRecord`.
    fn describe(&self) -> String;
    async fn call(&self, actor: &ActorHandle) -> AppResult<()>;
}

#[async_trait]
impl MutationArgs for UserProfile {
    fn op(&self) -> MutationOp { MutationOp::SaveCallerProfile }
    fn describe(&self) -> String { format!("name={}", self.name) }
    async fn call(&self, actor: &ActorHandle) -> AppResult<()> { actor.save_caller_user_profile(self).await }
}

#[async_trait]
impl MutationArgs for SubmitPaperArgs {
    fn op(&self) -> MutationOp { MutationOp::SubmitPaper }
    fn describe(&self) -> String { format!("id={} citations={}", self.id, self.citations.len()) }
    async fn call(&self, actor: &ActorHandle) -> AppResult<()> { actor.submit_paper(self).await }
}

#[async_trait]
impl MutationArgs for SubmitReviewArgs {
    fn op(&self) -> MutationOp { MutationOp::SubmitReview { paper_id: self.paper_id.clone() } }
    fn describe(&self) -> String { format!("id={} paper={} rating={}", self.id, self.paper_id, self.rating) }
    async fn call(&self, actor: &ActorHandle) -> AppResult<()> { actor.submit_review(self).await }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub operation: &'static str,
    pub params: String,
    pub started_at: DateTime<Utc>,
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); }
}

/// One write operation bound to the cache it invalidates. Never retried.
pub struct Mutation<A> {
    client: QueryClient,
    pending: AtomicUsize,
    last: Mutex<Option<MutationRecord>>,
    _args: PhantomData<fn(&A)>,
}

impl<A: MutationArgs> Mutation<A> {
    pub fn new(client: QueryClient) -> Self {
        Self { client, pending: AtomicUsize::new(0), last: Mutex::new(None), _args: PhantomData }
    }

    pub fn is_pending(&self) -> bool { self.pending.load(Ordering::SeqCst) > 0 }

    pub fn last(&self) -> Option<MutationRecord> { self.last.lock().clone() }

    /// Run the write through the current authenticated handle. On success the
    /// registry's keys are invalidated; on failure the cache is left alone and
    /// the remote error comes back unchanged.
    pub async fn invoke(&self, args: &A) -> AppResult<()> {
        let op = args.op();
        let (accessor, _) = self.client.session().accessor();
        let Some(actor) = accessor.ready_actor().cloned() else {
            warn!(target: "academic_chain::cache", "mutation.refused op={}: no authenticated actor", op.operation_name());
            return Err(AppError::transport("actor_unavailable", "Actor not available: sign in first"));
        };

        let record = MutationRecord { operation: op.operation_name(), params: args.describe(), started_at: Utc::now() };
        info!(target: "academic_chain::cache", "mutation.start op={} {}", record.operation, record.params);
        *self.last.lock() = Some(record);

        let result = {
            let _pending = PendingGuard::enter(&self.pending);
            args.call(&actor).await
        };
        match result {
            Ok(()) => {
                let keys = invalidation_set(&op);
                let refetched = self.client.invalidate(&keys);
                info!(target: "academic_chain::cache", "mutation.ok op={} invalidated={} refetching={}", op.operation_name(), keys.len(), refetched.len());
                Ok(())
            }
            Err(e) => {
                warn!(target: "academic_chain::cache", "mutation.failed op={} {}", op.operation_name(), e);
                Err(e)
            }
        }
    }
}
