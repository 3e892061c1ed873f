//! Query/mutation cache over the remote service. Reads are keyed and gated on
//! the session's readiness; writes invalidate a fixed set of keys.

pub mod client;
pub mod key;
pub mod mutations;
pub mod queries;
pub mod registry;
pub mod state;

pub use client::{QueryClient, QueryObserver};
pub use key::{QueryKey, QueryValue};
pub use mutations::{Mutation, MutationArgs, MutationRecord};
pub use queries::needs_profile_setup;
pub use registry::{invalidation_set, MutationOp};
pub use state::{QueryResult, QueryStatus};
