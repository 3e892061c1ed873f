//! Which reads each write makes stale. One table, kept in one place.

use super::key::QueryKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    SaveCallerProfile,
    SubmitPaper,
    SubmitReview { paper_id: String },
}

impl MutationOp {
    pub fn operation_name(&self) -> &'static str {
        match self {
            MutationOp::SaveCallerProfile => "saveCallerUserProfile",
            MutationOp::SubmitPaper => "submitPaper",
            MutationOp::SubmitReview { .. } => "submitReview",
        }
    }
}

/// Keys to invalidate once `op` has succeeded.
pub fn invalidation_set(op: &MutationOp) -> Vec<QueryKey> {
    match op {
        MutationOp::SaveCallerProfile => vec![QueryKey::CallerProfile],
        // the author's reputation and balance live on the profile
        MutationOp::SubmitPaper => vec![QueryKey::AllPapers, QueryKey::CallerProfile],
        MutationOp::SubmitReview { paper_id } => vec![
            QueryKey::ReviewsForPaper(paper_id.clone()),
            QueryKey::Paper(paper_id.clone()),
            QueryKey::AllPapers,
            QueryKey::CallerProfile,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(op: MutationOp) -> BTreeSet<QueryKey> { invalidation_set(&op).into_iter().collect() }

    #[test]
    fn review_invalidates_paper_scoped_keys_only_for_that_paper() {
        let keys = set(MutationOp::SubmitReview { paper_id: "p1".into() });
        let expected: BTreeSet<QueryKey> = [
            QueryKey::ReviewsForPaper("p1".into()),
            QueryKey::Paper("p1".into()),
            QueryKey::AllPapers,
            QueryKey::CallerProfile,
        ]
        .into_iter()
        .collect();
        assert_eq!(keys, expected);
        assert!(!keys.contains(&QueryKey::Paper("p2".into())));
        assert!(!keys.contains(&QueryKey::TokenBalance));
    }

    #[test]
    fn profile_and_paper_sets() {
        assert_eq!(invalidation_set(&MutationOp::SaveCallerProfile), vec![QueryKey::CallerProfile]);
        assert_eq!(set(MutationOp::SubmitPaper), [QueryKey::AllPapers, QueryKey::CallerProfile].into_iter().collect());
    }
}
