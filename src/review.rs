use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{ReviewWrite, Store};
use crate::error::ReviewError;
use crate::types::{ReviewRecord, ReviewVerdict};

pub const MAX_NOTES_CHARS: usize = 2000;

/// A reviewer's decision on one flag.
#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub flag_id: Uuid,
    pub verdict: ReviewVerdict,
    pub notes: String,
    pub reviewer: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Validate and apply a review. Moves between the two verdicts freely; never back to `Unreviewed`.
pub async fn submit_review(
    store: &dyn Store,
    submission: ReviewSubmission,
) -> Result<ReviewRecord, ReviewError> {
    if submission.verdict == ReviewVerdict::Unreviewed {
        return Err(ReviewError::UnreviewedVerdict);
    }
    let reviewer = submission.reviewer.trim();
    if reviewer.is_empty() {
        return Err(ReviewError::MissingReviewer);
    }
    let notes = submission.notes.trim();
    if notes.chars().count() > MAX_NOTES_CHARS {
        return Err(ReviewError::NotesTooLong {
            max: MAX_NOTES_CHARS,
        });
    }

    let record = ReviewRecord {
        verdict: submission.verdict,
        notes: notes.to_string(),
        reviewer: reviewer.to_string(),
        reviewed_at: submission.reviewed_at,
    };

    match store.record_review(submission.flag_id, &record).await? {
        ReviewWrite::Applied => {
            tracing::info!(
                flag_id = %submission.flag_id,
                verdict = record.verdict.as_str(),
                reviewer = %record.reviewer,
                "Review recorded"
            );
            Ok(record)
        }
        ReviewWrite::Stale => {
            tracing::warn!(
                flag_id = %submission.flag_id,
                reviewer = %record.reviewer,
                "Rejected stale review"
            );
            Err(ReviewError::Stale(submission.flag_id))
        }
        ReviewWrite::NotFound => Err(ReviewError::FlagNotFound(submission.flag_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::testing::{at, customer, new_flag, transaction};
    use crate::types::FlagStatus;

    async fn seeded() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let c = customer(1, Some("US"));
        let tx = transaction(&c, "withdrawal", "15000.00", "2024-03-01T03:24:00Z");
        store.insert_customer(c).await;
        store.insert_transaction(tx.clone()).await;
        let flag = store
            .insert_flag_if_absent(&new_flag(&tx, "LARGE_CASH_WITHDRAWAL", 85))
            .await
            .unwrap()
            .unwrap();
        (store, flag.id)
    }

    fn submission(flag_id: Uuid, verdict: ReviewVerdict, reviewer: &str, when: &str) -> ReviewSubmission {
        ReviewSubmission {
            flag_id,
            verdict,
            notes: format!("{reviewer} checked the counterparty"),
            reviewer: reviewer.to_string(),
            reviewed_at: at(when),
        }
    }

    #[tokio::test]
    async fn test_review_transitions() {
        let (store, id) = seeded().await;

        submit_review(
            &store,
            submission(id, ReviewVerdict::TruePositive, "analyst-1", "2024-03-02T09:00:00Z"),
        )
        .await
        .unwrap();
        submit_review(
            &store,
            submission(id, ReviewVerdict::FalsePositive, "analyst-2", "2024-03-02T10:00:00Z"),
        )
        .await
        .unwrap();

        let flag = store.get_flag(id).await.unwrap().unwrap();
        assert_eq!(flag.review.verdict, ReviewVerdict::FalsePositive);
        assert_eq!(flag.review.reviewer.as_deref(), Some("analyst-2"));
        assert_eq!(flag.review.reviewed_at, Some(at("2024-03-02T10:00:00Z")));
        // Investigation status is independent of the verdict
        assert_eq!(flag.status, FlagStatus::Pending);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (store, id) = seeded().await;

        submit_review(
            &store,
            submission(id, ReviewVerdict::TruePositive, "late", "2024-03-02T12:00:00Z"),
        )
        .await
        .unwrap();
        let err = submit_review(
            &store,
            submission(id, ReviewVerdict::FalsePositive, "early", "2024-03-02T11:00:00Z"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::Stale(_)));

        let flag = store.get_flag(id).await.unwrap().unwrap();
        assert_eq!(flag.review.verdict, ReviewVerdict::TruePositive);
        assert_eq!(flag.review.reviewer.as_deref(), Some("late"));
        assert_eq!(
            flag.review.notes.as_deref(),
            Some("late checked the counterparty")
        );
    }

    #[tokio::test]
    async fn test_invalid_submissions() {
        let (store, id) = seeded().await;

        let err = submit_review(
            &store,
            submission(id, ReviewVerdict::Unreviewed, "analyst", "2024-03-02T09:00:00Z"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::UnreviewedVerdict));

        let err = submit_review(
            &store,
            submission(id, ReviewVerdict::TruePositive, "   ", "2024-03-02T09:00:00Z"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::MissingReviewer));

        let mut long = submission(id, ReviewVerdict::TruePositive, "analyst", "2024-03-02T09:00:00Z");
        long.notes = "n".repeat(MAX_NOTES_CHARS + 1);
        let err = submit_review(&store, long).await.unwrap_err();
        assert!(matches!(err, ReviewError::NotesTooLong { .. }));

        let err = submit_review(
            &store,
            submission(Uuid::new_v4(), ReviewVerdict::TruePositive, "analyst", "2024-03-02T09:00:00Z"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::FlagNotFound(_)));

        let flag = store.get_flag(id).await.unwrap().unwrap();
        assert_eq!(flag.review.verdict, ReviewVerdict::Unreviewed);
    }
}
