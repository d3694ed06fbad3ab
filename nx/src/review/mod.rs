//! HumanReviewService: the pending-review queue and its resolutions
//!
//! Escalated tasks land here. Reviews persist immediately, sit in an
//! in-memory pending cache, and resolve through approve/reject. On
//! startup, pending rows rehydrate from the store; reviews whose task no
//! longer exists are dropped with a warning rather than resurrected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nexusstore::{Database, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::checkpoint::CheckpointManager;
use crate::domain::{Review, ReviewReason, ReviewStatus};
use crate::events::{EventKind, EventScope};

/// Review operation errors
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Unknown review: {0}")]
    UnknownReview(String),

    #[error("Review already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Request payload for a new review
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub task_id: String,
    pub project_id: String,
    pub reason: ReviewReason,
    pub context: String,
}

/// Human review queue
pub struct HumanReviewService {
    db: Arc<Database>,
    pending: Mutex<HashMap<String, Review>>,
    events: EventScope,
    checkpoints: Option<Arc<CheckpointManager>>,
}

impl HumanReviewService {
    pub fn new(db: Arc<Database>, events: EventScope, checkpoints: Option<Arc<CheckpointManager>>) -> Self {
        Self {
            db,
            pending: Mutex::new(HashMap::new()),
            events,
            checkpoints,
        }
    }

    /// Open a pending review. Persists first, then caches; a safety
    /// checkpoint is attempted but never blocks the request.
    pub async fn request_review(&self, request: ReviewRequest) -> Result<Review, ReviewError> {
        let review = Review::new(&request.task_id, &request.project_id, request.reason, &request.context);
        self.db.upsert_review(&review.to_row())?;
        self.pending.lock().await.insert(review.id.clone(), review.clone());

        if let Some(checkpoints) = &self.checkpoints
            && let Err(e) = checkpoints
                .create_auto_checkpoint(&request.project_id, "review_requested")
                .await
        {
            warn!(error = %e, "Safety checkpoint for review failed");
        }

        info!(review_id = %review.id, task_id = %review.task_id, reason = %review.reason, "Review requested");
        self.events.emit(EventKind::ReviewRequested {
            review_id: review.id.clone(),
            task_id: review.task_id.clone(),
            reason: review.reason.to_string(),
        });
        Ok(review)
    }

    /// Approve a pending review
    pub async fn approve_review(&self, id: &str, resolution: Option<String>) -> Result<Review, ReviewError> {
        let review = self.resolve(id, ReviewStatus::Approved, resolution).await?;
        self.events.emit(EventKind::ReviewApproved {
            review_id: review.id.clone(),
            task_id: review.task_id.clone(),
        });
        Ok(review)
    }

    /// Reject a pending review with feedback
    pub async fn reject_review(&self, id: &str, feedback: impl Into<String>) -> Result<Review, ReviewError> {
        let feedback = feedback.into();
        let review = self.resolve(id, ReviewStatus::Rejected, Some(feedback.clone())).await?;
        self.events.emit(EventKind::ReviewRejected {
            review_id: review.id.clone(),
            task_id: review.task_id.clone(),
            feedback,
        });
        Ok(review)
    }

    async fn resolve(&self, id: &str, status: ReviewStatus, resolution: Option<String>) -> Result<Review, ReviewError> {
        let mut pending = self.pending.lock().await;
        let Some(mut review) = pending.remove(id) else {
            // Not in the pending cache: an id the store has already seen
            // resolved is a duplicate call, anything else is unknown
            return match self.db.get_review(id)? {
                Some(row) if row.status != ReviewStatus::Pending.to_string() => {
                    Err(ReviewError::AlreadyResolved(id.to_string()))
                }
                _ => Err(ReviewError::UnknownReview(id.to_string())),
            };
        };

        review.resolve(status, resolution);
        if let Err(e) = self.db.upsert_review(&review.to_row()) {
            // Put it back so the caller can retry
            pending.insert(id.to_string(), review);
            return Err(e.into());
        }
        info!(review_id = %id, %status, "Review resolved");
        Ok(review)
    }

    /// All pending reviews, oldest first
    pub async fn list_pending(&self) -> Vec<Review> {
        let pending = self.pending.lock().await;
        let mut list: Vec<_> = pending.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Look up a pending review
    pub async fn get_review(&self, id: &str) -> Option<Review> {
        self.pending.lock().await.get(id).cloned()
    }

    /// Rehydrate pending reviews from the store. Reviews referencing
    /// tasks outside `known_tasks` are dropped with a warning - stale
    /// rows must not wedge a fresh run.
    pub async fn rehydrate(&self, known_tasks: &HashSet<String>) -> Result<usize, ReviewError> {
        let rows = self.db.list_reviews_by_status("pending")?;
        let mut pending = self.pending.lock().await;
        let mut restored = 0;

        for row in rows {
            let review = Review::from_row(row);
            if !known_tasks.contains(&review.task_id) {
                warn!(
                    review_id = %review.id,
                    task_id = %review.task_id,
                    "Dropping orphaned pending review (task no longer exists)"
                );
                let mut orphan = review;
                orphan.resolve(ReviewStatus::Rejected, Some("orphaned at startup".to_string()));
                self.db.upsert_review(&orphan.to_row())?;
                continue;
            }
            pending.insert(review.id.clone(), review);
            restored += 1;
        }

        info!(restored, "Rehydrated pending reviews");
        Ok(restored)
    }
}
