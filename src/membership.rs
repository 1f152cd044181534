//! Bulk course membership changes.
//!
//! A [`MembershipChange`] is applied to many courses through the shared
//! [`BatchRunner`]; one failing course never stops the others.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, MoodleClient};
use crate::batch::{BatchError, BatchRunner};
use crate::links::decode_entities;
use crate::model::Course;

/// Default number of simultaneous membership calls.
pub const DEFAULT_MEMBERSHIP_CONCURRENCY: usize = 25;

/// A change applied to the token owner's membership of one course.
#[async_trait]
pub trait MembershipChange: Send + Sync {
    /// Applies the change. Returns `false` when the server reports that
    /// nothing changed.
    async fn apply(&self, course: &Course) -> Result<bool, ApiError>;
}

/// Self-enrolment through the `enrol_self_enrol_user` web-service call.
#[derive(Debug, Clone)]
pub struct SelfEnrol {
    client: MoodleClient,
}

impl SelfEnrol {
    /// Creates the change for the owner of `client`'s token.
    #[must_use]
    pub fn new(client: MoodleClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MembershipChange for SelfEnrol {
    async fn apply(&self, course: &Course) -> Result<bool, ApiError> {
        info!(course = %decode_entities(&course.full_name), "enrolling");
        self.client.self_enrol(course.id).await
    }
}

/// Counters for one membership batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MembershipSummary {
    /// Courses whose membership changed.
    pub applied: usize,
    /// Courses the server left unchanged.
    pub unchanged: usize,
    /// Courses where the call failed.
    pub failed: usize,
}

/// Courses from `candidates` the user is not yet enrolled in.
#[must_use]
pub fn pending_enrolments(candidates: Vec<Course>, enrolled: &[Course]) -> Vec<Course> {
    let enrolled: HashSet<u64> = enrolled.iter().map(|course| course.id).collect();
    candidates
        .into_iter()
        .filter(|course| !enrolled.contains(&course.id))
        .collect()
}

/// Applies `change` to every course with at most `concurrency` calls in flight.
///
/// # Errors
///
/// Returns [`BatchError::InvalidConcurrency`] if `concurrency` is outside 1-100.
#[instrument(skip_all, fields(courses = courses.len(), concurrency))]
pub async fn run_membership_batch(
    courses: Vec<Course>,
    change: Arc<dyn MembershipChange>,
    concurrency: usize,
) -> Result<MembershipSummary, BatchError> {
    let runner = BatchRunner::new(concurrency)?;
    let results = runner
        .run(courses, move |course| {
            let change = Arc::clone(&change);
            async move {
                change.apply(&course).await.map_err(|error| {
                    warn!(course_id = course.id, error = %error, "membership change failed");
                    error
                })
            }
        })
        .await;

    let mut summary = MembershipSummary::default();
    for result in results {
        match result {
            Ok(true) => summary.applied += 1,
            Ok(false) => summary.unchanged += 1,
            Err(_) => summary.failed += 1,
        }
    }
    info!(
        applied = summary.applied,
        unchanged = summary.unchanged,
        failed = summary.failed,
        "membership batch complete"
    );
    Ok(summary)
}
