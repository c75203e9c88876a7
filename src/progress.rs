//! Derived enrollment progress.
//!
//! Progress is always a full recount: total lessons in the course against the
//! enrollment's completed LessonProgress rows. Nothing here is incremental, so
//! running it twice over the same rows yields the same result.

use chrono::{DateTime, Utc};

use crate::models::{Enrollment, EnrollmentStatus, LessonProgress, ProgressReport};

/// Raw counts the aggregate is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Every lesson under every module of the course, regardless of visibility.
    pub total_lessons: i64,
    pub completed_lessons: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub progress: i32,
    pub status: EnrollmentStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

/// `round(completed / total * 100)`, half rounding up; 0 for an empty course.
pub fn percent(completed: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    let completed = completed.clamp(0, total);
    ((completed * 200 + total) / (total * 2)) as i32
}

pub fn derive(tally: Tally, now: DateTime<Utc>) -> Derived {
    let progress = percent(tally.completed_lessons, tally.total_lessons);
    // Completion is the exact ratio, not the rounded percent: 199 of 200 rounds
    // to 100 but is still active.
    let done = tally.total_lessons > 0 && tally.completed_lessons >= tally.total_lessons;
    Derived {
        progress,
        status: if done {
            EnrollmentStatus::Completed
        } else {
            EnrollmentStatus::Active
        },
        // recomputed on every pass, so it is cleared once progress drops
        completed_at: done.then_some(now),
    }
}

impl Enrollment {
    pub fn apply(&mut self, derived: Derived) {
        self.progress = derived.progress;
        self.status = derived.status;
        self.completed_at = derived.completed_at;
    }
}

impl LessonProgress {
    /// Overwrites the row with a client report.
    ///
    /// `completed_at` records the first completion only and survives a later
    /// revert to incomplete.
    pub fn apply_report(&mut self, report: &ProgressReport, now: DateTime<Utc>) {
        self.completed = report.completed;
        self.watch_time = report.watch_time;
        self.last_watched_at = now;
        if report.completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}
