//! Persistence seam for courses, content and enrollments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    CatalogFilter, Course, Enrollment, InstructorFilter, Lesson, LessonProgress, Module, Page,
    ProgressReport,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("record already exists")]
    Duplicate,
    /// Deleting would orphan lesson progress and the policy forbids it.
    #[error("record is referenced by lesson progress")]
    InUse,
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// What happens to LessonProgress rows when their lesson goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LessonDeletePolicy {
    /// Delete the progress rows; affected enrollments are recomputed.
    #[default]
    Cascade,
    /// Refuse to delete a lesson anyone has progress on.
    Reject,
}

impl fmt::Display for LessonDeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LessonDeletePolicy::Cascade => f.write_str("cascade"),
            LessonDeletePolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for LessonDeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cascade" => Ok(LessonDeletePolicy::Cascade),
            "reject" => Ok(LessonDeletePolicy::Reject),
            other => Err(format!("unknown lesson delete policy `{other}`")),
        }
    }
}

/// Storage operations the services are written against.
///
/// Soft-deleted courses are invisible to every read. Listing methods return
/// modules and lessons ordered by their parent, then `order`.
///
/// # Implementations
///
/// - `PgStore`: PostgreSQL via sqlx
/// - `MemoryStore`: in-process tables, used by tests and the `memory` backend
#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Duplicate` when the slug is taken.
    async fn insert_course(&self, course: &Course) -> Result<Course>;
    async fn update_course(&self, course: &Course) -> Result<Course>;
    async fn soft_delete_course(&self, course_id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn course_by_id(&self, course_id: Uuid) -> Result<Option<Course>>;
    async fn course_by_slug(&self, slug: &str) -> Result<Option<Course>>;
    /// Courses visible at `now`, filtered, sorted and paginated.
    async fn catalog(&self, filter: &CatalogFilter, now: DateTime<Utc>) -> Result<Page<Course>>;
    /// An instructor's own courses, newest first.
    async fn instructor_courses(
        &self,
        instructor_id: Uuid,
        filter: &InstructorFilter,
    ) -> Result<Page<Course>>;
    async fn all_instructor_courses(&self, instructor_id: Uuid) -> Result<Vec<Course>>;

    /// Fails with `Duplicate` when the slug is taken within the course.
    async fn insert_module(&self, module: &Module) -> Result<Module>;
    async fn update_module(&self, module: &Module) -> Result<Module>;
    async fn module_by_id(&self, module_id: Uuid) -> Result<Option<Module>>;
    async fn modules_for_courses(&self, course_ids: &[Uuid]) -> Result<Vec<Module>>;
    /// Deletes the module and its lessons. Returns the enrollments whose
    /// progress rows were removed.
    async fn delete_module(&self, module_id: Uuid, policy: LessonDeletePolicy)
        -> Result<Vec<Uuid>>;

    /// Fails with `Duplicate` when the slug is taken within the module.
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<Lesson>;
    async fn update_lesson(&self, lesson: &Lesson) -> Result<Lesson>;
    async fn lesson_by_id(&self, lesson_id: Uuid) -> Result<Option<Lesson>>;
    async fn lessons_for_modules(&self, module_ids: &[Uuid]) -> Result<Vec<Lesson>>;
    /// Returns the enrollments whose progress rows were removed.
    async fn delete_lesson(&self, lesson_id: Uuid, policy: LessonDeletePolicy)
        -> Result<Vec<Uuid>>;

    /// Fails with `Duplicate` when the user already holds an enrollment for
    /// the course, including when a concurrent writer got there first.
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment>;
    async fn enrollment_for(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Enrollment>>;
    /// Newest enrollment first.
    async fn enrollments_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>>;
    /// Removes the enrollment and its progress rows. Returns whether a row existed.
    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> Result<bool>;

    async fn progress_for_enrollment(&self, enrollment_id: Uuid) -> Result<Vec<LessonProgress>>;
    /// Get-or-create the (enrollment, lesson) row, apply the report and
    /// recompute the enrollment, all under one per-enrollment lock.
    async fn record_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        report: &ProgressReport,
        now: DateTime<Utc>,
    ) -> Result<(LessonProgress, Enrollment)>;
    /// Recount and persist the derived fields of one enrollment.
    async fn recompute_enrollment(&self, enrollment_id: Uuid, now: DateTime<Utc>)
        -> Result<Enrollment>;
}
