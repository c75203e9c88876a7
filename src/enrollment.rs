//! Student-side operations: enrolling, reporting lesson progress and the
//! views built on top of an enrollment.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::access::{module_trees, upcoming};
use crate::error::AppError;
use crate::identity::{Actor, Role};
use crate::models::{
    Course, EnrolledCourse, Enrollment, EnrollmentStatus, LearnLesson, LearnModule, LearnView,
    MyCourses, ProgressOutcome, ProgressReport, ScheduledItem, StudentStats,
};
use crate::store::StoreError;
use crate::visibility::{lesson_reachable, Schedulable};
use crate::AppState;

/// Enrolls the actor in a visible course.
///
/// A second request for the same course is answered with
/// `AppError::AlreadyEnrolled` and leaves the existing row untouched, also when
/// two requests race and the store's uniqueness constraint decides.
#[tracing::instrument(skip_all, fields(user_id = %actor.id, slug = %slug))]
pub async fn enroll(state: &AppState, actor: &Actor, slug: &str) -> Result<Enrollment, AppError> {
    actor.require(Role::Student)?;
    let now = state.now();
    let course = state
        .store
        .course_by_slug(slug)
        .await?
        .filter(|c| c.is_visible(now))
        .ok_or(AppError::NotFound)?;

    if state.store.enrollment_for(actor.id, course.id).await?.is_some() {
        return Err(AppError::AlreadyEnrolled);
    }
    let enrollment = match state
        .store
        .insert_enrollment(&Enrollment::new(actor.id, course.id, now))
        .await
    {
        Ok(e) => e,
        Err(StoreError::Duplicate) => return Err(AppError::AlreadyEnrolled),
        Err(e) => return Err(e.into()),
    };
    tracing::info!(course_id = %course.id, enrollment_id = %enrollment.id, "enrolled");
    Ok(enrollment)
}

/// Removes the actor's enrollment and its lesson progress. Succeeds whether or
/// not an enrollment existed.
#[tracing::instrument(skip_all, fields(user_id = %actor.id, slug = %slug))]
pub async fn unenroll(state: &AppState, actor: &Actor, slug: &str) -> Result<(), AppError> {
    actor.require(Role::Student)?;
    let course = state
        .store
        .course_by_slug(slug)
        .await?
        .ok_or(AppError::NotFound)?;
    let removed = state.store.delete_enrollment(actor.id, course.id).await?;
    tracing::info!(course_id = %course.id, removed, "unenrolled");
    Ok(())
}

/// Applies a progress report for one lesson and returns the row together with
/// the recomputed enrollment.
#[tracing::instrument(skip_all, fields(user_id = %actor.id, %lesson_id))]
pub async fn record_progress(
    state: &AppState,
    actor: &Actor,
    lesson_id: Uuid,
    report: ProgressReport,
) -> Result<ProgressOutcome, AppError> {
    actor.require(Role::Student)?;
    report.validate()?;

    let lesson = state
        .store
        .lesson_by_id(lesson_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let module = state
        .store
        .module_by_id(lesson.module_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let course = state
        .store
        .course_by_id(module.course_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let enrollment = state
        .store
        .enrollment_for(actor.id, course.id)
        .await?
        .ok_or(AppError::NotEnrolled)?;

    let written = state
        .store
        .record_progress(enrollment.id, lesson.id, &report, state.now())
        .await;
    let (progress, enrollment) = match written {
        Ok(written) => written,
        // the lesson was deleted or the student unenrolled since the lookup
        Err(StoreError::NotFound) => {
            return Err(match state.store.lesson_by_id(lesson.id).await? {
                None => AppError::NotFound,
                Some(_) => AppError::NotEnrolled,
            })
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(
        enrollment_id = %enrollment.id,
        progress = enrollment.progress,
        status = ?enrollment.status,
        "progress recomputed"
    );
    Ok(ProgressOutcome {
        progress,
        enrollment,
    })
}

/// Recounts the given enrollments after content they referenced went away.
/// Enrollments deleted in the meantime are skipped.
pub(crate) async fn refresh_enrollments(
    state: &AppState,
    enrollment_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    for id in enrollment_ids {
        match state.store.recompute_enrollment(*id, now).await {
            Ok(e) => tracing::info!(enrollment_id = %e.id, progress = e.progress, "progress recomputed"),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(user_id = %actor.id))]
pub async fn my_courses(state: &AppState, actor: &Actor) -> Result<MyCourses, AppError> {
    actor.require(Role::Student)?;
    let mut stats = StudentStats::default();
    let mut enrollments = Vec::new();
    for enrollment in state.store.enrollments_for_user(actor.id).await? {
        match enrollment.status {
            EnrollmentStatus::Active => stats.in_progress += 1,
            EnrollmentStatus::Completed => stats.completed += 1,
        }
        // soft-deleted courses drop out of the list but still count
        if let Some(course) = state.store.course_by_id(enrollment.course_id).await? {
            enrollments.push(EnrolledCourse { enrollment, course });
        }
    }
    Ok(MyCourses { enrollments, stats })
}

/// The enrolled student's course outline with their own progress. Lessons that
/// are not released yet keep their place in the outline but not their content.
#[tracing::instrument(skip_all, fields(user_id = %actor.id, slug = %slug))]
pub async fn learn(state: &AppState, actor: &Actor, slug: &str) -> Result<LearnView, AppError> {
    actor.require(Role::Student)?;
    let now = state.now();
    let course = state
        .store
        .course_by_slug(slug)
        .await?
        .ok_or(AppError::NotFound)?;
    let enrollment = state
        .store
        .enrollment_for(actor.id, course.id)
        .await?
        .ok_or(AppError::NotEnrolled)?;

    let mut progress: HashMap<Uuid, _> = state
        .store
        .progress_for_enrollment(enrollment.id)
        .await?
        .into_iter()
        .map(|p| (p.lesson_id, p))
        .collect();

    let modules = module_trees(state, &[course.id])
        .await?
        .into_iter()
        .map(|tree| {
            let lessons = tree
                .lessons
                .into_iter()
                .map(|mut lesson| {
                    let is_available = lesson_reachable(&tree.module, &lesson, now);
                    if !is_available {
                        lesson.content = None;
                        lesson.video_url = None;
                    }
                    LearnLesson {
                        progress: progress.remove(&lesson.id),
                        is_available,
                        lesson,
                    }
                })
                .collect();
            LearnModule {
                is_available: tree.module.is_visible(now),
                module: tree.module,
                lessons,
            }
        })
        .collect();

    Ok(LearnView {
        course,
        enrollment,
        modules,
    })
}

/// Upcoming modules and lessons across the actor's enrolled, visible courses.
#[tracing::instrument(skip_all, fields(user_id = %actor.id))]
pub async fn student_schedule(
    state: &AppState,
    actor: &Actor,
) -> Result<Vec<ScheduledItem>, AppError> {
    actor.require(Role::Student)?;
    let now = state.now();
    let mut courses: Vec<Course> = Vec::new();
    for enrollment in state.store.enrollments_for_user(actor.id).await? {
        if let Some(course) = state.store.course_by_id(enrollment.course_id).await? {
            if course.is_visible(now) {
                courses.push(course);
            }
        }
    }
    let ids: Vec<Uuid> = courses.iter().map(|c| c.id).collect();
    let trees = module_trees(state, &ids).await?;
    Ok(upcoming(&courses, &trees, false, now))
}
