//! Instructor-side course, module and lesson management.
//!
//! Every operation below the course list walks the ownership path first.
//! Publishing is driven by `status` for courses and by `published_at` alone for
//! modules and lessons.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::access::{module_trees, owned_course, owned_lesson, owned_module};
use crate::enrollment::refresh_enrollments;
use crate::error::AppError;
use crate::identity::{Actor, Role};
use crate::models::{
    Course, CourseInput, CourseStatus, InstructorCourseQuery, InstructorCourseView,
    InstructorFilter, Lesson, LessonInput, Module, ModuleInput, Page,
};
use crate::slug::{course_slug, numbered, slugify};
use crate::store::StoreError;
use crate::AppState;

const COURSE_SLUG_ATTEMPTS: usize = 5;
const CHILD_SLUG_ATTEMPTS: usize = 100;

/// Status and publish time of a new course.
pub fn schedule_new_course(
    input: &CourseInput,
    now: DateTime<Utc>,
) -> (CourseStatus, Option<DateTime<Utc>>) {
    match input.status.unwrap_or_default() {
        CourseStatus::Published => {
            let at = if input.publish_now {
                now
            } else {
                input.published_at.unwrap_or(now)
            };
            (CourseStatus::Published, Some(at))
        }
        other => (other, None),
    }
}

/// Status and publish time after an update. Leaving `status` out keeps the
/// current one; an already published course keeps its publish time unless a
/// new one is given.
pub fn reschedule_course(
    course: &Course,
    input: &CourseInput,
    now: DateTime<Utc>,
) -> (CourseStatus, Option<DateTime<Utc>>) {
    let status = input.status.unwrap_or(course.status);
    if status != CourseStatus::Published {
        return (status, course.published_at);
    }
    let at = if input.publish_now {
        now
    } else {
        input
            .published_at
            .or(course.published_at)
            .unwrap_or(now)
    };
    (status, Some(at))
}

/// Publish time for a module or lesson; `current` is `None` on create.
pub fn schedule_content(
    publish_now: bool,
    requested: Option<DateTime<Utc>>,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if publish_now {
        Some(now)
    } else {
        requested.or(current)
    }
}

fn log_schedule(kind: &'static str, id: Uuid, published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    match published_at {
        Some(at) if at > now => tracing::info!(kind, %id, %at, "scheduled"),
        Some(_) => tracing::info!(kind, %id, "published"),
        None => {}
    }
}

// --- courses ---

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id))]
pub async fn list_courses(
    state: &AppState,
    actor: &Actor,
    query: InstructorCourseQuery,
) -> Result<Page<Course>, AppError> {
    actor.require(Role::Instructor)?;
    let filter = InstructorFilter {
        search: query
            .search
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty()),
        status: query.status,
        page: query.page.max(1),
        per_page: state.settings.instructor_page_size,
    };
    Ok(state.store.instructor_courses(actor.id, &filter).await?)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id))]
pub async fn create_course(
    state: &AppState,
    actor: &Actor,
    input: CourseInput,
) -> Result<Course, AppError> {
    actor.require(Role::Instructor)?;
    input.validate()?;
    let now = state.now();
    let (status, published_at) = schedule_new_course(&input, now);
    let mut course = Course {
        id: Uuid::new_v4(),
        instructor_id: actor.id,
        title: input.title.trim().to_owned(),
        description: input.description,
        slug: String::new(),
        status,
        level: input.level.unwrap_or_default(),
        published_at,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    for _ in 0..COURSE_SLUG_ATTEMPTS {
        course.slug = course_slug(&course.title);
        match state.store.insert_course(&course).await {
            Ok(saved) => {
                tracing::info!(course_id = %saved.id, slug = %saved.slug, status = %saved.status, "course created");
                if saved.status == CourseStatus::Published {
                    log_schedule("course", saved.id, saved.published_at, now);
                }
                return Ok(saved);
            }
            Err(StoreError::Duplicate) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Conflict("could not allocate a unique course slug".into()))
}

pub async fn show_course(
    state: &AppState,
    actor: &Actor,
    slug: &str,
) -> Result<InstructorCourseView, AppError> {
    let course = owned_course(state, actor, slug).await?;
    let modules = module_trees(state, &[course.id]).await?;
    Ok(InstructorCourseView { course, modules })
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, slug = %slug))]
pub async fn update_course(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    input: CourseInput,
) -> Result<Course, AppError> {
    input.validate()?;
    let mut course = owned_course(state, actor, slug).await?;
    let now = state.now();
    let (status, published_at) = reschedule_course(&course, &input, now);
    course.title = input.title.trim().to_owned();
    course.description = input.description;
    if let Some(level) = input.level {
        course.level = level;
    }
    course.status = status;
    course.published_at = published_at;
    course.updated_at = now;

    let saved = state.store.update_course(&course).await?;
    tracing::info!(course_id = %saved.id, status = %saved.status, "course updated");
    if saved.status == CourseStatus::Published {
        log_schedule("course", saved.id, saved.published_at, now);
    }
    Ok(saved)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, slug = %slug))]
pub async fn delete_course(state: &AppState, actor: &Actor, slug: &str) -> Result<(), AppError> {
    let course = owned_course(state, actor, slug).await?;
    state.store.soft_delete_course(course.id, state.now()).await?;
    tracing::info!(course_id = %course.id, "course deleted");
    Ok(())
}

// --- modules ---

pub async fn list_modules(
    state: &AppState,
    actor: &Actor,
    slug: &str,
) -> Result<Vec<Module>, AppError> {
    let course = owned_course(state, actor, slug).await?;
    Ok(state.store.modules_for_courses(&[course.id]).await?)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, slug = %slug))]
pub async fn create_module(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    input: ModuleInput,
) -> Result<Module, AppError> {
    input.validate()?;
    let course = owned_course(state, actor, slug).await?;
    let now = state.now();
    let title = input.title.trim().to_owned();
    let base = slugify(&title);
    let mut module = Module {
        id: Uuid::new_v4(),
        course_id: course.id,
        title,
        slug: String::new(),
        description: input.description,
        order: input.order,
        published_at: schedule_content(input.publish_now, input.published_at, None, now),
        created_at: now,
        updated_at: now,
    };

    for candidate in numbered(&base).take(CHILD_SLUG_ATTEMPTS) {
        module.slug = candidate;
        match state.store.insert_module(&module).await {
            Ok(saved) => {
                tracing::info!(module_id = %saved.id, slug = %saved.slug, "module created");
                log_schedule("module", saved.id, saved.published_at, now);
                return Ok(saved);
            }
            Err(StoreError::Duplicate) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Conflict("could not allocate a unique module slug".into()))
}

pub async fn show_module(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
) -> Result<Module, AppError> {
    let (_, module) = owned_module(state, actor, slug, module_id).await?;
    Ok(module)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, %module_id))]
pub async fn update_module(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
    input: ModuleInput,
) -> Result<Module, AppError> {
    input.validate()?;
    let (_, mut module) = owned_module(state, actor, slug, module_id).await?;
    let now = state.now();
    module.title = input.title.trim().to_owned();
    module.description = input.description;
    module.order = input.order;
    module.published_at =
        schedule_content(input.publish_now, input.published_at, module.published_at, now);
    module.updated_at = now;

    let saved = state.store.update_module(&module).await?;
    log_schedule("module", saved.id, saved.published_at, now);
    Ok(saved)
}

/// Deletes the module with its lessons. Under the cascade policy the progress
/// rows of those lessons go too and the affected enrollments are recounted.
#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, %module_id))]
pub async fn delete_module(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
) -> Result<(), AppError> {
    let (_, module) = owned_module(state, actor, slug, module_id).await?;
    let policy = state.settings.lesson_delete_policy;
    let affected = state.store.delete_module(module.id, policy).await?;
    tracing::info!(module_id = %module.id, %policy, affected = affected.len(), "module deleted");
    refresh_enrollments(state, &affected, state.now()).await
}

// --- lessons ---

pub async fn list_lessons(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
) -> Result<Vec<Lesson>, AppError> {
    let (_, module) = owned_module(state, actor, slug, module_id).await?;
    Ok(state.store.lessons_for_modules(&[module.id]).await?)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, %module_id))]
pub async fn create_lesson(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
    input: LessonInput,
) -> Result<Lesson, AppError> {
    input.validate()?;
    let (_, module) = owned_module(state, actor, slug, module_id).await?;
    let now = state.now();
    let title = input.title.trim().to_owned();
    let base = slugify(&title);
    let mut lesson = Lesson {
        id: Uuid::new_v4(),
        module_id: module.id,
        title,
        slug: String::new(),
        description: input.description,
        content: input.content,
        video_url: input.video_url,
        duration: input.duration,
        order: input.order,
        is_preview: input.is_preview,
        published_at: schedule_content(input.publish_now, input.published_at, None, now),
        created_at: now,
        updated_at: now,
    };

    for candidate in numbered(&base).take(CHILD_SLUG_ATTEMPTS) {
        lesson.slug = candidate;
        match state.store.insert_lesson(&lesson).await {
            Ok(saved) => {
                tracing::info!(lesson_id = %saved.id, slug = %saved.slug, "lesson created");
                log_schedule("lesson", saved.id, saved.published_at, now);
                return Ok(saved);
            }
            Err(StoreError::Duplicate) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Conflict("could not allocate a unique lesson slug".into()))
}

pub async fn show_lesson(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
    lesson_id: Uuid,
) -> Result<Lesson, AppError> {
    let (_, _, lesson) = owned_lesson(state, actor, slug, module_id, lesson_id).await?;
    Ok(lesson)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, %lesson_id))]
pub async fn update_lesson(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
    lesson_id: Uuid,
    input: LessonInput,
) -> Result<Lesson, AppError> {
    input.validate()?;
    let (_, _, mut lesson) = owned_lesson(state, actor, slug, module_id, lesson_id).await?;
    let now = state.now();
    lesson.title = input.title.trim().to_owned();
    lesson.description = input.description;
    lesson.content = input.content;
    lesson.video_url = input.video_url;
    lesson.duration = input.duration;
    lesson.order = input.order;
    lesson.is_preview = input.is_preview;
    lesson.published_at =
        schedule_content(input.publish_now, input.published_at, lesson.published_at, now);
    lesson.updated_at = now;

    let saved = state.store.update_lesson(&lesson).await?;
    log_schedule("lesson", saved.id, saved.published_at, now);
    Ok(saved)
}

#[tracing::instrument(skip_all, fields(instructor_id = %actor.id, %lesson_id))]
pub async fn delete_lesson(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
    lesson_id: Uuid,
) -> Result<(), AppError> {
    let (_, _, lesson) = owned_lesson(state, actor, slug, module_id, lesson_id).await?;
    let policy = state.settings.lesson_delete_policy;
    let affected = state.store.delete_lesson(lesson.id, policy).await?;
    tracing::info!(lesson_id = %lesson.id, %policy, affected = affected.len(), "lesson deleted");
    refresh_enrollments(state, &affected, state.now()).await
}
