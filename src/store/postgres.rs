//! PostgreSQL `Store` on sqlx.
//!
//! Uniqueness is enforced by the schema's unique constraints. Progress writes
//! lock the enrollment row (`FOR UPDATE`) for the length of the transaction so
//! recomputations for one enrollment never interleave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{LessonDeletePolicy, Result, Store, StoreError};
use crate::db::Db;
use crate::models::{
    CatalogFilter, CatalogSort, Course, Enrollment, InstructorFilter, Lesson, LessonProgress,
    Module, Page, ProgressReport,
};
use crate::progress::{self, Tally};

const COURSE_COLUMNS: &str = "id, instructor_id, title, description, slug, status, level, \
     published_at, created_at, updated_at, deleted_at";
const MODULE_COLUMNS: &str =
    "id, course_id, title, slug, description, position, published_at, created_at, updated_at";
const LESSON_COLUMNS: &str = "id, module_id, title, slug, description, content, video_url, \
     duration, position, is_preview, published_at, created_at, updated_at";
const ENROLLMENT_COLUMNS: &str =
    "id, user_id, course_id, enrolled_at, completed_at, progress, status";
const PROGRESS_COLUMNS: &str =
    "id, enrollment_id, lesson_id, completed, completed_at, last_watched_at, watch_time";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

/// Maps constraint failures onto the store's own errors: a unique violation
/// is a duplicate, a dangling foreign key means the parent row is gone.
fn constraint_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate,
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => StoreError::NotFound,
        other => StoreError::Database(other),
    }
}

/// ILIKE pattern matching `needle` anywhere, with wildcards in it escaped.
fn contains_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_catalog_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &CatalogFilter, now: DateTime<Utc>) {
    qb.push(
        " WHERE deleted_at IS NULL AND status = 'published' \
         AND (published_at IS NULL OR published_at <= ",
    );
    qb.push_bind(now);
    qb.push(")");
    if let Some(level) = filter.level {
        qb.push(" AND level = ").push_bind(level);
    }
    if let Some(search) = &filter.search {
        let pattern = contains_pattern(search);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_instructor_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    instructor_id: Uuid,
    filter: &InstructorFilter,
) {
    qb.push(" WHERE deleted_at IS NULL AND instructor_id = ")
        .push_bind(instructor_id);
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(search) = &filter.search {
        qb.push(" AND title ILIKE ").push_bind(contains_pattern(search));
    }
}

/// Enrollment ids holding progress on any of `lesson_ids`.
async fn progress_holders(conn: &mut PgConnection, lesson_ids: &[Uuid]) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT enrollment_id FROM lesson_progress WHERE lesson_id = ANY($1) \
         ORDER BY enrollment_id",
    )
    .bind(lesson_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Row-locks the given lessons so progress writes on them wait for the caller.
async fn lock_lessons(conn: &mut PgConnection, lesson_ids: &[Uuid]) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM lessons WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(lesson_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

async fn locked_enrollment(conn: &mut PgConnection, enrollment_id: Uuid) -> Result<Enrollment> {
    sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1 FOR UPDATE"
    ))
    .bind(enrollment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Recount and persist; the caller holds the enrollment row lock.
async fn recompute_locked(
    conn: &mut PgConnection,
    mut enrollment: Enrollment,
    now: DateTime<Utc>,
) -> Result<Enrollment> {
    let (total_lessons, completed_lessons) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM lessons l JOIN modules m ON m.id = l.module_id
              WHERE m.course_id = $1),
            (SELECT COUNT(*) FROM lesson_progress WHERE enrollment_id = $2 AND completed)
        "#,
    )
    .bind(enrollment.course_id)
    .bind(enrollment.id)
    .fetch_one(&mut *conn)
    .await?;

    enrollment.apply(progress::derive(
        Tally {
            total_lessons,
            completed_lessons,
        },
        now,
    ));

    let saved = sqlx::query_as::<_, Enrollment>(&format!(
        "UPDATE enrollments SET progress = $2, status = $3, completed_at = $4 \
         WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
    ))
    .bind(enrollment.id)
    .bind(enrollment.progress)
    .bind(enrollment.status)
    .bind(enrollment.completed_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(saved)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_course(&self, course: &Course) -> Result<Course> {
        sqlx::query_as::<_, Course>(&format!(
            r#"
            INSERT INTO courses (id, instructor_id, title, description, slug, status, level,
                                 published_at, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(course.id)
        .bind(course.instructor_id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(&course.slug)
        .bind(course.status)
        .bind(course.level)
        .bind(course.published_at)
        .bind(course.created_at)
        .bind(course.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(constraint_error)
    }

    async fn update_course(&self, course: &Course) -> Result<Course> {
        sqlx::query_as::<_, Course>(&format!(
            r#"
            UPDATE courses
            SET title = $2, description = $3, status = $4, level = $5,
                published_at = $6, updated_at = $7
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(course.id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.status)
        .bind(course.level)
        .bind(course.published_at)
        .bind(course.updated_at)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn soft_delete_course(&self, course_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query(
            "UPDATE courses SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(course_id)
        .bind(at)
        .execute(&self.db)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn course_by_id(&self, course_id: Uuid) -> Result<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(course)
    }

    async fn course_by_slug(&self, slug: &str) -> Result<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE slug = $1 AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.db)
        .await?;
        Ok(course)
    }

    async fn catalog(&self, filter: &CatalogFilter, now: DateTime<Utc>) -> Result<Page<Course>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM courses");
        push_catalog_filters(&mut count, filter, now);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.db).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {COURSE_COLUMNS} FROM courses"));
        push_catalog_filters(&mut select, filter, now);
        select.push(match filter.sort {
            CatalogSort::Newest => " ORDER BY created_at DESC, id",
            // byte order of the lowercased title, independent of the database collation
            CatalogSort::Title => " ORDER BY lower(title) COLLATE \"C\", id",
        });
        select
            .push(" LIMIT ")
            .push_bind(filter.per_page)
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let items = select.build_query_as::<Course>().fetch_all(&self.db).await?;

        Ok(Page {
            items,
            page: filter.page,
            per_page: filter.per_page,
            total,
        })
    }

    async fn instructor_courses(
        &self,
        instructor_id: Uuid,
        filter: &InstructorFilter,
    ) -> Result<Page<Course>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM courses");
        push_instructor_filters(&mut count, instructor_id, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.db).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {COURSE_COLUMNS} FROM courses"));
        push_instructor_filters(&mut select, instructor_id, filter);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.per_page)
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let items = select.build_query_as::<Course>().fetch_all(&self.db).await?;

        Ok(Page {
            items,
            page: filter.page,
            per_page: filter.per_page,
            total,
        })
    }

    async fn all_instructor_courses(&self, instructor_id: Uuid) -> Result<Vec<Course>> {
        let courses = sqlx::query_as::<_, Course>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses \
             WHERE instructor_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC, id"
        ))
        .bind(instructor_id)
        .fetch_all(&self.db)
        .await?;
        Ok(courses)
    }

    async fn insert_module(&self, module: &Module) -> Result<Module> {
        sqlx::query_as::<_, Module>(&format!(
            r#"
            INSERT INTO modules (id, course_id, title, slug, description, position,
                                 published_at, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            RETURNING {MODULE_COLUMNS}
            "#
        ))
        .bind(module.id)
        .bind(module.course_id)
        .bind(&module.title)
        .bind(&module.slug)
        .bind(&module.description)
        .bind(module.order)
        .bind(module.published_at)
        .bind(module.created_at)
        .bind(module.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(constraint_error)
    }

    async fn update_module(&self, module: &Module) -> Result<Module> {
        sqlx::query_as::<_, Module>(&format!(
            r#"
            UPDATE modules
            SET title = $2, description = $3, position = $4, published_at = $5, updated_at = $6
            WHERE id = $1
            RETURNING {MODULE_COLUMNS}
            "#
        ))
        .bind(module.id)
        .bind(&module.title)
        .bind(&module.description)
        .bind(module.order)
        .bind(module.published_at)
        .bind(module.updated_at)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn module_by_id(&self, module_id: Uuid) -> Result<Option<Module>> {
        let module = sqlx::query_as::<_, Module>(&format!(
            "SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1"
        ))
        .bind(module_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(module)
    }

    async fn modules_for_courses(&self, course_ids: &[Uuid]) -> Result<Vec<Module>> {
        let modules = sqlx::query_as::<_, Module>(&format!(
            "SELECT {MODULE_COLUMNS} FROM modules WHERE course_id = ANY($1) \
             ORDER BY course_id, position, created_at, id"
        ))
        .bind(course_ids)
        .fetch_all(&self.db)
        .await?;
        Ok(modules)
    }

    async fn delete_module(
        &self,
        module_id: Uuid,
        policy: LessonDeletePolicy,
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.db.begin().await?;
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM modules WHERE id = $1 FOR UPDATE")
            .bind(module_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;
        let lesson_ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM lessons WHERE module_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(module_id)
        .fetch_all(&mut *tx)
        .await?;
        let affected = progress_holders(&mut tx, &lesson_ids).await?;
        if policy == LessonDeletePolicy::Reject && !affected.is_empty() {
            return Err(StoreError::InUse);
        }
        // lessons and their progress rows go with the module (ON DELETE CASCADE)
        let done = sqlx::query("DELETE FROM modules WHERE id = $1")
            .bind(module_id)
            .execute(&mut *tx)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        sqlx::query_as::<_, Lesson>(&format!(
            r#"
            INSERT INTO lessons (id, module_id, title, slug, description, content, video_url,
                                 duration, position, is_preview, published_at,
                                 created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            RETURNING {LESSON_COLUMNS}
            "#
        ))
        .bind(lesson.id)
        .bind(lesson.module_id)
        .bind(&lesson.title)
        .bind(&lesson.slug)
        .bind(&lesson.description)
        .bind(&lesson.content)
        .bind(&lesson.video_url)
        .bind(lesson.duration)
        .bind(lesson.order)
        .bind(lesson.is_preview)
        .bind(lesson.published_at)
        .bind(lesson.created_at)
        .bind(lesson.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(constraint_error)
    }

    async fn update_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        sqlx::query_as::<_, Lesson>(&format!(
            r#"
            UPDATE lessons
            SET title = $2, description = $3, content = $4, video_url = $5, duration = $6,
                position = $7, is_preview = $8, published_at = $9, updated_at = $10
            WHERE id = $1
            RETURNING {LESSON_COLUMNS}
            "#
        ))
        .bind(lesson.id)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.content)
        .bind(&lesson.video_url)
        .bind(lesson.duration)
        .bind(lesson.order)
        .bind(lesson.is_preview)
        .bind(lesson.published_at)
        .bind(lesson.updated_at)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn lesson_by_id(&self, lesson_id: Uuid) -> Result<Option<Lesson>> {
        let lesson = sqlx::query_as::<_, Lesson>(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE id = $1"
        ))
        .bind(lesson_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(lesson)
    }

    async fn lessons_for_modules(&self, module_ids: &[Uuid]) -> Result<Vec<Lesson>> {
        let lessons = sqlx::query_as::<_, Lesson>(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE module_id = ANY($1) \
             ORDER BY module_id, position, created_at, id"
        ))
        .bind(module_ids)
        .fetch_all(&self.db)
        .await?;
        Ok(lessons)
    }

    async fn delete_lesson(
        &self,
        lesson_id: Uuid,
        policy: LessonDeletePolicy,
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.db.begin().await?;
        if lock_lessons(&mut tx, &[lesson_id]).await?.is_empty() {
            return Err(StoreError::NotFound);
        }
        let affected = progress_holders(&mut tx, &[lesson_id]).await?;
        if policy == LessonDeletePolicy::Reject && !affected.is_empty() {
            return Err(StoreError::InUse);
        }
        let done = sqlx::query("DELETE FROM lessons WHERE id = $1")
            .bind(lesson_id)
            .execute(&mut *tx)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(affected)
    }

    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        sqlx::query_as::<_, Enrollment>(&format!(
            r#"
            INSERT INTO enrollments (id, user_id, course_id, enrolled_at, completed_at,
                                     progress, status)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (user_id, course_id) DO NOTHING
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        ))
        .bind(enrollment.id)
        .bind(enrollment.user_id)
        .bind(enrollment.course_id)
        .bind(enrollment.enrolled_at)
        .bind(enrollment.completed_at)
        .bind(enrollment.progress)
        .bind(enrollment.status)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::Duplicate)
    }

    async fn enrollment_for(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Enrollment>> {
        let enrollment = sqlx::query_as::<_, Enrollment>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 AND course_id = $2"
        ))
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(enrollment)
    }

    async fn enrollments_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>> {
        let enrollments = sqlx::query_as::<_, Enrollment>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 \
             ORDER BY enrolled_at DESC, id"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(enrollments)
    }

    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> Result<bool> {
        // lesson_progress rows follow via ON DELETE CASCADE
        let done = sqlx::query("DELETE FROM enrollments WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn progress_for_enrollment(&self, enrollment_id: Uuid) -> Result<Vec<LessonProgress>> {
        let rows = sqlx::query_as::<_, LessonProgress>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE enrollment_id = $1 \
             ORDER BY lesson_id, id"
        ))
        .bind(enrollment_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn record_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        report: &ProgressReport,
        now: DateTime<Utc>,
    ) -> Result<(LessonProgress, Enrollment)> {
        let mut tx = self.db.begin().await?;
        let enrollment = locked_enrollment(&mut tx, enrollment_id).await?;
        // a concurrent lesson delete either waits for this write or wins first
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM lessons WHERE id = $1 FOR SHARE")
            .bind(lesson_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        let blank = LessonProgress::blank(enrollment_id, lesson_id, now);
        sqlx::query(
            r#"
            INSERT INTO lesson_progress (id, enrollment_id, lesson_id, completed, completed_at,
                                         last_watched_at, watch_time)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (enrollment_id, lesson_id) DO NOTHING
            "#,
        )
        .bind(blank.id)
        .bind(blank.enrollment_id)
        .bind(blank.lesson_id)
        .bind(blank.completed)
        .bind(blank.completed_at)
        .bind(blank.last_watched_at)
        .bind(blank.watch_time)
        .execute(&mut *tx)
        .await
        .map_err(constraint_error)?;

        let mut row = sqlx::query_as::<_, LessonProgress>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress \
             WHERE enrollment_id = $1 AND lesson_id = $2 FOR UPDATE"
        ))
        .bind(enrollment_id)
        .bind(lesson_id)
        .fetch_one(&mut *tx)
        .await?;
        row.apply_report(report, now);

        let row = sqlx::query_as::<_, LessonProgress>(&format!(
            r#"
            UPDATE lesson_progress
            SET completed = $2, completed_at = $3, last_watched_at = $4, watch_time = $5
            WHERE id = $1
            RETURNING {PROGRESS_COLUMNS}
            "#
        ))
        .bind(row.id)
        .bind(row.completed)
        .bind(row.completed_at)
        .bind(row.last_watched_at)
        .bind(row.watch_time)
        .fetch_one(&mut *tx)
        .await?;

        let enrollment = recompute_locked(&mut tx, enrollment, now).await?;
        tx.commit().await?;
        Ok((row, enrollment))
    }

    async fn recompute_enrollment(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Enrollment> {
        let mut tx = self.db.begin().await?;
        let enrollment = locked_enrollment(&mut tx, enrollment_id).await?;
        let enrollment = recompute_locked(&mut tx, enrollment, now).await?;
        tx.commit().await?;
        Ok(enrollment)
    }
}
