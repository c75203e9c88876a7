//! In-process `Store` backed by hash maps.
//!
//! A single `RwLock` guards every table, so each trait call is atomic and
//! writes are serialized, which also serializes enrollment recomputation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LessonDeletePolicy, Result, Store, StoreError};
use crate::models::{
    CatalogFilter, CatalogSort, Course, Enrollment, InstructorFilter, Lesson, LessonProgress,
    Module, Page, ProgressReport,
};
use crate::progress::{self, Tally};
use crate::visibility::Schedulable;

#[derive(Default)]
struct Tables {
    courses: HashMap<Uuid, Course>,
    modules: HashMap<Uuid, Module>,
    lessons: HashMap<Uuid, Lesson>,
    enrollments: HashMap<Uuid, Enrollment>,
    progress: HashMap<Uuid, LessonProgress>,
}

impl Tables {
    fn live_course(&self, course_id: Uuid) -> Option<&Course> {
        self.courses
            .get(&course_id)
            .filter(|c| c.deleted_at.is_none())
    }

    fn tally(&self, enrollment: &Enrollment) -> Tally {
        let modules: HashSet<Uuid> = self
            .modules
            .values()
            .filter(|m| m.course_id == enrollment.course_id)
            .map(|m| m.id)
            .collect();
        let total_lessons = self
            .lessons
            .values()
            .filter(|l| modules.contains(&l.module_id))
            .count() as i64;
        let completed_lessons = self
            .progress
            .values()
            .filter(|p| p.enrollment_id == enrollment.id && p.completed)
            .count() as i64;
        Tally {
            total_lessons,
            completed_lessons,
        }
    }

    fn recompute(&mut self, enrollment_id: Uuid, now: DateTime<Utc>) -> Result<Enrollment> {
        let mut enrollment = self
            .enrollments
            .get(&enrollment_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        enrollment.apply(progress::derive(self.tally(&enrollment), now));
        self.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    /// Drops the lessons (and their progress rows, per policy).
    fn remove_lessons(
        &mut self,
        lesson_ids: &HashSet<Uuid>,
        policy: LessonDeletePolicy,
    ) -> Result<Vec<Uuid>> {
        let mut affected: Vec<Uuid> = self
            .progress
            .values()
            .filter(|p| lesson_ids.contains(&p.lesson_id))
            .map(|p| p.enrollment_id)
            .collect();
        affected.sort();
        affected.dedup();
        if policy == LessonDeletePolicy::Reject && !affected.is_empty() {
            return Err(StoreError::InUse);
        }
        self.progress.retain(|_, p| !lesson_ids.contains(&p.lesson_id));
        self.lessons.retain(|id, _| !lesson_ids.contains(id));
        Ok(affected)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_search(course: &Course, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    course.title.to_lowercase().contains(&needle)
        || course
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&needle))
}

fn paginate<T>(items: Vec<T>, page: i64, per_page: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let skip = usize::try_from(offset).unwrap_or(usize::MAX);
    let items = items
        .into_iter()
        .skip(skip)
        .take(per_page.max(0) as usize)
        .collect();
    Page {
        items,
        page,
        per_page,
        total,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_course(&self, course: &Course) -> Result<Course> {
        let mut t = self.tables.write().await;
        if t.courses.values().any(|c| c.slug == course.slug) {
            return Err(StoreError::Duplicate);
        }
        t.courses.insert(course.id, course.clone());
        Ok(course.clone())
    }

    async fn update_course(&self, course: &Course) -> Result<Course> {
        let mut t = self.tables.write().await;
        let slot = t.courses.get_mut(&course.id).ok_or(StoreError::NotFound)?;
        *slot = course.clone();
        Ok(course.clone())
    }

    async fn soft_delete_course(&self, course_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut t = self.tables.write().await;
        let course = t.courses.get_mut(&course_id).ok_or(StoreError::NotFound)?;
        course.deleted_at = Some(at);
        Ok(())
    }

    async fn course_by_id(&self, course_id: Uuid) -> Result<Option<Course>> {
        let t = self.tables.read().await;
        Ok(t.live_course(course_id).cloned())
    }

    async fn course_by_slug(&self, slug: &str) -> Result<Option<Course>> {
        let t = self.tables.read().await;
        Ok(t
            .courses
            .values()
            .find(|c| c.slug == slug && c.deleted_at.is_none())
            .cloned())
    }

    async fn catalog(&self, filter: &CatalogFilter, now: DateTime<Utc>) -> Result<Page<Course>> {
        let t = self.tables.read().await;
        let mut courses: Vec<Course> = t
            .courses
            .values()
            .filter(|c| c.deleted_at.is_none() && c.is_visible(now))
            .filter(|c| filter.level.map_or(true, |level| c.level == level))
            .filter(|c| {
                filter
                    .search
                    .as_deref()
                    .map_or(true, |s| matches_search(c, s))
            })
            .cloned()
            .collect();
        match filter.sort {
            CatalogSort::Newest => courses.sort_by(|a, b| {
                b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
            }),
            CatalogSort::Title => courses.sort_by_cached_key(|c| (c.title.to_lowercase(), c.id)),
        }
        Ok(paginate(courses, filter.page, filter.per_page, filter.offset()))
    }

    async fn instructor_courses(
        &self,
        instructor_id: Uuid,
        filter: &InstructorFilter,
    ) -> Result<Page<Course>> {
        let t = self.tables.read().await;
        let mut courses: Vec<Course> = t
            .courses
            .values()
            .filter(|c| c.instructor_id == instructor_id && c.deleted_at.is_none())
            .filter(|c| filter.status.map_or(true, |status| c.status == status))
            .filter(|c| {
                filter.search.as_deref().map_or(true, |s| {
                    c.title.to_lowercase().contains(&s.to_lowercase())
                })
            })
            .cloned()
            .collect();
        courses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(courses, filter.page, filter.per_page, filter.offset()))
    }

    async fn all_instructor_courses(&self, instructor_id: Uuid) -> Result<Vec<Course>> {
        let t = self.tables.read().await;
        let mut courses: Vec<Course> = t
            .courses
            .values()
            .filter(|c| c.instructor_id == instructor_id && c.deleted_at.is_none())
            .cloned()
            .collect();
        courses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(courses)
    }

    async fn insert_module(&self, module: &Module) -> Result<Module> {
        let mut t = self.tables.write().await;
        if t
            .modules
            .values()
            .any(|m| m.course_id == module.course_id && m.slug == module.slug)
        {
            return Err(StoreError::Duplicate);
        }
        t.modules.insert(module.id, module.clone());
        Ok(module.clone())
    }

    async fn update_module(&self, module: &Module) -> Result<Module> {
        let mut t = self.tables.write().await;
        let slot = t.modules.get_mut(&module.id).ok_or(StoreError::NotFound)?;
        *slot = module.clone();
        Ok(module.clone())
    }

    async fn module_by_id(&self, module_id: Uuid) -> Result<Option<Module>> {
        let t = self.tables.read().await;
        Ok(t.modules.get(&module_id).cloned())
    }

    async fn modules_for_courses(&self, course_ids: &[Uuid]) -> Result<Vec<Module>> {
        let t = self.tables.read().await;
        let mut modules: Vec<Module> = t
            .modules
            .values()
            .filter(|m| course_ids.contains(&m.course_id))
            .cloned()
            .collect();
        modules.sort_by_key(|m| (m.course_id, m.order, m.created_at, m.id));
        Ok(modules)
    }

    async fn delete_module(
        &self,
        module_id: Uuid,
        policy: LessonDeletePolicy,
    ) -> Result<Vec<Uuid>> {
        let mut t = self.tables.write().await;
        if !t.modules.contains_key(&module_id) {
            return Err(StoreError::NotFound);
        }
        let lesson_ids: HashSet<Uuid> = t
            .lessons
            .values()
            .filter(|l| l.module_id == module_id)
            .map(|l| l.id)
            .collect();
        let affected = t.remove_lessons(&lesson_ids, policy)?;
        t.modules.remove(&module_id);
        Ok(affected)
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        let mut t = self.tables.write().await;
        if t
            .lessons
            .values()
            .any(|l| l.module_id == lesson.module_id && l.slug == lesson.slug)
        {
            return Err(StoreError::Duplicate);
        }
        t.lessons.insert(lesson.id, lesson.clone());
        Ok(lesson.clone())
    }

    async fn update_lesson(&self, lesson: &Lesson) -> Result<Lesson> {
        let mut t = self.tables.write().await;
        let slot = t.lessons.get_mut(&lesson.id).ok_or(StoreError::NotFound)?;
        *slot = lesson.clone();
        Ok(lesson.clone())
    }

    async fn lesson_by_id(&self, lesson_id: Uuid) -> Result<Option<Lesson>> {
        let t = self.tables.read().await;
        Ok(t.lessons.get(&lesson_id).cloned())
    }

    async fn lessons_for_modules(&self, module_ids: &[Uuid]) -> Result<Vec<Lesson>> {
        let t = self.tables.read().await;
        let mut lessons: Vec<Lesson> = t
            .lessons
            .values()
            .filter(|l| module_ids.contains(&l.module_id))
            .cloned()
            .collect();
        lessons.sort_by_key(|l| (l.module_id, l.order, l.created_at, l.id));
        Ok(lessons)
    }

    async fn delete_lesson(
        &self,
        lesson_id: Uuid,
        policy: LessonDeletePolicy,
    ) -> Result<Vec<Uuid>> {
        let mut t = self.tables.write().await;
        if !t.lessons.contains_key(&lesson_id) {
            return Err(StoreError::NotFound);
        }
        t.remove_lessons(&HashSet::from([lesson_id]), policy)
    }

    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<Enrollment> {
        let mut t = self.tables.write().await;
        if t
            .enrollments
            .values()
            .any(|e| e.user_id == enrollment.user_id && e.course_id == enrollment.course_id)
        {
            return Err(StoreError::Duplicate);
        }
        t.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment.clone())
    }

    async fn enrollment_for(&self, user_id: Uuid, course_id: Uuid) -> Result<Option<Enrollment>> {
        let t = self.tables.read().await;
        Ok(t
            .enrollments
            .values()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned())
    }

    async fn enrollments_for_user(&self, user_id: Uuid) -> Result<Vec<Enrollment>> {
        let t = self.tables.read().await;
        let mut enrollments: Vec<Enrollment> = t
            .enrollments
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at).then_with(|| a.id.cmp(&b.id)));
        Ok(enrollments)
    }

    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> Result<bool> {
        let mut t = self.tables.write().await;
        let found = t
            .enrollments
            .values()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .map(|e| e.id);
        let Some(enrollment_id) = found else {
            return Ok(false);
        };
        t.enrollments.remove(&enrollment_id);
        t.progress.retain(|_, p| p.enrollment_id != enrollment_id);
        Ok(true)
    }

    async fn progress_for_enrollment(&self, enrollment_id: Uuid) -> Result<Vec<LessonProgress>> {
        let t = self.tables.read().await;
        let mut rows: Vec<LessonProgress> = t
            .progress
            .values()
            .filter(|p| p.enrollment_id == enrollment_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.lesson_id, p.id));
        Ok(rows)
    }

    async fn record_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        report: &ProgressReport,
        now: DateTime<Utc>,
    ) -> Result<(LessonProgress, Enrollment)> {
        let mut t = self.tables.write().await;
        if !t.enrollments.contains_key(&enrollment_id) {
            return Err(StoreError::NotFound);
        }
        if !t.lessons.contains_key(&lesson_id) {
            return Err(StoreError::NotFound);
        }

        let existing = t
            .progress
            .values()
            .find(|p| p.enrollment_id == enrollment_id && p.lesson_id == lesson_id)
            .cloned();
        let mut row =
            existing.unwrap_or_else(|| LessonProgress::blank(enrollment_id, lesson_id, now));
        row.apply_report(report, now);
        t.progress.insert(row.id, row.clone());

        let enrollment = t.recompute(enrollment_id, now)?;
        Ok((row, enrollment))
    }

    async fn recompute_enrollment(
        &self,
        enrollment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Enrollment> {
        let mut t = self.tables.write().await;
        t.recompute(enrollment_id, now)
    }
}
