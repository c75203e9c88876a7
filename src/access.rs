//! Who may see or act on what: ownership checks for instructors, the public
//! catalog, course detail and the instructor's upcoming schedule.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::identity::{Actor, Role};
use crate::models::{
    CatalogFilter, CatalogQuery, Course, CourseDetail, Lesson, LessonSummary, Module,
    ModuleOutline, ModuleWithLessons, Page, ScheduledItem, ScheduledKind,
};
use crate::visibility::{lesson_reachable, Schedulable};
use crate::AppState;

/// The course → module → lesson chain an instructor request walks down.
///
/// Each link is checked on its own: the actor owns the course, the module
/// belongs to that course, the lesson belongs to that module.
#[derive(Debug, Clone, Copy)]
pub struct OwnershipPath<'a> {
    course: &'a Course,
    module: Option<&'a Module>,
    lesson: Option<&'a Lesson>,
}

impl<'a> OwnershipPath<'a> {
    pub fn new(course: &'a Course) -> Self {
        Self {
            course,
            module: None,
            lesson: None,
        }
    }

    pub fn module(mut self, module: &'a Module) -> Self {
        self.module = Some(module);
        self
    }

    pub fn lesson(mut self, lesson: &'a Lesson) -> Self {
        self.lesson = Some(lesson);
        self
    }

    pub fn authorize(&self, actor: &Actor) -> Result<(), AppError> {
        authorize_course(actor, self.course)?;
        if let Some(module) = self.module {
            authorize_module(module, self.course)?;
        }
        match (self.module, self.lesson) {
            (Some(module), Some(lesson)) => authorize_lesson(lesson, module),
            (None, Some(_)) => Err(AppError::forbidden("Unauthorized to access this lesson.")),
            _ => Ok(()),
        }
    }
}

pub fn authorize_course(actor: &Actor, course: &Course) -> Result<(), AppError> {
    if course.instructor_id != actor.id {
        return Err(AppError::forbidden("Unauthorized to access this course."));
    }
    Ok(())
}

pub fn authorize_module(module: &Module, course: &Course) -> Result<(), AppError> {
    if module.course_id != course.id {
        return Err(AppError::forbidden("Unauthorized to access this module."));
    }
    Ok(())
}

pub fn authorize_lesson(lesson: &Lesson, module: &Module) -> Result<(), AppError> {
    if lesson.module_id != module.id {
        return Err(AppError::forbidden("Unauthorized to access this lesson."));
    }
    Ok(())
}

pub async fn owned_course(state: &AppState, actor: &Actor, slug: &str) -> Result<Course, AppError> {
    actor.require(Role::Instructor)?;
    let course = state
        .store
        .course_by_slug(slug)
        .await?
        .ok_or(AppError::NotFound)?;
    OwnershipPath::new(&course).authorize(actor)?;
    Ok(course)
}

pub async fn owned_module(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
) -> Result<(Course, Module), AppError> {
    let course = owned_course(state, actor, slug).await?;
    let module = state
        .store
        .module_by_id(module_id)
        .await?
        .ok_or(AppError::NotFound)?;
    OwnershipPath::new(&course).module(&module).authorize(actor)?;
    Ok((course, module))
}

pub async fn owned_lesson(
    state: &AppState,
    actor: &Actor,
    slug: &str,
    module_id: Uuid,
    lesson_id: Uuid,
) -> Result<(Course, Module, Lesson), AppError> {
    let (course, module) = owned_module(state, actor, slug, module_id).await?;
    let lesson = state
        .store
        .lesson_by_id(lesson_id)
        .await?
        .ok_or(AppError::NotFound)?;
    OwnershipPath::new(&course)
        .module(&module)
        .lesson(&lesson)
        .authorize(actor)?;
    Ok((course, module, lesson))
}

/// Modules of the given courses with their lessons, each in display order.
pub async fn module_trees(
    state: &AppState,
    course_ids: &[Uuid],
) -> Result<Vec<ModuleWithLessons>, AppError> {
    if course_ids.is_empty() {
        return Ok(Vec::new());
    }
    let modules = state.store.modules_for_courses(course_ids).await?;
    let module_ids: Vec<Uuid> = modules.iter().map(|m| m.id).collect();
    let lessons = if module_ids.is_empty() {
        Vec::new()
    } else {
        state.store.lessons_for_modules(&module_ids).await?
    };

    let mut by_module: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
    for lesson in lessons {
        by_module.entry(lesson.module_id).or_default().push(lesson);
    }
    Ok(modules
        .into_iter()
        .map(|module| ModuleWithLessons {
            lessons: by_module.remove(&module.id).unwrap_or_default(),
            module,
        })
        .collect())
}

#[tracing::instrument(skip_all, fields(page = query.page))]
pub async fn list_catalog(state: &AppState, query: CatalogQuery) -> Result<Page<Course>, AppError> {
    let filter = CatalogFilter {
        search: query
            .search
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty()),
        level: query.level,
        sort: query.sort.unwrap_or_default(),
        page: query.page.max(1),
        per_page: state.settings.catalog_page_size,
    };
    Ok(state.store.catalog(&filter, state.now()).await?)
}

/// Public course page. A course that exists but is not visible yet answers
/// exactly like one that does not exist, whoever is asking.
#[tracing::instrument(skip_all, fields(slug = %slug))]
pub async fn course_detail(
    state: &AppState,
    slug: &str,
    viewer: Option<&Actor>,
) -> Result<CourseDetail, AppError> {
    let now = state.now();
    let course = state
        .store
        .course_by_slug(slug)
        .await?
        .filter(|c| c.is_visible(now))
        .ok_or(AppError::NotFound)?;

    let modules = module_trees(state, &[course.id])
        .await?
        .into_iter()
        .map(|tree| outline(tree, now))
        .collect();

    let is_enrolled = match viewer {
        Some(actor) => state
            .store
            .enrollment_for(actor.id, course.id)
            .await?
            .is_some(),
        None => false,
    };

    Ok(CourseDetail {
        course,
        modules,
        is_enrolled,
    })
}

fn outline(tree: ModuleWithLessons, now: DateTime<Utc>) -> ModuleOutline {
    let lessons = tree
        .lessons
        .iter()
        .map(|lesson| LessonSummary {
            id: lesson.id,
            title: lesson.title.clone(),
            slug: lesson.slug.clone(),
            order: lesson.order,
            duration: lesson.duration,
            is_preview: lesson.is_preview,
            published_at: lesson.published_at,
            is_available: lesson_reachable(&tree.module, lesson, now),
        })
        .collect();
    ModuleOutline {
        is_available: tree.module.is_visible(now),
        module: tree.module,
        lessons,
    }
}

/// Items of `courses` still waiting on a future publish time, soonest first.
pub fn upcoming(
    courses: &[Course],
    trees: &[ModuleWithLessons],
    include_courses: bool,
    now: DateTime<Utc>,
) -> Vec<ScheduledItem> {
    let by_id: HashMap<Uuid, &Course> = courses.iter().map(|c| (c.id, c)).collect();
    let mut items = Vec::new();

    if include_courses {
        for course in courses.iter().filter(|c| c.is_scheduled(now)) {
            if let Some(at) = course.published_at {
                items.push(item(ScheduledKind::Course, course.id, &course.title, course, None, at, now));
            }
        }
    }

    for tree in trees {
        let Some(course) = by_id.get(&tree.module.course_id) else {
            continue;
        };
        let module = &tree.module;
        if let (true, Some(at)) = (module.is_scheduled(now), module.published_at) {
            items.push(item(ScheduledKind::Module, module.id, &module.title, course, None, at, now));
        }
        for lesson in tree.lessons.iter().filter(|l| l.is_scheduled(now)) {
            if let Some(at) = lesson.published_at {
                items.push(item(
                    ScheduledKind::Lesson,
                    lesson.id,
                    &lesson.title,
                    course,
                    Some(&module.title),
                    at,
                    now,
                ));
            }
        }
    }

    items.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    });
    items
}

fn item(
    kind: ScheduledKind,
    id: Uuid,
    title: &str,
    course: &Course,
    module_title: Option<&str>,
    published_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ScheduledItem {
    ScheduledItem {
        kind,
        id,
        title: title.to_owned(),
        course_title: course.title.clone(),
        course_slug: course.slug.clone(),
        module_title: module_title.map(str::to_owned),
        published_at,
        days_until: (published_at - now).num_days(),
    }
}

/// Everything the instructor has scheduled for later, across all their courses.
#[tracing::instrument(skip_all, fields(instructor_id = %actor.id))]
pub async fn scheduled_content(
    state: &AppState,
    actor: &Actor,
) -> Result<Vec<ScheduledItem>, AppError> {
    actor.require(Role::Instructor)?;
    let now = state.now();
    let courses = state.store.all_instructor_courses(actor.id).await?;
    let course_ids: Vec<Uuid> = courses.iter().map(|c| c.id).collect();
    let trees = module_trees(state, &course_ids).await?;
    Ok(upcoming(&courses, &trees, true, now))
}
