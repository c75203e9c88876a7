use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use std::{fmt, str::FromStr};
use uuid::Uuid;
use validator::Validate;

#[derive(
    sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
)]
#[sqlx(type_name = "course_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Published => "published",
            CourseStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CourseStatus::Draft),
            "published" => Ok(CourseStatus::Published),
            "archived" => Ok(CourseStatus::Archived),
            other => Err(format!("unknown course status `{other}`")),
        }
    }
}

#[derive(
    sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
)]
#[sqlx(type_name = "course_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CourseLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl CourseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseLevel::Beginner => "beginner",
            CourseLevel::Intermediate => "intermediate",
            CourseLevel::Advanced => "advanced",
        }
    }
}

impl fmt::Display for CourseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginner" => Ok(CourseLevel::Beginner),
            "intermediate" => Ok(CourseLevel::Intermediate),
            "advanced" => Ok(CourseLevel::Advanced),
            other => Err(format!("unknown course level `{other}`")),
        }
    }
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub slug: String, // immutable once created
    pub status: CourseStatus,
    pub level: CourseLevel,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Module {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub slug: String, // unique per course
    pub description: Option<String>,
    #[sqlx(rename = "position")]
    pub order: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lesson {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub slug: String, // unique per module
    pub description: Option<String>,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub duration: Option<i32>, // seconds
    #[sqlx(rename = "position")]
    pub order: i32,
    pub is_preview: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub status: EnrollmentStatus,
}

impl Enrollment {
    pub fn new(user_id: Uuid, course_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            enrolled_at: now,
            completed_at: None,
            progress: 0,
            status: EnrollmentStatus::Active,
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonProgress {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub lesson_id: Uuid,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_watched_at: DateTime<Utc>,
    pub watch_time: i32, // seconds, as reported by the client
}

impl LessonProgress {
    /// Blank row used by get-or-create before the first report is applied.
    pub fn blank(enrollment_id: Uuid, lesson_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            enrollment_id,
            lesson_id,
            completed: false,
            completed_at: None,
            last_watched_at: now,
            watch_time: 0,
        }
    }
}

// --- requests ---

#[derive(Deserialize, Validate, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub completed: bool,
    #[validate(range(min = 0))]
    pub watch_time: i32,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
pub struct CourseInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub level: Option<CourseLevel>,
    pub status: Option<CourseStatus>,
    #[serde(default)]
    pub publish_now: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
pub struct ModuleInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub publish_now: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
pub struct LessonInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    #[validate(url)]
    pub video_url: Option<String>,
    #[validate(range(min = 0))]
    pub duration: Option<i32>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub is_preview: bool,
    #[serde(default)]
    pub publish_now: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSort {
    #[default]
    Title,
    Newest,
}

impl fmt::Display for CatalogSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogSort::Title => f.write_str("title"),
            CatalogSort::Newest => f.write_str("newest"),
        }
    }
}

impl FromStr for CatalogSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(CatalogSort::Title),
            "newest" => Ok(CatalogSort::Newest),
            other => Err(format!("unknown sort `{other}`")),
        }
    }
}

/// Query string of the public catalog. Empty values count as absent.
#[serde_as]
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CatalogQuery {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub search: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub level: Option<CourseLevel>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub sort: Option<CatalogSort>,
    #[serde(default = "first_page")]
    pub page: i64,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone, Default)]
pub struct InstructorCourseQuery {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub search: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub status: Option<CourseStatus>,
    #[serde(default = "first_page")]
    pub page: i64,
}

fn first_page() -> i64 {
    1
}

// --- store-facing filters ---

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogFilter {
    pub search: Option<String>,
    pub level: Option<CourseLevel>,
    pub sort: CatalogSort,
    pub page: i64,
    pub per_page: i64,
}

impl CatalogFilter {
    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.per_page)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructorFilter {
    pub search: Option<String>,
    pub status: Option<CourseStatus>,
    pub page: i64,
    pub per_page: i64,
}

impl InstructorFilter {
    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.per_page)
    }
}

/// Rows to skip before `page`; saturates for page numbers past any real table.
fn page_offset(page: i64, per_page: i64) -> i64 {
    page.saturating_sub(1).max(0).saturating_mul(per_page.max(0))
}

// --- responses ---

#[derive(Serialize, Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct LessonSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub order: i32,
    pub duration: Option<i32>,
    pub is_preview: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub is_available: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct ModuleOutline {
    #[serde(flatten)]
    pub module: Module,
    pub is_available: bool,
    pub lessons: Vec<LessonSummary>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CourseDetail {
    pub course: Course,
    pub modules: Vec<ModuleOutline>,
    pub is_enrolled: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct ModuleWithLessons {
    #[serde(flatten)]
    pub module: Module,
    pub lessons: Vec<Lesson>,
}

#[derive(Serialize, Debug, Clone)]
pub struct InstructorCourseView {
    pub course: Course,
    pub modules: Vec<ModuleWithLessons>,
}

#[derive(Serialize, Debug, Clone)]
pub struct LearnLesson {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub is_available: bool,
    pub progress: Option<LessonProgress>,
}

#[derive(Serialize, Debug, Clone)]
pub struct LearnModule {
    #[serde(flatten)]
    pub module: Module,
    pub is_available: bool,
    pub lessons: Vec<LearnLesson>,
}

#[derive(Serialize, Debug, Clone)]
pub struct LearnView {
    pub course: Course,
    pub enrollment: Enrollment,
    pub modules: Vec<LearnModule>,
}

#[derive(Serialize, Debug, Clone)]
pub struct EnrolledCourse {
    pub enrollment: Enrollment,
    pub course: Course,
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudentStats {
    pub in_progress: usize,
    pub completed: usize,
}

#[derive(Serialize, Debug, Clone)]
pub struct MyCourses {
    pub enrollments: Vec<EnrolledCourse>,
    pub stats: StudentStats,
}

#[derive(Serialize, Debug, Clone)]
pub struct ProgressOutcome {
    pub progress: LessonProgress,
    pub enrollment: Enrollment,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledKind {
    Course,
    Module,
    Lesson,
}

#[derive(Serialize, Debug, Clone)]
pub struct ScheduledItem {
    pub kind: ScheduledKind,
    pub id: Uuid,
    pub title: String,
    pub course_title: String,
    pub course_slug: String,
    pub module_title: Option<String>,
    pub published_at: DateTime<Utc>,
    pub days_until: i64,
}
