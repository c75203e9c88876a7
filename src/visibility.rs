//! When course content becomes visible to students.
//!
//! Visibility combines a status (courses only) with an optional scheduled
//! publish time. A `published_at` equal to `now` counts as released.

use chrono::{DateTime, Utc};

use crate::models::{Course, CourseStatus, Lesson, Module};

/// True when nothing is scheduled or the scheduled time has passed.
pub fn released(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    published_at.map_or(true, |at| at <= now)
}

/// True when a publish time is set and still ahead of `now`.
pub fn pending(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(published_at, Some(at) if at > now)
}

pub trait Schedulable {
    fn published_at(&self) -> Option<DateTime<Utc>>;

    /// Whether a non-owning viewer may see this item at `now`.
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        released(self.published_at(), now)
    }

    /// Whether this item is waiting on a future publish time.
    fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        pending(self.published_at(), now)
    }
}

impl Schedulable for Course {
    fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.status == CourseStatus::Published && released(self.published_at, now)
    }

    fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.status == CourseStatus::Published && pending(self.published_at, now)
    }
}

impl Schedulable for Module {
    fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }
}

impl Schedulable for Lesson {
    fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.is_preview || released(self.published_at, now)
    }
}

/// A lesson is reachable by students when it is a preview, or when both it and
/// its module are released. Course visibility is checked before this.
pub fn lesson_reachable(module: &Module, lesson: &Lesson, now: DateTime<Utc>) -> bool {
    lesson.is_preview || (module.is_visible(now) && lesson.is_visible(now))
}
