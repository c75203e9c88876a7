#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use coursemark::{
    authoring,
    clock::ManualClock,
    config::Settings,
    identity::{Actor, Role},
    models::{Course, CourseInput, CourseStatus, Lesson, LessonInput, Module, ModuleInput},
    store::{LessonDeletePolicy, MemoryStore, Store},
    AppState,
};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_policy(policy: LessonDeletePolicy) -> Self {
        Self::with_settings(Settings {
            lesson_delete_policy: policy,
            ..Settings::default()
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::on_store(Arc::new(MemoryStore::new()), settings)
    }

    pub fn on_store(store: Arc<dyn Store>, settings: Settings) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let state = AppState::new(store, clock.clone(), settings);
        Self { state, clock }
    }

    pub async fn course(&self, owner: &Actor, title: &str, status: CourseStatus) -> Course {
        authoring::create_course(
            &self.state,
            owner,
            CourseInput {
                title: title.into(),
                status: Some(status),
                ..CourseInput::default()
            },
        )
        .await
        .unwrap()
    }

    pub async fn module(&self, owner: &Actor, course: &Course, title: &str) -> Module {
        authoring::create_module(
            &self.state,
            owner,
            &course.slug,
            ModuleInput {
                title: title.into(),
                ..ModuleInput::default()
            },
        )
        .await
        .unwrap()
    }

    pub async fn lesson(&self, owner: &Actor, course: &Course, module: &Module, title: &str) -> Lesson {
        authoring::create_lesson(
            &self.state,
            owner,
            &course.slug,
            module.id,
            LessonInput {
                title: title.into(),
                content: Some(format!("{title} body")),
                ..LessonInput::default()
            },
        )
        .await
        .unwrap()
    }

    /// A published course with one module holding `lessons` lessons.
    pub async fn published_course(
        &self,
        owner: &Actor,
        title: &str,
        lessons: usize,
    ) -> (Course, Module, Vec<Lesson>) {
        let course = self.course(owner, title, CourseStatus::Published).await;
        let module = self.module(owner, &course, "Basics").await;
        let mut rows = Vec::with_capacity(lessons);
        for n in 1..=lessons {
            rows.push(self.lesson(owner, &course, &module, &format!("Lesson {n}")).await);
        }
        (course, module, rows)
    }
}

pub fn instructor() -> Actor {
    Actor::new(Uuid::new_v4(), [Role::Instructor])
}

pub fn student() -> Actor {
    Actor::new(Uuid::new_v4(), [Role::Student])
}
