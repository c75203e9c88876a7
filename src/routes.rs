use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use crate::{
    access, authoring, enrollment,
    error::AppError,
    identity::Actor,
    models::*,
    AppState,
};

type JsonBody<T> = WithRejection<Json<T>, AppError>;
type QueryArgs<T> = WithRejection<Query<T>, AppError>;
type PathArgs<T> = WithRejection<Path<T>, AppError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        // public catalog
        .route("/api/courses", get(catalog))
        .route("/api/courses/:slug", get(course_detail))
        // student
        .route("/api/student/courses", get(my_courses))
        .route("/api/student/courses/:slug/enroll", post(enroll))
        .route("/api/student/courses/:slug/unenroll", post(unenroll))
        .route("/api/student/courses/:slug/learn", get(learn))
        .route("/api/student/lessons/:lesson_id/progress", post(record_progress))
        .route("/api/student/schedule", get(student_schedule))
        // instructor
        .route("/api/instructor/courses", get(list_courses).post(create_course))
        .route(
            "/api/instructor/courses/:slug",
            get(show_course).put(update_course).delete(delete_course),
        )
        .route(
            "/api/instructor/courses/:slug/modules",
            get(list_modules).post(create_module),
        )
        .route(
            "/api/instructor/courses/:slug/modules/:module_id",
            get(show_module).put(update_module).delete(delete_module),
        )
        .route(
            "/api/instructor/courses/:slug/modules/:module_id/lessons",
            get(list_lessons).post(create_lesson),
        )
        .route(
            "/api/instructor/courses/:slug/modules/:module_id/lessons/:lesson_id",
            get(show_lesson).put(update_lesson).delete(delete_lesson),
        )
        .route("/api/instructor/schedule", get(instructor_schedule))
        .with_state(state)
}

// --- public ---

async fn catalog(
    State(state): State<AppState>,
    WithRejection(Query(q), _): QueryArgs<CatalogQuery>,
) -> Result<Json<Page<Course>>, AppError> {
    Ok(Json(access::list_catalog(&state, q).await?))
}

async fn course_detail(
    State(state): State<AppState>,
    viewer: Option<Actor>,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<Json<CourseDetail>, AppError> {
    Ok(Json(access::course_detail(&state, &slug, viewer.as_ref()).await?))
}

// --- student ---

async fn my_courses(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<MyCourses>, AppError> {
    Ok(Json(enrollment::my_courses(&state, &actor).await?))
}

async fn enroll(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<impl IntoResponse, AppError> {
    let rec = enrollment::enroll(&state, &actor, &slug).await?;
    Ok((StatusCode::CREATED, Json(rec)))
}

async fn unenroll(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<StatusCode, AppError> {
    enrollment::unenroll(&state, &actor, &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn learn(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<Json<LearnView>, AppError> {
    Ok(Json(enrollment::learn(&state, &actor, &slug).await?))
}

async fn record_progress(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(lesson_id), _): PathArgs<Uuid>,
    WithRejection(Json(report), _): JsonBody<ProgressReport>,
) -> Result<Json<ProgressOutcome>, AppError> {
    Ok(Json(
        enrollment::record_progress(&state, &actor, lesson_id, report).await?,
    ))
}

async fn student_schedule(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<ScheduledItem>>, AppError> {
    Ok(Json(enrollment::student_schedule(&state, &actor).await?))
}

// --- instructor: courses ---

async fn list_courses(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Query(q), _): QueryArgs<InstructorCourseQuery>,
) -> Result<Json<Page<Course>>, AppError> {
    Ok(Json(authoring::list_courses(&state, &actor, q).await?))
}

async fn create_course(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Json(req), _): JsonBody<CourseInput>,
) -> Result<impl IntoResponse, AppError> {
    let course = authoring::create_course(&state, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn show_course(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<Json<InstructorCourseView>, AppError> {
    Ok(Json(authoring::show_course(&state, &actor, &slug).await?))
}

async fn update_course(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
    WithRejection(Json(req), _): JsonBody<CourseInput>,
) -> Result<Json<Course>, AppError> {
    Ok(Json(authoring::update_course(&state, &actor, &slug, req).await?))
}

async fn delete_course(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<StatusCode, AppError> {
    authoring::delete_course(&state, &actor, &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- instructor: modules ---

async fn list_modules(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
) -> Result<Json<Vec<Module>>, AppError> {
    Ok(Json(authoring::list_modules(&state, &actor, &slug).await?))
}

async fn create_module(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path(slug), _): PathArgs<String>,
    WithRejection(Json(req), _): JsonBody<ModuleInput>,
) -> Result<impl IntoResponse, AppError> {
    let module = authoring::create_module(&state, &actor, &slug, req).await?;
    Ok((StatusCode::CREATED, Json(module)))
}

async fn show_module(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id)), _): PathArgs<(String, Uuid)>,
) -> Result<Json<Module>, AppError> {
    Ok(Json(
        authoring::show_module(&state, &actor, &slug, module_id).await?,
    ))
}

async fn update_module(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id)), _): PathArgs<(String, Uuid)>,
    WithRejection(Json(req), _): JsonBody<ModuleInput>,
) -> Result<Json<Module>, AppError> {
    Ok(Json(
        authoring::update_module(&state, &actor, &slug, module_id, req).await?,
    ))
}

async fn delete_module(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id)), _): PathArgs<(String, Uuid)>,
) -> Result<StatusCode, AppError> {
    authoring::delete_module(&state, &actor, &slug, module_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- instructor: lessons ---

async fn list_lessons(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id)), _): PathArgs<(String, Uuid)>,
) -> Result<Json<Vec<Lesson>>, AppError> {
    Ok(Json(
        authoring::list_lessons(&state, &actor, &slug, module_id).await?,
    ))
}

async fn create_lesson(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id)), _): PathArgs<(String, Uuid)>,
    WithRejection(Json(req), _): JsonBody<LessonInput>,
) -> Result<impl IntoResponse, AppError> {
    let lesson = authoring::create_lesson(&state, &actor, &slug, module_id, req).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn show_lesson(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id, lesson_id)), _): PathArgs<(String, Uuid, Uuid)>,
) -> Result<Json<Lesson>, AppError> {
    Ok(Json(
        authoring::show_lesson(&state, &actor, &slug, module_id, lesson_id).await?,
    ))
}

async fn update_lesson(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id, lesson_id)), _): PathArgs<(String, Uuid, Uuid)>,
    WithRejection(Json(req), _): JsonBody<LessonInput>,
) -> Result<Json<Lesson>, AppError> {
    Ok(Json(
        authoring::update_lesson(&state, &actor, &slug, module_id, lesson_id, req).await?,
    ))
}

async fn delete_lesson(
    State(state): State<AppState>,
    actor: Actor,
    WithRejection(Path((slug, module_id, lesson_id)), _): PathArgs<(String, Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    authoring::delete_lesson(&state, &actor, &slug, module_id, lesson_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn instructor_schedule(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<ScheduledItem>>, AppError> {
    Ok(Json(access::scheduled_content(&state, &actor).await?))
}
