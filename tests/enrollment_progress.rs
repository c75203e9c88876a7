mod common;

use chrono::Duration;
use test_log::test;
use tokio::task::JoinSet;
use uuid::Uuid;

use common::{instructor, student, Harness};
use coursemark::{
    authoring, enrollment,
    error::AppError,
    identity::{Actor, Role},
    models::{CourseStatus, EnrollmentStatus, LessonProgress, ProgressOutcome, ProgressReport},
    store::{LessonDeletePolicy, StoreError},
};

fn done() -> ProgressReport {
    ProgressReport {
        completed: true,
        watch_time: 300,
    }
}

fn undone() -> ProgressReport {
    ProgressReport {
        completed: false,
        watch_time: 40,
    }
}

async fn report(h: &Harness, who: &Actor, lesson: Uuid, r: ProgressReport) -> ProgressOutcome {
    enrollment::record_progress(&h.state, who, lesson, r)
        .await
        .unwrap()
}

#[test(tokio::test)]
async fn intro_course_walkthrough() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 4).await;

    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    assert_eq!(enrolled.progress, 0);
    assert_eq!(enrolled.status, EnrollmentStatus::Active);

    report(&h, &learner, lessons[0].id, done()).await;
    let out = report(&h, &learner, lessons[1].id, done()).await;
    assert_eq!(out.enrollment.progress, 50);
    assert_eq!(out.enrollment.status, EnrollmentStatus::Active);

    h.clock.advance(Duration::minutes(10));
    report(&h, &learner, lessons[2].id, done()).await;
    let out = report(&h, &learner, lessons[3].id, done()).await;
    let first_completion = out.progress.completed_at;
    assert_eq!(out.enrollment.progress, 100);
    assert_eq!(out.enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(out.enrollment.completed_at, Some(h.state.now()));
    assert_eq!(first_completion, Some(h.state.now()));

    h.clock.advance(Duration::minutes(10));
    let out = report(&h, &learner, lessons[3].id, undone()).await;
    assert_eq!(out.enrollment.progress, 75);
    assert_eq!(out.enrollment.status, EnrollmentStatus::Active);
    assert_eq!(out.enrollment.completed_at, None);
    assert!(!out.progress.completed);
    assert_eq!(out.progress.watch_time, 40);
    assert_eq!(out.progress.completed_at, first_completion);
    assert_eq!(out.progress.last_watched_at, h.state.now());
}

#[test(tokio::test)]
async fn enrolling_twice_keeps_one_enrollment() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, _) = h.published_course(&author, "Intro", 1).await;

    let first = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(1));
    let second = enrollment::enroll(&h.state, &learner, &course.slug).await;
    assert!(matches!(second, Err(AppError::AlreadyEnrolled)));

    let mine = enrollment::my_courses(&h.state, &learner).await.unwrap();
    assert_eq!(mine.enrollments.len(), 1);
    assert_eq!(mine.enrollments[0].enrollment, first);
}

#[test(tokio::test)]
async fn enroll_requires_a_visible_course() {
    let h = Harness::new();
    let author = instructor();
    let draft = h.course(&author, "Hidden", CourseStatus::Draft).await;

    let err = enrollment::enroll(&h.state, &student(), &draft.slug)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let err = enrollment::enroll(&h.state, &author, &draft.slug)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[test(tokio::test)]
async fn progress_requires_enrollment() {
    let h = Harness::new();
    let author = instructor();
    let (_, _, lessons) = h.published_course(&author, "Intro", 2).await;

    let err = enrollment::record_progress(&h.state, &student(), lessons[0].id, done())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEnrolled));

    let err = enrollment::record_progress(&h.state, &student(), Uuid::new_v4(), done())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[test(tokio::test)]
async fn negative_watch_time_is_rejected_without_writing() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 1).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();

    let bad = ProgressReport {
        completed: true,
        watch_time: -5,
    };
    let err = enrollment::record_progress(&h.state, &learner, lessons[0].id, bad)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let rows = h.state.store.progress_for_enrollment(enrolled.id).await.unwrap();
    assert!(rows.is_empty());
}

#[test(tokio::test)]
async fn watch_time_may_move_backwards() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 1).await;
    enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();

    let far = ProgressReport {
        completed: false,
        watch_time: 500,
    };
    report(&h, &learner, lessons[0].id, far).await;
    let out = report(&h, &learner, lessons[0].id, undone()).await;
    assert_eq!(out.progress.watch_time, 40);
}

#[test(tokio::test)]
async fn recompute_is_idempotent() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 3).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    for lesson in &lessons {
        report(&h, &learner, lesson.id, done()).await;
    }

    let now = h.state.now();
    let first = h.state.store.recompute_enrollment(enrolled.id, now).await.unwrap();
    let second = h.state.store.recompute_enrollment(enrolled.id, now).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.progress, 100);
}

#[test(tokio::test)]
async fn new_lessons_count_on_the_next_write() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, module, lessons) = h.published_course(&author, "Intro", 1).await;
    enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    let out = report(&h, &learner, lessons[0].id, done()).await;
    assert_eq!(out.enrollment.status, EnrollmentStatus::Completed);

    h.lesson(&author, &course, &module, "Bonus").await;
    let out = report(&h, &learner, lessons[0].id, done()).await;
    assert_eq!(out.enrollment.progress, 50);
    assert_eq!(out.enrollment.status, EnrollmentStatus::Active);
    assert_eq!(out.enrollment.completed_at, None);
}

#[test(tokio::test)]
async fn unenroll_removes_progress_rows() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 2).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    report(&h, &learner, lessons[0].id, done()).await;

    enrollment::unenroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    assert!(h
        .state
        .store
        .progress_for_enrollment(enrolled.id)
        .await
        .unwrap()
        .is_empty());
    assert!(h
        .state
        .store
        .enrollment_for(learner.id, course.id)
        .await
        .unwrap()
        .is_none());

    // a fresh enrollment starts over
    let again = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    assert_eq!(again.progress, 0);
    enrollment::unenroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    enrollment::unenroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn deleting_a_lesson_cascades_and_recounts() {
    let h = Harness::with_policy(LessonDeletePolicy::Cascade);
    let author = instructor();
    let learner = student();
    let (course, module, lessons) = h.published_course(&author, "Intro", 2).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    report(&h, &learner, lessons[0].id, done()).await;
    let out = report(&h, &learner, lessons[1].id, undone()).await;
    assert_eq!(out.enrollment.progress, 50);

    authoring::delete_lesson(&h.state, &author, &course.slug, module.id, lessons[1].id)
        .await
        .unwrap();
    let after = h
        .state
        .store
        .enrollment_for(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.progress, 100);
    assert_eq!(after.status, EnrollmentStatus::Completed);

    authoring::delete_lesson(&h.state, &author, &course.slug, module.id, lessons[0].id)
        .await
        .unwrap();
    let rows: Vec<LessonProgress> =
        h.state.store.progress_for_enrollment(enrolled.id).await.unwrap();
    assert!(rows.is_empty());
    let after = h
        .state
        .store
        .enrollment_for(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.progress, 0);
    assert_eq!(after.status, EnrollmentStatus::Active);
    assert_eq!(after.completed_at, None);
}

#[test(tokio::test)]
async fn reject_policy_keeps_lessons_with_progress() {
    let h = Harness::with_policy(LessonDeletePolicy::Reject);
    let author = instructor();
    let learner = student();
    let (course, module, lessons) = h.published_course(&author, "Intro", 2).await;
    enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();
    report(&h, &learner, lessons[0].id, undone()).await;

    let err = authoring::delete_lesson(&h.state, &author, &course.slug, module.id, lessons[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(h.state.store.lesson_by_id(lessons[0].id).await.unwrap().is_some());

    let err = authoring::delete_module(&h.state, &author, &course.slug, module.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // untouched lessons can still go
    authoring::delete_lesson(&h.state, &author, &course.slug, module.id, lessons[1].id)
        .await
        .unwrap();
    assert!(h.state.store.lesson_by_id(lessons[1].id).await.unwrap().is_none());
}

#[test(tokio::test)]
async fn my_courses_reports_stats() {
    let h = Harness::new();
    let author = instructor();
    let learner = Actor::new(Uuid::new_v4(), [Role::Student, Role::Instructor]);
    let (first, _, lessons) = h.published_course(&author, "First", 1).await;
    let (second, _, _) = h.published_course(&author, "Second", 1).await;

    enrollment::enroll(&h.state, &learner, &first.slug).await.unwrap();
    h.clock.advance(Duration::seconds(1));
    enrollment::enroll(&h.state, &learner, &second.slug).await.unwrap();
    report(&h, &learner, lessons[0].id, done()).await;

    let mine = enrollment::my_courses(&h.state, &learner).await.unwrap();
    assert_eq!(mine.stats.in_progress, 1);
    assert_eq!(mine.stats.completed, 1);
    let order: Vec<_> = mine.enrollments.iter().map(|e| e.course.id).collect();
    assert_eq!(order, [second.id, first.id]);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn racing_enrolls_leave_one_enrollment() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, _) = h.published_course(&author, "Intro", 1).await;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let (state, learner, slug) = (h.state.clone(), learner.clone(), course.slug.clone());
        tasks.spawn(async move { enrollment::enroll(&state, &learner, &slug).await });
    }
    let (mut enrolled, mut already) = (0, 0);
    while let Some(res) = tasks.join_next().await {
        match res.unwrap() {
            Ok(_) => enrolled += 1,
            Err(AppError::AlreadyEnrolled) => already += 1,
            Err(e) => panic!("unexpected enroll error: {e}"),
        }
    }
    assert_eq!((enrolled, already), (1, 7));
    let rows = h.state.store.enrollments_for_user(learner.id).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn racing_first_reports_share_one_progress_row() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 2).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let (state, learner, lesson) = (h.state.clone(), learner.clone(), lessons[0].id);
        tasks.spawn(async move { enrollment::record_progress(&state, &learner, lesson, done()).await });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap().unwrap();
    }

    let rows = h.state.store.progress_for_enrollment(enrolled.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    let after = h
        .state
        .store
        .enrollment_for(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.progress, 50);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn interleaved_reports_end_on_a_consistent_count() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, lessons) = h.published_course(&author, "Intro", 6).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();

    // the last two lessons only ever get partial reports
    let mut tasks = JoinSet::new();
    for (i, lesson) in lessons.iter().enumerate() {
        for round in 0..3 {
            let (state, learner, lesson) = (h.state.clone(), learner.clone(), lesson.id);
            let r = if i < 4 && round != 1 { done() } else { undone() };
            tasks.spawn(async move { enrollment::record_progress(&state, &learner, lesson, r).await });
        }
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap().unwrap();
    }

    let rows = h.state.store.progress_for_enrollment(enrolled.id).await.unwrap();
    assert_eq!(rows.len(), 6);
    let completed = rows.iter().filter(|p| p.completed).count() as i32;
    let stored = h
        .state
        .store
        .enrollment_for(learner.id, course.id)
        .await
        .unwrap()
        .unwrap();
    let recounted = h
        .state
        .store
        .recompute_enrollment(enrolled.id, h.state.now())
        .await
        .unwrap();
    assert_eq!(stored, recounted);
    assert_eq!(stored.progress, (completed * 100 + 3) / 6);
    assert_eq!(stored.status, EnrollmentStatus::Active);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn reject_policy_holds_against_a_concurrent_first_report() {
    for _ in 0..16 {
        let h = Harness::with_policy(LessonDeletePolicy::Reject);
        let author = instructor();
        let learner = student();
        let (course, module, lessons) = h.published_course(&author, "Intro", 1).await;
        let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
            .await
            .unwrap();
        let lesson = lessons[0].id;

        let (state, who) = (h.state.clone(), learner.clone());
        let write = tokio::spawn(async move {
            enrollment::record_progress(&state, &who, lesson, undone()).await
        });
        let (state, slug) = (h.state.clone(), course.slug.clone());
        let delete = tokio::spawn(async move {
            authoring::delete_lesson(&state, &author, &slug, module.id, lesson).await
        });
        let (write, delete) = (write.await.unwrap(), delete.await.unwrap());

        let rows = h.state.store.progress_for_enrollment(enrolled.id).await.unwrap();
        match (write, delete) {
            (Ok(_), Err(AppError::Conflict(_))) => {
                assert_eq!(rows.len(), 1);
                assert!(h.state.store.lesson_by_id(lesson).await.unwrap().is_some());
            }
            (Err(AppError::NotFound), Ok(())) => assert!(rows.is_empty()),
            (write, delete) => panic!("inconsistent outcome: {write:?} / {delete:?}"),
        }
    }
}

#[test(tokio::test)]
async fn progress_on_a_vanished_lesson_is_not_found() {
    let h = Harness::new();
    let author = instructor();
    let learner = student();
    let (course, _, _) = h.published_course(&author, "Intro", 1).await;
    let enrolled = enrollment::enroll(&h.state, &learner, &course.slug)
        .await
        .unwrap();

    let err = h
        .state
        .store
        .record_progress(enrolled.id, Uuid::new_v4(), &done(), h.state.now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
    assert!(h
        .state
        .store
        .progress_for_enrollment(enrolled.id)
        .await
        .unwrap()
        .is_empty());
}
