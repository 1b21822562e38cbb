use agentum_runtime::{Error, Registry, SessionLifecycle};
use agentum_store::SessionPatch;
use agentum_testing::TestWorld;
use agentum_types::SessionStatus;
use std::sync::{Arc, Mutex};

fn lifecycle(world: &TestWorld) -> SessionLifecycle {
    let store = Arc::new(Mutex::new(world.open_db().unwrap()));
    SessionLifecycle::new(store, world.layout.clone())
}

async fn seed_user(world: &TestWorld) -> String {
    let db = world.open_db().unwrap();
    tokio::task::spawn_blocking(move || db.get_or_create_user(None).unwrap().id)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_builds_row_and_directory() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;

    let session = lifecycle.create(&user, "do the thing", "test-model").await.unwrap();

    assert_eq!(session.status, SessionStatus::Pending);
    assert!(world.layout.dir(&session.id).is_dir());
    assert!(world.layout.workspace(&session.id).is_dir());
    assert_eq!(
        session.working_dir,
        world.layout.workspace(&session.id).display().to_string()
    );

    let row = world
        .open_db()
        .unwrap()
        .get_session_any(&session.id)
        .unwrap();
    assert!(row.is_some());
}

#[tokio::test]
async fn test_create_rolls_back_directory_on_row_failure() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);

    // Unknown user violates the foreign key, so the row insert fails
    // after the directory was made; the directory must be gone again.
    let err = lifecycle
        .create("no-such-user", "task", "test-model")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Create(_)));

    let entries: Vec<_> = std::fs::read_dir(world.layout.root())
        .unwrap()
        .collect::<std::io::Result<Vec<_>>>()
        .unwrap();
    assert!(entries.is_empty(), "rollback must remove the session dir");
}

#[tokio::test]
async fn test_create_rejects_empty_task() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;

    let err = lifecycle.create(&user, "   ", "test-model").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_transition_rules() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;
    let session = lifecycle.create(&user, "task", "test-model").await.unwrap();

    let running = lifecycle
        .transition(&session.id, SessionStatus::Running)
        .await
        .unwrap();
    assert_eq!(running.status, SessionStatus::Running);
    assert!(running.completed_at.is_none());

    let complete = lifecycle
        .transition(&session.id, SessionStatus::Complete)
        .await
        .unwrap();
    assert_eq!(complete.status, SessionStatus::Complete);
    assert!(complete.completed_at.is_some());

    // Terminal is final
    let err = lifecycle
        .transition(&session.id, SessionStatus::Running)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transition { .. }));
}

#[tokio::test]
async fn test_resume_validation() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;
    let session = lifecycle.create(&user, "task", "test-model").await.unwrap();

    // Pending session has never run
    let err = lifecycle
        .resume(&session.id, &user, "continue")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotResumable(_)));

    // Running session cannot be resumed
    lifecycle
        .transition(&session.id, SessionStatus::Running)
        .await
        .unwrap();
    let err = lifecycle
        .resume(&session.id, &user, "continue")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transition { .. }));

    // Cancelled session resumes with the documented context block
    lifecycle
        .transition(&session.id, SessionStatus::Cancelled)
        .await
        .unwrap();
    let (resumed, effective) = lifecycle
        .resume(&session.id, &user, "continue")
        .await
        .unwrap();
    assert_eq!(resumed.id, session.id);
    assert!(effective.starts_with("[Resume context]"));
    assert!(effective.ends_with("continue"));
}

#[tokio::test]
async fn test_resume_of_complete_session_has_plain_task() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;
    let session = lifecycle.create(&user, "task", "test-model").await.unwrap();

    lifecycle
        .transition(&session.id, SessionStatus::Running)
        .await
        .unwrap();
    lifecycle
        .transition(&session.id, SessionStatus::Complete)
        .await
        .unwrap();

    let (_, effective) = lifecycle
        .resume(&session.id, &user, "another round")
        .await
        .unwrap();
    assert_eq!(effective, "another round");
}

#[tokio::test]
async fn test_resume_is_owner_scoped() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;
    let stranger = seed_user(&world).await;
    let session = lifecycle.create(&user, "task", "test-model").await.unwrap();

    let err = lifecycle
        .resume(&session.id, &stranger, "mine now")
        .await
        .unwrap_err();
    // Unowned and missing are indistinguishable
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_pending_session_flips_immediately() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let registry = Registry::new();
    let user = seed_user(&world).await;
    let session = lifecycle.create(&user, "task", "test-model").await.unwrap();

    lifecycle
        .request_cancel(&session.id, &user, &registry)
        .await
        .unwrap();

    let row = world
        .open_db()
        .unwrap()
        .get_session_any(&session.id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, SessionStatus::Cancelled);

    // Idempotent
    lifecycle
        .request_cancel(&session.id, &user, &registry)
        .await
        .unwrap();

    // Cancel after complete is a transition error on another session
    let other = lifecycle.create(&user, "task2", "test-model").await.unwrap();
    lifecycle
        .transition(&other.id, SessionStatus::Running)
        .await
        .unwrap();
    lifecycle
        .transition(&other.id, SessionStatus::Complete)
        .await
        .unwrap();
    let err = lifecycle
        .request_cancel(&other.id, &user, &registry)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transition { .. }));
}

#[tokio::test]
async fn test_cleanup_stale_sessions() {
    let world = TestWorld::new().unwrap();
    let lifecycle = lifecycle(&world);
    let user = seed_user(&world).await;

    let stale = lifecycle.create(&user, "task", "test-model").await.unwrap();
    let fine = lifecycle.create(&user, "task2", "test-model").await.unwrap();

    let db = world.open_db().unwrap();
    db.update_session(&stale.id, &SessionPatch::status(SessionStatus::Running))
        .unwrap();

    let flipped = lifecycle.cleanup_stale_sessions().await.unwrap();
    assert_eq!(flipped, vec![stale.id.as_str().to_string()]);

    let db = world.open_db().unwrap();
    assert_eq!(
        db.get_session_any(&stale.id).unwrap().unwrap().status,
        SessionStatus::Failed
    );
    assert_eq!(
        db.get_session_any(&fine.id).unwrap().unwrap().status,
        SessionStatus::Pending
    );
}
