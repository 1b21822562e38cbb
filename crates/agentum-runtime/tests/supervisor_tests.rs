mod common;

use agentum_runtime::RunRequest;
use agentum_testing::{TestWorld, agent, fixtures};
use agentum_types::{EventKind, EventPayload, SessionStatus};
use common::{runner, runtime_for, service_config, wait_terminal};
use std::time::Duration;

fn request(task: &str) -> RunRequest {
    RunRequest {
        task: task.to_string(),
        ..RunRequest::default()
    }
}

async fn seed_user(world: &TestWorld) -> String {
    let db = world.open_db().unwrap();
    tokio::task::spawn_blocking(move || db.get_or_create_user(None).unwrap().id)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_happy_path_end_to_end() {
    let world = TestWorld::new().unwrap();
    let program = agent::happy_agent(&world.bin_dir());
    let runtime = runtime_for(&world, service_config(&program), fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner
        .start(&user, request("write hello into out.yaml"))
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Running);

    // Live subscription while the agent is inside its post-start sleep
    let hub = runtime.registry.hub(&session.id).expect("live hub");
    let mut sub = hub.subscribe(0).await;

    let mut live = Vec::new();
    let collect = async {
        while let Some(event) = sub.receiver.recv().await {
            live.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("stream must close after terminal event");

    let kinds: Vec<EventKind> = live.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds.first(), Some(&EventKind::AgentStart));
    assert_eq!(kinds.last(), Some(&EventKind::AgentComplete));
    assert!(kinds.contains(&EventKind::ToolStart));
    assert!(kinds.contains(&EventKind::ToolComplete));

    // Live sequences are dense from 1
    let sequences: Vec<u64> = live.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=live.len() as u64).collect::<Vec<_>>());

    // The partial message was streamed live but must not be persisted
    assert!(live.iter().any(|e| matches!(
        &e.payload,
        EventPayload::Message(m) if m.is_partial
    )));

    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Complete);
    assert_eq!(done.num_turns, 1);
    assert!(done.total_cost_usd > 0.0);
    assert_eq!(done.resume_id.as_deref(), Some("resume-token-1"));
    assert!(done.completed_at.is_some());

    let persisted = common::wait_terminal_event(&world, &session.id).await;
    assert!(!persisted.is_empty());
    // Persisted set is the live set minus partials, order preserved
    let live_persistable: Vec<u64> = live
        .iter()
        .filter(|e| e.is_persistable())
        .map(|e| e.sequence)
        .collect();
    let stored: Vec<u64> = persisted.iter().map(|e| e.sequence).collect();
    assert_eq!(stored, live_persistable);
    assert!(persisted.iter().all(|e| match &e.payload {
        EventPayload::Message(m) => !m.is_partial,
        _ => true,
    }));

    // Raw stdout capture exists and the agent wrote its output document
    assert!(world.layout.log_file(&session.id).exists());
    let output = world.layout.parse_output(&session.id).unwrap();
    assert_eq!(output["result"], "ok");
}

#[tokio::test]
async fn test_cancel_during_tool_call() {
    let world = TestWorld::new().unwrap();
    let program = agent::slow_agent(&world.bin_dir(), 30);
    let runtime = runtime_for(&world, service_config(&program), fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("long task")).await.unwrap();
    let hub = runtime.registry.hub(&session.id).expect("live hub");
    let mut sub = hub.subscribe(0).await;

    // Wait for the first tool_start, then cancel
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.receiver.recv())
            .await
            .expect("events before cancel")
            .expect("stream open");
        if event.kind() == EventKind::ToolStart {
            break;
        }
    }
    runner.cancel(&session.id, &user).await.unwrap();

    // A cancelled terminal event arrives within the bound and closes the stream
    let mut terminal = None;
    let drain = async {
        while let Some(event) = sub.receiver.recv().await {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("cancelled event within 5s");

    let terminal = terminal.expect("terminal event delivered");
    match &terminal.payload {
        EventPayload::Cancelled(c) => assert!(c.resumable),
        other => panic!("expected cancelled, got {:?}", other.kind()),
    }

    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Cancelled);
    assert_eq!(done.resume_id.as_deref(), Some("resume-token-2"));

    // Cancel is idempotent once the session is already cancelled
    runner.cancel(&session.id, &user).await.unwrap();
}

#[tokio::test]
async fn test_resume_after_cancel() {
    let world = TestWorld::new().unwrap();
    let slow = agent::slow_agent(&world.bin_dir(), 30);
    let runtime = runtime_for(&world, service_config(&slow), fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("long task")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    runner.cancel(&session.id, &user).await.unwrap();
    let cancelled = wait_terminal(&world, &session.id).await;
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    let first_last_seq = world
        .open_db()
        .unwrap()
        .last_sequence(&session.id)
        .unwrap();

    // Second run on the same session completes with the happy agent
    let happy = agent::happy_agent(&world.bin_dir());
    let runtime2 = runtime_for(&world, service_config(&happy), fixtures::sandbox_disabled());
    let runner2 = common::runner(&runtime2);

    let resumed = runner2
        .resume(&session.id, &user, request("continue please"))
        .await
        .unwrap();
    assert_eq!(resumed.status, SessionStatus::Running);
    assert!(!resumed.cancel_requested);

    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Complete);

    // Sequences continued past the first run without collision
    let events = common::wait_terminal_event(&world, &session.id).await;
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert!(*sequences.last().unwrap() > first_last_seq);

    // Second run reused the stored resume id and saw a fresh agent_start
    let second_run: Vec<_> = events
        .iter()
        .filter(|e| e.sequence > first_last_seq)
        .collect();
    assert!(second_run.iter().any(|e| e.kind() == EventKind::AgentStart));
}

#[tokio::test]
async fn test_child_crash_marks_failed() {
    let world = TestWorld::new().unwrap();
    let program = agent::crash_agent(&world.bin_dir());
    let runtime = runtime_for(&world, service_config(&program), fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("doomed")).await.unwrap();
    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Failed);

    let events = common::wait_terminal_event(&world, &session.id).await;
    let last = events.last().expect("terminal event persisted");
    match &last.payload {
        EventPayload::Error(err) => assert_eq!(err.error_type, "child_crash"),
        other => panic!("expected error event, got {:?}", other.kind()),
    }
}

#[tokio::test]
async fn test_timeout_marks_failed() {
    let world = TestWorld::new().unwrap();
    let program = agent::slow_agent(&world.bin_dir(), 30);
    let mut config = service_config(&program);
    config.agent.timeout_seconds = 1;
    let runtime = runtime_for(&world, config, fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("slow")).await.unwrap();
    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Failed);

    let events = common::wait_terminal_event(&world, &session.id).await;
    let last = events.last().expect("terminal event persisted");
    match &last.payload {
        EventPayload::Error(err) => assert_eq!(err.error_type, "timeout"),
        other => panic!("expected timeout error, got {:?}", other.kind()),
    }
}

#[tokio::test]
async fn test_malformed_lines_are_dropped_not_fatal() {
    let world = TestWorld::new().unwrap();
    let program = agent::garbage_agent(&world.bin_dir());
    let runtime = runtime_for(&world, service_config(&program), fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("messy")).await.unwrap();
    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Complete);

    let events = common::wait_terminal_event(&world, &session.id).await;
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::AgentStart,
            EventKind::Message,
            EventKind::AgentComplete
        ]
    );
    // Sequences stay dense even though garbage lines were interleaved
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_sandbox_fail_closed() {
    let world = TestWorld::new().unwrap();
    let program = agent::happy_agent(&world.bin_dir());
    let runtime = runtime_for(
        &world,
        service_config(&program),
        fixtures::sandbox_missing_binary(),
    );
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("sandboxed")).await.unwrap();
    let done = wait_terminal(&world, &session.id).await;
    assert_eq!(done.status, SessionStatus::Failed);

    let events = common::wait_terminal_event(&world, &session.id).await;
    let last = events.last().expect("terminal event persisted");
    match &last.payload {
        EventPayload::Error(err) => assert_eq!(err.error_type, "sandbox_unavailable"),
        other => panic!("expected sandbox error, got {:?}", other.kind()),
    }

    // Fail-closed: the agent never ran, so no output document exists
    assert!(world.layout.parse_output(&session.id).is_err());
}

#[tokio::test]
async fn test_denied_tool_loop_interrupts_run() {
    let world = TestWorld::new().unwrap();
    let program = agent::denied_loop_agent(&world.bin_dir());
    let runtime = runtime_for(&world, service_config(&program), fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let session = runner.start(&user, request("rogue")).await.unwrap();
    let done = wait_terminal(&world, &session.id).await;
    // The permission audit escalates repeated denials into an abort
    assert_eq!(done.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_capacity_bound() {
    let world = TestWorld::new().unwrap();
    let program = agent::slow_agent(&world.bin_dir(), 30);
    let mut config = service_config(&program);
    config.limits.max_concurrent_sessions = 1;
    let runtime = runtime_for(&world, config, fixtures::sandbox_disabled());
    let runner = runner(&runtime);
    let user = seed_user(&world).await;

    let first = runner.start(&user, request("occupies the slot")).await.unwrap();

    let err = runner.start(&user, request("one too many")).await.unwrap_err();
    assert!(matches!(err, agentum_runtime::Error::Capacity(1)));

    runner.cancel(&first.id, &user).await.unwrap();
    wait_terminal(&world, &first.id).await;
}
