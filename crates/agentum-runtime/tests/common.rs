//! Shared setup for runtime integration tests.

use agentum_policy::SandboxConfig;
use agentum_runtime::{AgentConfig, LimitsConfig, Runtime, ServiceConfig, TaskRunner};
use agentum_testing::TestWorld;
use agentum_types::{Session, SessionId};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn service_config(agent_program: &Path) -> ServiceConfig {
    ServiceConfig {
        agent: AgentConfig {
            program: agent_program.display().to_string(),
            args: Vec::new(),
            max_turns: 5,
            timeout_seconds: 30,
            grace_period_seconds: 2,
            default_model: "test-model".to_string(),
        },
        limits: LimitsConfig {
            max_concurrent_sessions: 4,
            subscriber_buffer: 256,
            heartbeat_interval_seconds: 30,
            max_line_bytes: 64 * 1024,
        },
        ..ServiceConfig::default()
    }
}

pub fn runtime_for(
    world: &TestWorld,
    config: ServiceConfig,
    sandbox: SandboxConfig,
) -> Arc<Runtime> {
    let store = Arc::new(Mutex::new(world.open_db().expect("open store")));
    Runtime::new(
        config,
        store,
        world.layout.clone(),
        agentum_testing::fixtures::default_profile(),
        sandbox,
    )
}

pub fn runner(runtime: &Arc<Runtime>) -> TaskRunner {
    TaskRunner::new(runtime.clone())
}

/// Poll the store until the persisted event list ends with a terminal
/// event. The writer commits asynchronously, so the terminal status can
/// land a beat before the terminal event row.
pub async fn wait_terminal_event(
    world: &TestWorld,
    id: &SessionId,
) -> Vec<agentum_types::AgentEvent> {
    for _ in 0..50 {
        let events = world
            .open_db()
            .expect("open store")
            .list_events(id, 0)
            .expect("list events");
        if events.last().map(|e| e.is_terminal()).unwrap_or(false) {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("terminal event for {} never persisted", id);
}

/// Poll the store until the session leaves `running`/`pending`.
pub async fn wait_terminal(world: &TestWorld, id: &SessionId) -> Session {
    for _ in 0..150 {
        let session = world
            .open_db()
            .expect("open store")
            .get_session_any(id)
            .expect("fetch session")
            .expect("session exists");
        if session.status.is_terminal() {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("session {} never reached a terminal state", id);
}
