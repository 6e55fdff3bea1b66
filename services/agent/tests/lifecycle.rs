//! Integration tests for container lifecycle convergence.
//!
//! Drives the action executor against MockRuntime and checks the resulting
//! state, the `changed` flag and the exact runtime mutations.

use std::sync::Arc;
use std::time::Duration;

use dockhand_agent::runtime::{Interference, MockRuntime, OpKind, RuntimeError};
use dockhand_agent::{ActionExecutor, ExecutorConfig};
use dockhand_reconcile::{
    Action, ActionOptions, ActionRequest, Command, ContainerSpec, ConvergenceResult, ErrorKind,
    LifecycleState, SpecField,
};
use rstest::rstest;

fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        stop_timeout: Duration::from_secs(1),
        settle_timeout: Duration::from_millis(500),
        stop_grace: Duration::from_millis(50),
    }
}

async fn test_runtime() -> Arc<MockRuntime> {
    let runtime = Arc::new(MockRuntime::new());
    runtime.add_image("busybox", Command::args(["sh"])).await;
    runtime
        .add_image("nginx:1.25", Command::args(["nginx", "-g", "daemon off;"]))
        .await;
    runtime
}

fn busybox() -> ContainerSpec {
    let mut spec = ContainerSpec::new("busybox".parse().unwrap());
    spec.command = Command::shell("sh -c 'while true; do echo hello; sleep 1; done'").unwrap();
    spec
}

fn with_spec(name: &str, action: Action, spec: ContainerSpec) -> ActionRequest {
    ActionRequest::new(name, action).with_spec(spec)
}

async fn converge(executor: &ActionExecutor, request: ActionRequest) -> ConvergenceResult {
    executor.converge(&request).await
}

/// Bring `name` to the given state through the executor. A removing
/// container is held in that state indefinitely.
async fn prepare(
    runtime: &MockRuntime,
    executor: &ActionExecutor,
    name: &str,
    state: LifecycleState,
) {
    let spec = busybox();
    match state {
        LifecycleState::Absent => {}
        LifecycleState::Created => {
            converge(executor, with_spec(name, Action::Create, spec)).await;
        }
        LifecycleState::Running => {
            converge(executor, with_spec(name, Action::Run, spec)).await;
        }
        LifecycleState::Paused => {
            converge(executor, with_spec(name, Action::Run, spec)).await;
            converge(executor, ActionRequest::new(name, Action::Pause)).await;
        }
        LifecycleState::Exited => {
            converge(executor, with_spec(name, Action::Run, spec)).await;
            converge(executor, ActionRequest::new(name, Action::Stop)).await;
        }
        LifecycleState::Removing => {
            converge(executor, with_spec(name, Action::Run, spec)).await;
            runtime.hold_removing(name, None).await;
        }
    }
    assert_eq!(
        executor.prober().probe(name).await.unwrap().state,
        state,
        "failed to prepare {name}"
    );
}

#[tokio::test]
async fn test_echo_run_twice() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());

    let first = converge(&executor, with_spec("echo", Action::Run, busybox())).await;
    assert!(first.is_ok());
    assert!(first.changed);
    assert_eq!(first.final_state, LifecycleState::Running);

    runtime.clear_ops().await;
    let second = converge(&executor, with_spec("echo", Action::Run, busybox())).await;
    assert!(second.is_ok());
    assert!(!second.changed);
    assert_eq!(second.final_state, LifecycleState::Running);
    assert!(runtime.mutations().await.is_empty());
}

#[tokio::test]
async fn test_create_then_run_starts_without_recreate() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());

    let created = converge(&executor, with_spec("web", Action::Create, busybox())).await;
    assert!(created.changed);
    assert_eq!(created.final_state, LifecycleState::Created);
    let id = executor.prober().probe("web").await.unwrap().id().map(String::from);

    runtime.clear_ops().await;
    let running = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert!(running.changed);
    assert_eq!(running.final_state, LifecycleState::Running);
    assert_eq!(runtime.mutations().await, vec![OpKind::Start]);

    let after = executor.prober().probe("web").await.unwrap();
    assert_eq!(after.id().map(String::from), id);
}

#[tokio::test]
async fn test_full_lifecycle_ends_absent() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());

    let steps = [
        (with_spec("app", Action::Create, busybox()), LifecycleState::Created),
        (with_spec("app", Action::Run, busybox()), LifecycleState::Running),
        (ActionRequest::new("app", Action::Stop), LifecycleState::Exited),
        (ActionRequest::new("app", Action::Delete), LifecycleState::Absent),
    ];
    for (request, expected) in steps {
        let result = converge(&executor, request).await;
        assert!(result.is_ok(), "{:?}", result.error);
        assert!(result.changed);
        assert_eq!(result.final_state, expected);
    }
    assert!(runtime.status_of("app").await.is_none());
}

#[rstest]
#[case(Action::Create, LifecycleState::Created)]
#[case(Action::Create, LifecycleState::Running)]
#[case(Action::Create, LifecycleState::Exited)]
#[case(Action::Run, LifecycleState::Running)]
#[case(Action::Stop, LifecycleState::Absent)]
#[case(Action::Stop, LifecycleState::Created)]
#[case(Action::Stop, LifecycleState::Exited)]
#[case(Action::Kill, LifecycleState::Absent)]
#[case(Action::Kill, LifecycleState::Exited)]
#[case(Action::Pause, LifecycleState::Paused)]
#[case(Action::Unpause, LifecycleState::Running)]
#[case(Action::Delete, LifecycleState::Absent)]
#[case(Action::Delete, LifecycleState::Removing)]
#[tokio::test]
async fn test_satisfied_state_is_noop(#[case] action: Action, #[case] state: LifecycleState) {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", state).await;
    runtime.clear_ops().await;

    let mut request = ActionRequest::new("svc", action);
    if action.requires_spec() {
        request = request.with_spec(busybox());
    }
    let result = converge(&executor, request).await;

    assert!(result.is_ok(), "{:?}", result.error);
    assert!(!result.changed);
    assert_eq!(result.final_state, state);
    assert!(runtime.mutations().await.is_empty());
}

#[rstest]
#[case(Action::Run, LifecycleState::Paused, ErrorKind::InvalidTransition)]
#[case(Action::Stop, LifecycleState::Paused, ErrorKind::InvalidTransition)]
#[case(Action::Restart, LifecycleState::Paused, ErrorKind::InvalidTransition)]
#[case(Action::Pause, LifecycleState::Created, ErrorKind::InvalidTransition)]
#[case(Action::Pause, LifecycleState::Exited, ErrorKind::InvalidTransition)]
#[case(Action::Unpause, LifecycleState::Exited, ErrorKind::InvalidTransition)]
#[case(Action::Pause, LifecycleState::Absent, ErrorKind::NotFound)]
#[case(Action::Unpause, LifecycleState::Absent, ErrorKind::NotFound)]
#[case(Action::Restart, LifecycleState::Absent, ErrorKind::NotFound)]
#[case(Action::Run, LifecycleState::Removing, ErrorKind::InvalidTransition)]
#[case(Action::Create, LifecycleState::Removing, ErrorKind::InvalidTransition)]
#[case(Action::Stop, LifecycleState::Removing, ErrorKind::InvalidTransition)]
#[case(Action::Redeploy, LifecycleState::Removing, ErrorKind::InvalidTransition)]
#[tokio::test]
async fn test_rejected_transitions(
    #[case] action: Action,
    #[case] state: LifecycleState,
    #[case] kind: ErrorKind,
) {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", state).await;
    runtime.clear_ops().await;

    let mut request = ActionRequest::new("svc", action);
    if action.requires_spec() {
        request = request.with_spec(busybox());
    }
    let result = converge(&executor, request).await;

    assert_eq!(result.error.map(|e| e.kind()), Some(kind));
    assert!(!result.changed);
    assert_eq!(result.final_state, state);
    assert!(runtime.mutations().await.is_empty());
}

#[tokio::test]
async fn test_pause_and_unpause() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Running).await;

    let paused = converge(&executor, ActionRequest::new("svc", Action::Pause)).await;
    assert!(paused.changed);
    assert_eq!(paused.final_state, LifecycleState::Paused);

    let again = converge(&executor, ActionRequest::new("svc", Action::Pause)).await;
    assert!(!again.changed);

    let resumed = converge(&executor, ActionRequest::new("svc", Action::Unpause)).await;
    assert!(resumed.changed);
    assert_eq!(resumed.final_state, LifecycleState::Running);
}

#[tokio::test]
async fn test_kill_paused_container() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Paused).await;

    let result = converge(&executor, ActionRequest::new("svc", Action::Kill)).await;
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Exited);
}

#[tokio::test]
async fn test_restart_running_restarts_in_place() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Running).await;
    let id = executor.prober().probe("svc").await.unwrap().id().map(String::from);
    runtime.clear_ops().await;

    let result = converge(&executor, ActionRequest::new("svc", Action::Restart)).await;
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert_eq!(runtime.mutations().await, vec![OpKind::Restart]);

    let after = executor.prober().probe("svc").await.unwrap();
    assert_eq!(after.id().map(String::from), id);
}

#[tokio::test]
async fn test_restart_keeps_autoremove_container() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    let mut spec = busybox();
    spec.autoremove = true;
    converge(&executor, with_spec("tmp", Action::Run, spec)).await;
    runtime.clear_ops().await;

    let result = converge(&executor, ActionRequest::new("tmp", Action::Restart)).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert_eq!(runtime.mutations().await, vec![OpKind::Restart]);
    assert_eq!(runtime.status_of("tmp").await.as_deref(), Some("running"));
}

#[tokio::test]
async fn test_restart_exited_container_starts_it() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Exited).await;
    runtime.clear_ops().await;

    let result = converge(&executor, ActionRequest::new("svc", Action::Restart)).await;
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert_eq!(runtime.mutations().await, vec![OpKind::Start]);
}

#[tokio::test]
async fn test_removing_container_is_waited_out() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "web", LifecycleState::Running).await;
    runtime.hold_removing("web", Some(2)).await;
    runtime.clear_ops().await;

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert_eq!(runtime.mutations().await, vec![OpKind::Create, OpKind::Start]);
}

#[rstest]
#[case(Action::Kill)]
#[case(Action::Stop)]
#[tokio::test]
async fn test_autoremove_container_ends_absent(#[case] action: Action) {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    let mut spec = busybox();
    spec.autoremove = true;
    converge(&executor, with_spec("temp", Action::Run, spec)).await;

    let result = converge(&executor, ActionRequest::new("temp", action)).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Absent);
}

#[tokio::test]
async fn test_drift_is_a_conflict_not_a_replace() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "web", LifecycleState::Running).await;
    runtime.clear_ops().await;

    let mut changed_spec = busybox();
    changed_spec.ports = vec!["8080:80".parse().unwrap()];
    let result = converge(&executor, with_spec("web", Action::Run, changed_spec)).await;

    match result.error {
        Some(dockhand_reconcile::ReconcileError::SpecConflict { fields, .. }) => {
            assert_eq!(fields, vec![SpecField::Ports]);
        }
        other => panic!("expected spec conflict, got {other:?}"),
    }
    assert!(!result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert!(runtime.mutations().await.is_empty());
}

#[tokio::test]
async fn test_reordered_ports_are_not_drift() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());

    let mut spec = busybox();
    spec.ports = vec!["8080:80".parse().unwrap(), "53/udp".parse().unwrap()];
    converge(&executor, with_spec("dns", Action::Run, spec.clone())).await;

    spec.ports.reverse();
    let result = converge(&executor, with_spec("dns", Action::Run, spec)).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(!result.changed);
}

#[tokio::test]
async fn test_start_failure_reports_created() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    for _ in 0..2 {
        runtime
            .fail_next(OpKind::Start, RuntimeError::rejected(500, "cannot start"))
            .await;
    }

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert_eq!(result.error.map(|e| e.kind()), Some(ErrorKind::RuntimeRejected));
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Created);
    assert_eq!(runtime.status_of("web").await.as_deref(), Some("created"));
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "slow", LifecycleState::Running).await;
    runtime.set_stop_delay(Duration::from_secs(5)).await;
    runtime.clear_ops().await;

    let request = ActionRequest::new("slow", Action::Stop).with_options(ActionOptions {
        stop_timeout: Some(Duration::ZERO),
        ..Default::default()
    });
    let result = converge(&executor, request).await;

    assert!(result.is_ok(), "{:?}", result.error);
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Exited);
    assert_eq!(runtime.mutations().await, vec![OpKind::Stop, OpKind::Kill]);
    assert_eq!(runtime.signals().await, vec!["SIGKILL".to_string()]);
}

#[tokio::test]
async fn test_stop_sends_no_signal_when_graceful() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Running).await;

    let result = converge(&executor, ActionRequest::new("svc", Action::Stop)).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(runtime.signals().await.is_empty());
}

#[tokio::test]
async fn test_declared_signal_reaches_runtime() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Running).await;

    let request = ActionRequest::new("svc", Action::Kill).with_options(ActionOptions {
        signal: Some("SIGINT".to_string()),
        ..Default::default()
    });
    let result = converge(&executor, request).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(runtime.signals().await, vec!["SIGINT".to_string()]);
}

#[tokio::test]
async fn test_removed_underneath_is_recreated() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "web", LifecycleState::Created).await;
    runtime
        .interfere_before(OpKind::Start, Interference::Remove("web".to_string()))
        .await;
    runtime.clear_ops().await;

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert_eq!(
        runtime.mutations().await,
        vec![OpKind::Start, OpKind::Create, OpKind::Start]
    );
}

#[tokio::test]
async fn test_concurrent_create_with_same_spec_is_adopted() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    runtime
        .interfere_before(
            OpKind::Create,
            Interference::Create {
                name: "web".to_string(),
                spec: busybox(),
            },
        )
        .await;

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.final_state, LifecycleState::Running);
    assert_eq!(runtime.mutations().await, vec![OpKind::Create, OpKind::Start]);
}

#[tokio::test]
async fn test_concurrent_create_with_other_spec_conflicts() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    runtime
        .interfere_before(
            OpKind::Create,
            Interference::Create {
                name: "web".to_string(),
                spec: ContainerSpec::new("nginx:1.25".parse().unwrap()),
            },
        )
        .await;

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert_eq!(result.error.map(|e| e.kind()), Some(ErrorKind::SpecConflict));
    assert!(!result.changed);
    assert_eq!(result.final_state, LifecycleState::Created);
}

#[tokio::test]
async fn test_retry_is_bounded_to_one() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "web", LifecycleState::Created).await;

    // One refusal is absorbed by the retry.
    runtime
        .fail_next(OpKind::Start, RuntimeError::rejected(409, "busy"))
        .await;
    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.final_state, LifecycleState::Running);

    // Two refusals are surfaced: a third attempt would have succeeded.
    converge(&executor, ActionRequest::new("web", Action::Stop)).await;
    for _ in 0..2 {
        runtime
            .fail_next(OpKind::Start, RuntimeError::rejected(409, "busy"))
            .await;
    }
    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert_eq!(result.error.map(|e| e.kind()), Some(ErrorKind::RuntimeRejected));
    assert!(!result.changed);
    assert_eq!(result.final_state, LifecycleState::Exited);
}

#[tokio::test]
async fn test_lost_runtime_reports_last_known_state() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    runtime
        .interfere_before(OpKind::Start, Interference::Disconnect)
        .await;

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    assert_eq!(result.error.map(|e| e.kind()), Some(ErrorKind::RuntimeUnavailable));
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Created);
}

#[tokio::test]
async fn test_lost_runtime_before_any_step_reports_probed_state() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "svc", LifecycleState::Running).await;
    runtime
        .interfere_before(OpKind::Pause, Interference::Disconnect)
        .await;

    let result = converge(&executor, ActionRequest::new("svc", Action::Pause)).await;
    assert_eq!(result.error.map(|e| e.kind()), Some(ErrorKind::RuntimeUnavailable));
    assert!(!result.changed);
    assert_eq!(result.final_state, LifecycleState::Running);
}

#[tokio::test]
async fn test_unavailable_runtime_surfaces() {
    let runtime = test_runtime().await;
    runtime.set_unavailable(true).await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());

    let result = converge(&executor, with_spec("web", Action::Run, busybox())).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);
    assert!(err.is_retryable());
    assert!(!result.changed);
}

#[tokio::test]
async fn test_delete_removes_volumes_when_asked() {
    let runtime = test_runtime().await;
    let executor = ActionExecutor::new(runtime.clone(), test_config());
    prepare(&runtime, &executor, "db", LifecycleState::Running).await;

    let request = ActionRequest::new("db", Action::Delete).with_options(ActionOptions {
        remove_volumes: true,
        ..Default::default()
    });
    let result = converge(&executor, request).await;
    assert!(result.changed);
    assert_eq!(result.final_state, LifecycleState::Absent);
}
