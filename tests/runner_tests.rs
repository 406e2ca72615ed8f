//! # Runner Tests
//!
//! Sequential execution, tolerance policy and halting, driven through
//! `MockExecutor` so no real processes are spawned.
//!
//! 1. Scenario tests - build/test/lint/upload pipelines
//! 2. Edge cases - empty runs, launch errors, idempotence
//! 3. Properties - proptest over random step lists

use std::sync::Arc;

use proptest::prelude::*;
use stepwise::command::MockOutcome;
use stepwise::{
    DefaultUploader, EventKind, FailureKind, MockExecutor, Pipeline, Run, RunStatus, Runner,
    Step, StepExecutor, StepResult,
};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn runner_with(mock: &MockExecutor) -> Runner {
    Runner::new(StepExecutor::new(
        Arc::new(mock.clone()),
        Arc::new(DefaultUploader::new()),
    ))
}

/// Step whose program is its own name, so mocks can target it
fn step(name: &str, tolerant: bool) -> Step {
    Step::exec(name, name, Vec::<String>::new()).continue_on_error(tolerant)
}

async fn execute(mock: &MockExecutor, steps: Vec<Step>) -> (RunStatus, Run) {
    let mut run = Run::new(steps);
    let status = runner_with(mock).execute(&mut run).await;
    (status, run)
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_a_tolerated_test_failure() {
    let mock = MockExecutor::new().failing("test", 101);
    let (status, run) = execute(
        &mock,
        vec![step("build", false), step("test", true), step("lint", true)],
    )
    .await;

    assert_eq!(
        run.results(),
        vec![StepResult::Success, StepResult::Failed, StepResult::Success]
    );
    assert_eq!(status, RunStatus::Success);
}

#[tokio::test]
async fn scenario_b_build_failure_halts() {
    let mock = MockExecutor::new().failing("build", 1);
    let (status, run) = execute(&mock, vec![step("build", false), step("test", false)]).await;

    assert_eq!(run.results(), vec![StepResult::Failed, StepResult::NotRun]);
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn scenario_c_lint_failure_is_tolerated() {
    let mock = MockExecutor::new().failing("lint", 1);
    let (status, run) = execute(
        &mock,
        vec![
            step("install", false),
            step("build", false),
            step("lint", true),
            step("upload", true),
        ],
    )
    .await;

    assert_eq!(
        run.results(),
        vec![
            StepResult::Success,
            StepResult::Success,
            StepResult::Failed,
            StepResult::Success
        ]
    );
    assert_eq!(status, RunStatus::Success);
}

#[tokio::test]
async fn steps_run_in_declaration_order() {
    let mock = MockExecutor::new();
    execute(
        &mock,
        vec![step("install", false), step("build", false), step("test", true)],
    )
    .await;

    let programs: Vec<_> = mock.calls().into_iter().map(|c| c.program).collect();
    assert_eq!(programs, ["install", "build", "test"]);
}

// ============================================================================
// EDGE CASES
// ============================================================================

#[tokio::test]
async fn empty_run_succeeds() {
    let mock = MockExecutor::new();
    let (status, run) = execute(&mock, vec![]).await;
    assert_eq!(status, RunStatus::Success);
    assert!(run.is_empty());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn all_tolerant_all_failing_succeeds() {
    let mock = MockExecutor::new().with_default(MockOutcome::Exit(1));
    let (status, run) = execute(
        &mock,
        vec![step("test", true), step("lint", true), step("spell", true)],
    )
    .await;

    assert_eq!(status, RunStatus::Success);
    assert!(run.results().iter().all(|r| *r == StepResult::Failed));
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn launch_error_fails_like_non_zero_exit() {
    let mock = MockExecutor::new().on("rustup", MockOutcome::NotFound);
    let (status, run) = execute(&mock, vec![step("rustup", false), step("build", false)]).await;

    assert_eq!(status, RunStatus::Failed);
    assert_eq!(run.results(), vec![StepResult::Failed, StepResult::NotRun]);
    assert_eq!(
        run.steps()[0].failure().map(|f| f.kind()),
        Some(FailureKind::Launch)
    );
}

#[tokio::test]
async fn launch_and_tool_failures_are_distinguishable() {
    let mock = MockExecutor::new()
        .on("typos", MockOutcome::NotFound)
        .failing("clippy", 1);
    let runner = runner_with(&mock);
    let mut run = Run::new(vec![step("typos", true), step("clippy", true)]);
    runner.execute(&mut run).await;

    let kinds: Vec<_> = runner
        .event_log()
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::StepFailed { failure_kind, .. } => Some(failure_kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, [FailureKind::Launch, FailureKind::Tool]);
}

#[tokio::test]
async fn identical_runs_give_identical_results() {
    let pipeline = Pipeline::from_yaml(
        r#"
schema: stepwise/pipeline@1
steps:
  - name: Build
    run: cargo build
  - name: Test
    run: cargo test
    continue_on_error: true
  - name: Spelling
    run: typos
    continue_on_error: true
"#,
    )
    .unwrap();
    let mock = MockExecutor::new().failing("cargo test", 101);
    let runner = runner_with(&mock);

    let mut first = pipeline.to_run();
    let mut second = pipeline.to_run();
    let a = runner.execute(&mut first).await;
    let b = runner.execute(&mut second).await;

    assert_eq!(a, b);
    assert_eq!(first.results(), second.results());
}

#[tokio::test]
async fn upload_failure_respects_continue_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockExecutor::new();
    let runner = Runner::new(
        StepExecutor::new(Arc::new(mock.clone()), Arc::new(DefaultUploader::new()))
            .with_base_dir(dir.path()),
    );

    // results file was never produced
    let mut run = Run::new(vec![
        step("clippy", true),
        Step::upload("Upload", "clippy.sarif", "uploads").continue_on_error(true),
        step("after", false),
    ]);
    let status = runner.execute(&mut run).await;

    assert_eq!(status, RunStatus::Success);
    assert_eq!(
        run.results(),
        vec![StepResult::Success, StepResult::Failed, StepResult::Success]
    );
}

#[tokio::test]
async fn upload_success_copies_the_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("clippy.sarif"), "{}").unwrap();
    let runner = Runner::new(
        StepExecutor::new(
            Arc::new(MockExecutor::new()),
            Arc::new(DefaultUploader::new()),
        )
        .with_base_dir(dir.path()),
    );

    let target = dir.path().join("uploads");
    let mut run = Run::new(vec![Step::upload(
        "Upload",
        "clippy.sarif",
        target.display().to_string(),
    )]);
    assert_eq!(runner.execute(&mut run).await, RunStatus::Success);
    assert!(target.join("clippy.sarif").exists());
}

#[tokio::test]
async fn upload_to_own_directory_preserves_results() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("clippy.sarif");
    std::fs::write(&results, r#"{"runs":[1,2,3]}"#).unwrap();
    let runner = Runner::new(
        StepExecutor::new(
            Arc::new(MockExecutor::new()),
            Arc::new(DefaultUploader::new()),
        )
        .with_base_dir(dir.path()),
    );

    let mut run = Run::new(vec![Step::upload(
        "Upload",
        "clippy.sarif",
        dir.path().display().to_string(),
    )]);
    assert_eq!(runner.execute(&mut run).await, RunStatus::Success);
    assert_eq!(
        std::fs::read_to_string(&results).unwrap(),
        r#"{"runs":[1,2,3]}"#
    );
}

#[tokio::test]
async fn event_log_tracks_the_whole_run() {
    let mock = MockExecutor::new().failing("build", 1);
    let runner = runner_with(&mock);
    let mut run = Run::new(vec![step("build", false), step("test", false)]);
    runner.execute(&mut run).await;

    let kinds: Vec<_> = runner
        .event_log()
        .events()
        .into_iter()
        .map(|e| match e.kind {
            EventKind::RunStarted { .. } => "run_started",
            EventKind::StepStarted { .. } => "step_started",
            EventKind::StepSucceeded { .. } => "step_succeeded",
            EventKind::StepFailed { .. } => "step_failed",
            EventKind::StepSkipped { .. } => "step_skipped",
            EventKind::RunHalted { .. } => "run_halted",
            EventKind::RunCompleted { .. } => "run_completed",
        })
        .collect();

    assert_eq!(
        kinds,
        [
            "run_started",
            "step_started",
            "step_failed",
            "step_skipped",
            "run_halted",
            "run_completed"
        ]
    );
}

// ============================================================================
// PROPERTIES
// ============================================================================

/// (tolerant, succeeds) per step
fn arb_steps() -> impl Strategy<Value = Vec<(bool, bool)>> {
    prop::collection::vec((any::<bool>(), any::<bool>()), 0..12)
}

fn build(plan: &[(bool, bool)]) -> (MockExecutor, Vec<Step>) {
    let mut mock = MockExecutor::new();
    let mut steps = Vec::with_capacity(plan.len());
    for (i, (tolerant, succeeds)) in plan.iter().enumerate() {
        let name = format!("step{i}");
        if !succeeds {
            mock = mock.failing(name.clone(), 1);
        }
        steps.push(step(&name, *tolerant));
    }
    (mock, steps)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    /// Property: halting and status follow the first fatal failure
    #[test]
    fn status_follows_first_fatal_failure(plan in arb_steps()) {
        let (mock, steps) = build(&plan);
        let (status, run) = block_on(execute(&mock, steps));

        let first_fatal = plan.iter().position(|(tolerant, ok)| !tolerant && !ok);
        match first_fatal {
            Some(i) => {
                prop_assert_eq!(status, RunStatus::Failed);
                prop_assert_eq!(run.results()[i], StepResult::Failed);
                prop_assert!(run.results()[i + 1..].iter().all(|r| *r == StepResult::NotRun));
                prop_assert_eq!(mock.call_count(), i + 1);
            }
            None => {
                prop_assert_eq!(status, RunStatus::Success);
                prop_assert!(run.results().iter().all(|r| *r != StepResult::NotRun));
                prop_assert_eq!(mock.call_count(), plan.len());
            }
        }
    }

    /// Property: every executed step's result matches its scripted outcome
    #[test]
    fn executed_results_match_outcomes(plan in arb_steps()) {
        let (mock, steps) = build(&plan);
        let (_, run) = block_on(execute(&mock, steps));

        for ((_, ok), result) in plan.iter().zip(run.results()) {
            if result != StepResult::NotRun {
                let expected = if *ok { StepResult::Success } else { StepResult::Failed };
                prop_assert_eq!(result, expected);
            }
        }
    }

    /// Property: re-running the same plan gives the same verdict and results
    #[test]
    fn reruns_are_deterministic(plan in arb_steps()) {
        let (mock_a, steps_a) = build(&plan);
        let (mock_b, steps_b) = build(&plan);
        let (status_a, run_a) = block_on(execute(&mock_a, steps_a));
        let (status_b, run_b) = block_on(execute(&mock_b, steps_b));

        prop_assert_eq!(status_a, status_b);
        prop_assert_eq!(run_a.results(), run_b.results());
    }
}
