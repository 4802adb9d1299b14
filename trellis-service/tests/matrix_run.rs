// End-to-end runs of a 2x2 matrix through the orchestrator

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use trellis_service::testing::{parse_junit, test_triples, TestCaseStatus};
use trellis_service::{
    ConfigError, DefinitionParser, JobStatus, MatrixFilter, Orchestrator, OrchestratorConfig,
    RunStatus, StepContext, StepOutcome, StepRunner, StepStatus, TestReporter,
};

const PIPELINE: &str = r#"
name: ci
matrix:
  platform:
    linux: { imageName: ubuntu-latest }
    windows: { imageName: windows-latest }
  channel:
    stable: { toolchain: stable }
    beta: { toolchain: beta }
steps:
  - name: install
    run: rustup toolchain install $(toolchain)
  - name: build
    run: cargo build
  - name: test
    run: cargo test
  - name: publish
    run: ./publish-results.sh
    policy: always
"#;

/// Records every `job/step` it is asked to run and fails the listed ones.
/// `test` steps print libtest output.
struct RecordingRunner {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    fn new(failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for RecordingRunner {
    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome {
        let key = format!("{}/{}", ctx.job.identity, ctx.step.name);
        self.calls.lock().unwrap().push(key.clone());

        let failed = self.failing.contains(&key);
        let output = if ctx.step.name == "test" {
            format!(
                "running 2 tests\ntest parser::works ... ok\ntest io::{} ... ok\n\ntest result: ok. 2 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n",
                ctx.job.variables["toolchain"]
            )
        } else {
            String::new()
        };

        StepOutcome {
            name: ctx.step.name.clone(),
            policy: ctx.step.policy,
            status: if failed {
                StepStatus::Failed
            } else {
                StepStatus::Succeeded
            },
            exit_code: Some(if failed { 1 } else { 0 }),
            output,
            error: failed.then(|| "exit code 1".to_string()),
            duration: Duration::from_millis(1),
            skip_reason: None,
        }
    }
}

fn orchestrator(runner: Arc<RecordingRunner>) -> Orchestrator {
    Orchestrator::new(OrchestratorConfig::default().with_max_parallel(2)).with_runner(runner)
}

#[tokio::test]
async fn test_build_failure_in_one_job() {
    let definition = DefinitionParser::parse(PIPELINE).unwrap();
    let runner = RecordingRunner::new(&["windows-beta/build"]);

    let result = orchestrator(runner.clone())
        .run(&definition, &[])
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let summary = &result.report.summary;
    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (3, 1, 0));

    let identities: Vec<_> = result
        .report
        .jobs
        .iter()
        .map(|j| j.identity.as_str())
        .collect();
    assert_eq!(
        identities,
        vec!["linux-stable", "linux-beta", "windows-stable", "windows-beta"]
    );

    for job in &result.report.jobs {
        let test = job.step("test").unwrap();
        let publish = job.step("publish").unwrap();
        assert_eq!(publish.status, StepStatus::Succeeded);

        if job.identity == "windows-beta" {
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(test.status, StepStatus::Skipped);
            assert_eq!(
                test.skip_reason.as_deref(),
                Some("skipped after earlier failure")
            );
        } else {
            assert_eq!(job.status, JobStatus::Succeeded);
            assert_eq!(test.status, StepStatus::Succeeded);
        }
    }

    let calls = runner.calls();
    assert!(!calls.contains(&"windows-beta/test".to_string()));
    assert!(calls.contains(&"windows-beta/publish".to_string()));
    assert_eq!(calls.len(), 15);

    // Tests ran in three jobs, two cases each
    assert_eq!(result.report.test_count(), 6);
    assert!(result.report.suites[3].cases.is_empty());
}

#[tokio::test]
async fn test_undeclared_variable_fails_before_any_step() {
    let yaml = PIPELINE.replace(
        "    policy: always\n",
        "    policy: always\n    condition: eq(variables['imagename'], 'ubuntu-latest')\n",
    );
    let definition = DefinitionParser::parse(&yaml).unwrap();
    let runner = RecordingRunner::new(&[]);

    let err = orchestrator(runner.clone())
        .run(&definition, &[])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ConfigError::UnknownVariable { ref variable, .. } if variable == "imagename"
    ));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_condition_limits_step_to_matching_jobs() {
    let yaml = PIPELINE.replace(
        "    policy: always\n",
        "    policy: always\n    condition: and(eq(platform, 'linux'), eq(channel, 'stable'))\n",
    );
    let definition = DefinitionParser::parse(&yaml).unwrap();
    let runner = RecordingRunner::new(&[]);

    let result = orchestrator(runner.clone())
        .run(&definition, &[])
        .await
        .unwrap();

    assert!(result.status.is_success());
    let publishes: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|c| c.ends_with("/publish"))
        .collect();
    assert_eq!(publishes, vec!["linux-stable/publish"]);
}

#[tokio::test]
async fn test_report_round_trip_preserves_results() {
    let definition = DefinitionParser::parse(PIPELINE).unwrap();
    let result = orchestrator(RecordingRunner::new(&["linux-beta/build"]))
        .run(&definition, &[])
        .await
        .unwrap();
    let expected = result.report.test_triples();
    assert_eq!(expected.len(), 6);
    assert!(expected
        .iter()
        .all(|(_, _, status)| *status == TestCaseStatus::Passed));

    let xml = TestReporter::to_junit_xml(&result.report);
    let suites = parse_junit(&xml).unwrap();
    assert_eq!(suites.len(), 4);
    assert_eq!(test_triples(&suites), expected);

    let json = TestReporter::to_json(&result.report).unwrap();
    let back = TestReporter::from_json(&json).unwrap();
    assert_eq!(back.test_triples(), expected);
    assert_eq!(back.summary, result.report.summary);
}

#[tokio::test]
async fn test_fail_fast_with_single_slot() {
    let definition = DefinitionParser::parse(PIPELINE).unwrap();
    let runner = RecordingRunner::new(&["linux-stable/install"]);

    let result = Orchestrator::new(
        OrchestratorConfig::default()
            .with_max_parallel(1)
            .with_fail_fast(true),
    )
    .with_runner(runner.clone())
    .run(&definition, &[])
    .await
    .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.report.summary.failed, 1);
    assert_eq!(result.report.summary.skipped, 3);
    // install failed, publish still ran
    assert_eq!(
        runner.calls(),
        vec!["linux-stable/install", "linux-stable/publish"]
    );
}

#[tokio::test]
async fn test_filters_narrow_the_run() {
    let definition = DefinitionParser::parse(PIPELINE).unwrap();
    let runner = RecordingRunner::new(&[]);

    let filters: Vec<MatrixFilter> = vec!["platform=windows".parse().unwrap()];
    let result = orchestrator(runner.clone())
        .run(&definition, &filters)
        .await
        .unwrap();

    assert_eq!(result.report.jobs.len(), 2);
    assert_eq!(result.report.jobs[0].identity, "windows-stable");
    assert_eq!(result.report.jobs[0].index, 0);
    assert!(runner.calls().iter().all(|c| c.starts_with("windows-")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_steps_see_job_variables() {
    let yaml = r#"
name: shell
matrix:
  flavor:
    mild: { greeting: hello }
    hot: { greeting: hola }
steps:
  - name: greet
    run: echo "$greeting from $TRELLIS_JOB" > "greeting-$flavor.txt"
  - name: fail-hot
    run: test "$flavor" != hot
  - name: cleanup
    run: echo cleanup
    policy: always
"#;
    let dir = tempfile::tempdir().unwrap();
    let definition = DefinitionParser::parse(yaml).unwrap();

    let result = Orchestrator::new(OrchestratorConfig::default().with_working_dir(dir.path()))
        .run(&definition, &[])
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let mild = result.report.job("mild").unwrap();
    let hot = result.report.job("hot").unwrap();
    assert_eq!(mild.status, JobStatus::Succeeded);
    assert_eq!(hot.status, JobStatus::Failed);
    assert_eq!(hot.step("cleanup").unwrap().status, StepStatus::Succeeded);

    let greeting = std::fs::read_to_string(dir.path().join("greeting-hot.txt")).unwrap();
    assert_eq!(greeting.trim(), "hola from hot");
}
