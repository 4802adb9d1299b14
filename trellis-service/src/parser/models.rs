// Pipeline Models
// Definition document types and execution result types

use crate::error::ReportError;
use crate::runners::shell::Shell;

use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Definition document
// =============================================================================

/// A complete pipeline definition: the matrix, run settings and step list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// dimension name -> variant label -> variable bindings, in declaration order
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub matrix: IndexMap<String, IndexMap<String, Bindings>>,

    /// Cells to drop from the cross-product; each rule maps dimension -> label
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<IndexMap<String, String>>,

    #[serde(default, skip_serializing_if = "Settings::is_default")]
    pub settings: Settings,

    pub steps: Vec<Step>,
}

impl PipelineDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }
}

/// Variable bindings of one variant.
///
/// Scalars keep the text they were written with (`1.10` stays `1.10`);
/// `~` or an empty value means an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Bindings(pub IndexMap<String, String>);

impl Bindings {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for Bindings {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<IndexMap<String, Option<ScalarText>>> = Option::deserialize(deserializer)?;
        let bindings = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, value.map(|v| v.0).unwrap_or_default()))
            .collect();
        Ok(Bindings(bindings))
    }
}

/// A scalar read as its source text rather than as a typed value
struct ScalarText(String);

impl<'de> Deserialize<'de> for ScalarText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(ScalarTextVisitor)
    }
}

struct ScalarTextVisitor;

impl<'de> de::Visitor<'de> for ScalarTextVisitor {
    type Value = ScalarText;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a string, number or boolean")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ScalarText, E> {
        Ok(ScalarText(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<ScalarText, E> {
        Ok(ScalarText(v))
    }

    // Self-describing formats other than YAML hand over typed scalars
    fn visit_bool<E: de::Error>(self, v: bool) -> Result<ScalarText, E> {
        Ok(ScalarText(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ScalarText, E> {
        Ok(ScalarText(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ScalarText, E> {
        Ok(ScalarText(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<ScalarText, E> {
        Ok(ScalarText(v.to_string()))
    }
}

/// Run settings declared in the definition; command-line flags take precedence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_seconds: Option<u64>,
}

impl Settings {
    pub fn is_default(&self) -> bool {
        *self == Settings::default()
    }
}

/// One named unit of work, re-evaluated for every job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub name: String,

    /// Single script body; exclusive with `commands`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "RunPolicy::is_on_success")]
    pub policy: RunPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostOs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Shell::is_default")]
    pub shell: Shell,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fail_on_stderr: bool,
}

impl Step {
    /// A step with a single script body and default settings
    pub fn script(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Some(run.into()),
            commands: Vec::new(),
            condition: None,
            policy: RunPolicy::OnSuccess,
            host: None,
            timeout_seconds: None,
            working_directory: None,
            shell: Shell::Default,
            env: IndexMap::new(),
            fail_on_stderr: false,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// The commands to execute, in order
    pub fn command_list(&self) -> Vec<CommandSpec> {
        match &self.run {
            Some(script) => vec![CommandSpec::Plain(script.clone())],
            None => self.commands.clone(),
        }
    }
}

/// A command inside a step: a bare string, or a string with options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Plain(String),
    Detailed {
        run: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        best_effort: bool,
    },
}

impl CommandSpec {
    pub fn script(&self) -> &str {
        match self {
            CommandSpec::Plain(script) => script,
            CommandSpec::Detailed { run, .. } => run,
        }
    }

    /// A best-effort command does not fail its step on a non-zero exit
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            CommandSpec::Detailed {
                best_effort: true,
                ..
            }
        )
    }
}

/// Whether a step runs after an earlier failure in the same job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPolicy {
    #[default]
    OnSuccess,
    Always,
}

impl RunPolicy {
    pub fn is_on_success(&self) -> bool {
        *self == RunPolicy::OnSuccess
    }
}

/// Host operating system predicate for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    #[serde(alias = "darwin", alias = "osx")]
    Macos,
    Windows,
    Unix,
}

impl HostOs {
    /// Whether this predicate holds for an operating system name as reported by
    /// `std::env::consts::OS`
    pub fn matches(&self, os: &str) -> bool {
        match self {
            HostOs::Linux => os == "linux",
            HostOs::Macos => os == "macos",
            HostOs::Windows => os == "windows",
            HostOs::Unix => os != "windows",
        }
    }

    pub fn matches_current(&self) -> bool {
        self.matches(std::env::consts::OS)
    }
}

// =============================================================================
// Execution results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
    Skipped,
}

impl StepStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::TimedOut | StepStatus::Canceled
        )
    }
}

/// Result of running (or skipping) one step for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub policy: RunPolicy,
    pub status: StepStatus,
    /// Exit code of the last command that ran
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr, in arrival order
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub skip_reason: Option<String>,
}

impl StepOutcome {
    pub fn skipped(step: &Step, reason: impl Into<String>) -> Self {
        Self {
            name: step.name.clone(),
            policy: step.policy,
            status: StepStatus::Skipped,
            exit_code: None,
            output: String::new(),
            error: None,
            duration: Duration::ZERO,
            skip_reason: Some(reason.into()),
        }
    }

    /// A step that never started because the run was canceled
    pub fn canceled(step: &Step, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            name: step.name.clone(),
            policy: step.policy,
            status: StepStatus::Canceled,
            exit_code: None,
            output: String::new(),
            error: Some(reason.clone()),
            duration: Duration::ZERO,
            skip_reason: Some(reason),
        }
    }

    pub fn failed(step: &Step, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: step.name.clone(),
            policy: step.policy,
            status: StepStatus::Failed,
            exit_code: None,
            output: String::new(),
            error: Some(error.into()),
            duration,
            skip_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never started: canceled by fail-fast or by run cancellation
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

/// Aggregate of one job's step outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub identity: String,
    pub index: usize,
    pub variables: IndexMap<String, String>,
    pub status: JobStatus,
    pub steps: Vec<StepOutcome>,
    pub duration: Duration,
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub report_errors: Vec<ReportError>,
}

impl JobOutcome {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.status.is_failure())
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        *self == RunStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_accept_scalars() {
        let yaml = "imageName: ubuntu-latest\nmsrv: 1.7\nnightly: true\nempty:\n";
        let bindings: Bindings = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(bindings.0.get("imageName").unwrap(), "ubuntu-latest");
        assert_eq!(bindings.0.get("msrv").unwrap(), "1.7");
        assert_eq!(bindings.0.get("nightly").unwrap(), "true");
        assert_eq!(bindings.0.get("empty").unwrap(), "");
        let keys: Vec<_> = bindings.0.keys().cloned().collect();
        assert_eq!(keys, vec!["imageName", "msrv", "nightly", "empty"]);
    }

    #[test]
    fn test_bindings_keep_number_text() {
        let yaml = "version: 1.10\nrelease: 1.0\nhex: 0x1F\nbuild: 007\nnull_text: 'null'\nnothing: ~\n";
        let bindings: Bindings = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(bindings.0["version"], "1.10");
        assert_eq!(bindings.0["release"], "1.0");
        assert_eq!(bindings.0["hex"], "0x1F");
        assert_eq!(bindings.0["build"], "007");
        assert_eq!(bindings.0["null_text"], "null");
        assert_eq!(bindings.0["nothing"], "");
    }

    #[test]
    fn test_bindings_round_trip_keeps_text() {
        let yaml = "version: 1.10\n";
        let bindings: Bindings = serde_yaml::from_str(yaml).unwrap();
        let back: Bindings = serde_yaml::from_str(&serde_yaml::to_string(&bindings).unwrap()).unwrap();
        assert_eq!(back.0["version"], "1.10");
    }

    #[test]
    fn test_bindings_reject_nested_values() {
        let yaml = "targets: [a, b]\n";
        let result: Result<Bindings, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_command_spec_forms() {
        let yaml = "- cargo build\n- run: cargo clippy\n  best_effort: true\n";
        let commands: Vec<CommandSpec> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(commands[0].script(), "cargo build");
        assert!(!commands[0].is_best_effort());
        assert_eq!(commands[1].script(), "cargo clippy");
        assert!(commands[1].is_best_effort());
    }

    #[test]
    fn test_step_command_list_prefers_run() {
        let step = Step::script("build", "cargo build");
        assert_eq!(step.command_list(), vec![CommandSpec::Plain("cargo build".to_string())]);
    }

    #[test]
    fn test_host_matching() {
        assert!(HostOs::Linux.matches("linux"));
        assert!(!HostOs::Linux.matches("windows"));
        assert!(HostOs::Unix.matches("macos"));
        assert!(!HostOs::Unix.matches("windows"));
        let parsed: HostOs = serde_yaml::from_str("darwin").unwrap();
        assert_eq!(parsed, HostOs::Macos);
    }

    #[test]
    fn test_step_status_failure_classes() {
        assert!(StepStatus::Failed.is_failure());
        assert!(StepStatus::TimedOut.is_failure());
        assert!(StepStatus::Canceled.is_failure());
        assert!(!StepStatus::Skipped.is_failure());
        assert!(!StepStatus::Succeeded.is_failure());
    }
}
