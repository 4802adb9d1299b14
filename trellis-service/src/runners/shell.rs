// Shell Runner
// Executes step commands in shell processes with timeouts and cancellation

use crate::execution::events::{EventSender, ExecutionEvent};
use crate::expression::substitute_macros;
use crate::parser::models::{StepOutcome, StepStatus};
use crate::runners::{StepContext, StepRunner};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to keep reading output after a process is gone
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// Default shell (sh on Unix, cmd on Windows)
    #[default]
    Default,
    Sh,
    /// Bash shell
    Bash,
    /// PowerShell Core (cross-platform)
    Pwsh,
    /// Windows PowerShell (Windows only, falls back to pwsh)
    PowerShell,
    Cmd,
}

impl Shell {
    pub fn is_default(&self) -> bool {
        *self == Shell::Default
    }

    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            Shell::Sh => ("sh", &["-c"]),
            Shell::Bash => ("bash", &["-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::PowerShell => {
                if cfg!(target_os = "windows") {
                    ("powershell.exe", &["-NoLogo", "-NoProfile", "-Command"])
                } else {
                    // Fall back to pwsh on non-Windows
                    ("pwsh", &["-NoLogo", "-NoProfile", "-Command"])
                }
            }
            Shell::Cmd => ("cmd", &["/C"]),
        }
    }
}

/// How a single command ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandEnd {
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
    TimedOut,
    Canceled,
    SpawnFailed(String),
}

/// Accumulates a step's output and streams each line as an event
struct OutputSink<'a, 'c> {
    ctx: &'a StepContext<'c>,
    combined: String,
    stderr: String,
}

impl<'a, 'c> OutputSink<'a, 'c> {
    fn new(ctx: &'a StepContext<'c>) -> Self {
        Self {
            ctx,
            combined: String::new(),
            stderr: String::new(),
        }
    }

    fn push(&mut self, line: String, is_error: bool) {
        self.combined.push_str(&line);
        self.combined.push('\n');
        if is_error {
            self.stderr.push_str(&line);
            self.stderr.push('\n');
        }
        self.ctx.events.send_event(ExecutionEvent::step_output(
            &self.ctx.job.identity,
            self.ctx.step_index,
            line,
            is_error,
        ));
    }

    fn last_stderr_line(&self) -> Option<&str> {
        self.stderr.lines().rev().find(|l| !l.trim().is_empty())
    }
}

/// Far enough out to never fire during a run
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Deadline for a whole step; absurdly large timeouts mean "no deadline"
fn step_deadline(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE))
        .or_else(|| now.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(now)
}

/// Shell runner for executing step commands
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_command(
        &self,
        shell: Shell,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
        sink: &mut OutputSink<'_, '_>,
    ) -> CommandEnd {
        let (shell_cmd, shell_args) = shell.get_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(working_dir);
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group so a timeout can take down every descendant
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandEnd::SpawnFailed(format!(
                    "failed to spawn shell process '{}' in {}: {}",
                    shell_cmd,
                    working_dir.display(),
                    e
                ));
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, false, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, true, tx.clone());
        }
        drop(tx);

        let end = tokio::select! {
            status = wait_and_collect(&mut child, &mut rx, sink) => {
                CommandEnd::Exited(status.ok().and_then(|s| s.code()))
            }
            _ = tokio::time::sleep_until(deadline) => CommandEnd::TimedOut,
            _ = cancel.cancelled() => CommandEnd::Canceled,
        };

        if matches!(end, CommandEnd::TimedOut | CommandEnd::Canceled) {
            kill_process_tree(&mut child).await;
            let _ = child.wait().await;
            drain(&mut rx, sink).await;
        }

        end
    }
}

#[async_trait::async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome {
        let started = Instant::now();
        let deadline = step_deadline(ctx.timeout);
        let step = ctx.step;
        let env = ctx.environment();
        let working_dir = ctx.resolve_working_dir();
        let shell = step.shell;

        let mut sink = OutputSink::new(ctx);
        let mut status = StepStatus::Succeeded;
        let mut exit_code = None;
        let mut error = None;

        for (i, command) in step.command_list().iter().enumerate() {
            let script = substitute_macros(command.script(), &ctx.job.variables);
            debug!(job = %ctx.job.identity, step = %step.name, command = i, "running command");

            let end = self
                .run_command(
                    shell,
                    &script,
                    &env,
                    &working_dir,
                    deadline,
                    ctx.cancel,
                    &mut sink,
                )
                .await;

            match end {
                CommandEnd::Exited(Some(0)) => exit_code = Some(0),
                CommandEnd::Exited(code) => {
                    exit_code = code;
                    let message = match code {
                        Some(code) => format!("command {} exited with code {}", i + 1, code),
                        None => format!("command {} was terminated by a signal", i + 1),
                    };
                    if command.is_best_effort() {
                        warn!(job = %ctx.job.identity, step = %step.name, "{} (best effort, continuing)", message);
                        continue;
                    }
                    status = StepStatus::Failed;
                    error = Some(message);
                    break;
                }
                CommandEnd::TimedOut => {
                    status = StepStatus::TimedOut;
                    error = Some(format!(
                        "step timed out after {}s",
                        ctx.timeout.as_secs_f64()
                    ));
                    break;
                }
                CommandEnd::Canceled => {
                    status = StepStatus::Canceled;
                    error = Some("step canceled".to_string());
                    break;
                }
                CommandEnd::SpawnFailed(message) => {
                    status = StepStatus::Failed;
                    error = Some(message);
                    break;
                }
            }
        }

        if status == StepStatus::Succeeded && step.fail_on_stderr && !sink.stderr.is_empty() {
            status = StepStatus::Failed;
            error = Some("step wrote to stderr".to_string());
        }

        if status == StepStatus::Failed {
            if let (Some(message), Some(line)) = (error.as_mut(), sink.last_stderr_line()) {
                message.push_str(": ");
                message.push_str(line);
            }
        }

        StepOutcome {
            name: step.name.clone(),
            policy: step.policy,
            status,
            exit_code,
            output: sink.combined,
            error,
            duration: started.elapsed(),
            skip_reason: None,
        }
    }
}

/// Forward every line of a pipe to the collector channel. Reads until EOF
/// so the child never sees a closed pipe; invalid UTF-8 is replaced.
fn forward_lines<R>(reader: R, is_error: bool, tx: mpsc::UnboundedSender<(String, bool)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut receiver_gone = false;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if receiver_gone {
                        continue;
                    }
                    let line = decode_line(&buf);
                    receiver_gone = tx.send((line, is_error)).is_err();
                }
                Err(e) => {
                    debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    });
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Collect output until the process exits, then drain what is left
async fn wait_and_collect(
    child: &mut Child,
    rx: &mut mpsc::UnboundedReceiver<(String, bool)>,
    sink: &mut OutputSink<'_, '_>,
) -> std::io::Result<ExitStatus> {
    let mut lines_open = true;

    loop {
        tokio::select! {
            line = rx.recv(), if lines_open => match line {
                Some((line, is_error)) => sink.push(line, is_error),
                None => lines_open = false,
            },
            status = child.wait() => {
                let status = status?;
                drain(rx, sink).await;
                return Ok(status);
            }
        }
    }
}

/// Read remaining lines; gives up after a grace period if a stray
/// descendant keeps the pipes open
async fn drain(rx: &mut mpsc::UnboundedReceiver<(String, bool)>, sink: &mut OutputSink<'_, '_>) {
    let _ = tokio::time::timeout(DRAIN_GRACE, async {
        while let Some((line, is_error)) = rx.recv().await {
            sink.push(line, is_error);
        }
    })
    .await;
}

#[cfg(unix)]
async fn kill_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        // A negative pid signals the whole process group
        // SAFETY: kill(2) has no memory-safety preconditions
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
}

/// `taskkill /T` takes down the shell and everything it started
#[cfg(windows)]
async fn kill_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        let killed = Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = killed {
            warn!(pid, error = %e, "taskkill failed, killing the shell only");
        }
    }
    let _ = child.start_kill();
}

/// Only the shell itself is killed; descendants may outlive it until the
/// drain grace period ends.
#[cfg(not(any(unix, windows)))]
async fn kill_process_tree(child: &mut Child) {
    let _ = child.start_kill();
}
