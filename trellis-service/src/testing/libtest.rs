// Libtest Output Parser
// Recognizes Rust test-harness output (human and JSON) in captured step output

use crate::testing::TestCaseStatus;

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// A test case found in step output
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCase {
    pub name: String,
    pub status: TestCaseStatus,
    pub duration: Duration,
    pub failure_message: Option<String>,
}

/// Everything recognized in one step's output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub cases: Vec<ParsedCase>,
    /// Payloads that looked like test output but could not be converted
    pub problems: Vec<String>,
}

/// One line of `--format json` output
#[derive(Debug, Deserialize)]
struct LibtestEvent {
    #[serde(rename = "type")]
    kind: String,
    event: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    exec_time: Option<f64>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    passed: Option<usize>,
    #[serde(default)]
    failed: Option<usize>,
    #[serde(default)]
    ignored: Option<usize>,
}

/// Counts announced by a harness at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Totals {
    passed: usize,
    failed: usize,
    ignored: usize,
}

impl Totals {
    fn of(cases: &[ParsedCase]) -> Self {
        let mut totals = Totals::default();
        for case in cases {
            match case.status {
                TestCaseStatus::Passed => totals.passed += 1,
                TestCaseStatus::Failed => totals.failed += 1,
                TestCaseStatus::Ignored => totals.ignored += 1,
            }
        }
        totals
    }

    /// Parse `test result: ok. 3 passed; 0 failed; 1 ignored; ...`
    fn from_result_line(line: &str) -> Option<Self> {
        let (_, counts) = line.split_once(". ")?;
        let mut totals = Totals::default();
        let mut found = 0;

        for part in counts.split(';') {
            let mut words = part.split_whitespace();
            let (Some(count), Some(label)) = (words.next(), words.next()) else {
                continue;
            };
            let Ok(count) = count.parse::<usize>() else {
                continue;
            };
            match label {
                "passed" => totals.passed = count,
                "failed" => totals.failed = count,
                "ignored" => totals.ignored = count,
                _ => continue,
            }
            found += 1;
        }

        (found == 3).then_some(totals)
    }

    fn mismatch(&self, parsed: &Totals) -> Option<String> {
        if self == parsed {
            return None;
        }
        Some(format!(
            "harness reported {} passed, {} failed, {} ignored but {} passed, {} failed, {} ignored were parsed",
            self.passed, self.failed, self.ignored, parsed.passed, parsed.failed, parsed.ignored
        ))
    }
}

/// A `running N tests` block of human-format output
#[derive(Default)]
struct HumanBlock {
    cases: Vec<ParsedCase>,
    /// Failure sections keyed by test name
    failures: HashMap<String, String>,
    /// Name of the `---- name stdout ----` section being captured
    capturing: Option<String>,
}

impl HumanBlock {
    fn finish(mut self, out: &mut ParsedOutput, totals: Option<Totals>) {
        for case in &mut self.cases {
            if case.status == TestCaseStatus::Failed {
                if let Some(text) = self.failures.remove(&case.name) {
                    let text = text.trim_end().to_string();
                    if !text.is_empty() {
                        case.failure_message = Some(text);
                    }
                }
            }
        }

        match totals {
            Some(totals) => {
                if let Some(problem) = totals.mismatch(&Totals::of(&self.cases)) {
                    out.problems.push(problem);
                }
            }
            None => out.problems.push(format!(
                "test output truncated: missing 'test result:' line after {} parsed tests",
                self.cases.len()
            )),
        }

        out.cases.extend(self.cases);
    }
}

/// JSON suite in progress
#[derive(Default)]
struct JsonSuite {
    cases: Vec<ParsedCase>,
}

impl JsonSuite {
    fn finish(self, out: &mut ParsedOutput, totals: Option<Totals>) {
        match totals {
            Some(totals) => {
                if let Some(problem) = totals.mismatch(&Totals::of(&self.cases)) {
                    out.problems.push(problem);
                }
            }
            None => out.problems.push(format!(
                "test output truncated: suite ended without a result event after {} parsed tests",
                self.cases.len()
            )),
        }
        out.cases.extend(self.cases);
    }
}

/// Scan captured output for libtest payloads
pub fn parse_output(output: &str) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    let mut human: Option<HumanBlock> = None;
    let mut json: Option<JsonSuite> = None;

    for raw in output.lines() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();

        if trimmed.starts_with('{') && trimmed.contains("\"type\"") {
            parse_json_line(trimmed, &mut json, &mut out);
            continue;
        }

        if is_running_line(trimmed) {
            if let Some(block) = human.take() {
                block.finish(&mut out, None);
            }
            human = Some(HumanBlock::default());
            continue;
        }

        let Some(block) = human.as_mut() else {
            continue;
        };

        if let Some(rest) = trimmed.strip_prefix("test result:") {
            let totals = Totals::from_result_line(rest);
            if totals.is_none() {
                out.problems.push(format!("unrecognized test result line: {}", trimmed));
            }
            if let Some(block) = human.take() {
                block.finish(&mut out, totals);
            }
            continue;
        }

        if let Some(name) = section_header(trimmed) {
            block.failures.entry(name.to_string()).or_default();
            block.capturing = Some(name.to_string());
            continue;
        }

        if trimmed == "failures:" {
            block.capturing = None;
            continue;
        }

        if let Some(name) = block.capturing.clone() {
            let text = block.failures.entry(name).or_default();
            text.push_str(line);
            text.push('\n');
            continue;
        }

        if let Some(case) = parse_human_case(trimmed) {
            block.cases.push(case);
        }
    }

    if let Some(block) = human.take() {
        block.finish(&mut out, None);
    }
    if let Some(suite) = json.take() {
        suite.finish(&mut out, None);
    }

    out
}

/// `running 3 tests` / `running 1 test`
fn is_running_line(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("running ") else {
        return false;
    };
    let mut words = rest.split_whitespace();
    matches!(
        (words.next().map(|n| n.parse::<usize>()), words.next(), words.next()),
        (Some(Ok(_)), Some("tests" | "test"), None)
    )
}

/// `---- name stdout ----`
fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix("---- ")?
        .strip_suffix(" stdout ----")
        .map(str::trim)
}

/// `test name ... ok|FAILED|ignored[, reason]`
fn parse_human_case(line: &str) -> Option<ParsedCase> {
    let rest = line.strip_prefix("test ")?;
    let (name, result) = rest.rsplit_once(" ... ")?;

    let status = match result.trim() {
        "ok" => TestCaseStatus::Passed,
        "FAILED" => TestCaseStatus::Failed,
        r if r.starts_with("ignored") => TestCaseStatus::Ignored,
        _ => return None,
    };

    Some(ParsedCase {
        name: name.trim().to_string(),
        status,
        duration: Duration::ZERO,
        failure_message: None,
    })
}

fn parse_json_line(line: &str, json: &mut Option<JsonSuite>, out: &mut ParsedOutput) {
    let event: LibtestEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            out.problems
                .push(format!("unparseable libtest JSON event ({}): {}", e, line));
            return;
        }
    };

    match (event.kind.as_str(), event.event.as_str()) {
        ("suite", "started") => {
            if let Some(suite) = json.take() {
                suite.finish(out, None);
            }
            *json = Some(JsonSuite::default());
        }
        ("suite", "ok" | "failed") => {
            let totals = match (event.passed, event.failed, event.ignored) {
                (Some(passed), Some(failed), Some(ignored)) => Some(Totals {
                    passed,
                    failed,
                    ignored,
                }),
                _ => {
                    out.problems
                        .push("libtest suite event is missing its counts".to_string());
                    None
                }
            };
            let suite = json.take().unwrap_or_default();
            match totals {
                Some(totals) => suite.finish(out, Some(totals)),
                None => out.cases.extend(suite.cases),
            }
        }
        ("test", "ok" | "failed" | "ignored") => {
            let Some(name) = event.name else {
                out.problems
                    .push("libtest test event has no name".to_string());
                return;
            };
            let status = match event.event.as_str() {
                "ok" => TestCaseStatus::Passed,
                "failed" => TestCaseStatus::Failed,
                _ => TestCaseStatus::Ignored,
            };
            let failure_message = match status {
                TestCaseStatus::Failed => event
                    .stdout
                    .or(event.message)
                    .map(|s| s.trim_end().to_string())
                    .filter(|s| !s.is_empty()),
                _ => None,
            };
            let case = ParsedCase {
                name,
                status,
                duration: event
                    .exec_time
                    .filter(|t| t.is_finite() && *t >= 0.0)
                    .map(Duration::from_secs_f64)
                    .unwrap_or_default(),
                failure_message,
            };
            json.get_or_insert_with(JsonSuite::default).cases.push(case);
        }
        // started events, benches and anything newer harnesses add
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUMAN: &str = "\
   Compiling demo v0.1.0
    Finished test [unoptimized + debuginfo] target(s) in 0.50s
     Running unittests src/lib.rs

running 4 tests
test tests::adds ... ok
test tests::io::reads - should panic ... ok
test tests::divides ... FAILED
test tests::slow ... ignored, takes minutes

failures:

---- tests::divides stdout ----
thread 'tests::divides' panicked at src/lib.rs:10:9:
attempt to divide by zero

failures:
    tests::divides

test result: FAILED. 2 passed; 1 failed; 1 ignored; 0 measured; 0 filtered out; finished in 0.01s
";

    #[test]
    fn test_human_output() {
        let parsed = parse_output(HUMAN);

        assert!(parsed.problems.is_empty(), "{:?}", parsed.problems);
        let names: Vec<_> = parsed.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "tests::adds",
                "tests::io::reads - should panic",
                "tests::divides",
                "tests::slow",
            ]
        );
        assert_eq!(parsed.cases[2].status, TestCaseStatus::Failed);
        assert_eq!(parsed.cases[3].status, TestCaseStatus::Ignored);
        let message = parsed.cases[2].failure_message.as_deref().unwrap();
        assert!(message.contains("attempt to divide by zero"));
        assert!(parsed.cases[0].failure_message.is_none());
    }

    #[test]
    fn test_multiple_binaries() {
        let output = "\
running 1 test
test a ... ok

test result: ok. 1 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.00s

running 0 tests

test result: ok. 0 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.00s

running 1 test
test b ... ok

test result: ok. 1 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.00s
";
        let parsed = parse_output(output);
        assert!(parsed.problems.is_empty());
        assert_eq!(parsed.cases.len(), 2);
    }

    #[test]
    fn test_count_mismatch_is_a_problem() {
        let output = "\
running 2 tests
test a ... ok
test result: ok. 2 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.00s
";
        let parsed = parse_output(output);
        assert_eq!(parsed.cases.len(), 1);
        assert_eq!(parsed.problems.len(), 1);
        assert!(parsed.problems[0].contains("2 passed"));
    }

    #[test]
    fn test_truncated_output() {
        let output = "running 2 tests\ntest a ... ok\ntest b ... ";
        let parsed = parse_output(output);
        assert_eq!(parsed.cases.len(), 1);
        assert!(parsed.problems[0].contains("truncated"));
    }

    #[test]
    fn test_unrelated_output_is_ignored() {
        let output = "building...\ntest the waters ... later\nrunning late\ndone\n";
        assert_eq!(parse_output(output), ParsedOutput::default());
    }

    #[test]
    fn test_json_output() {
        let output = r#"
{ "type": "suite", "event": "started", "test_count": 3 }
{ "type": "test", "event": "started", "name": "a" }
{ "type": "test", "name": "a", "event": "ok", "exec_time": 0.25 }
{ "type": "test", "event": "started", "name": "b" }
{ "type": "test", "name": "b", "event": "failed", "stdout": "thread 'b' panicked\n" }
{ "type": "test", "name": "c", "event": "ignored" }
{ "type": "suite", "event": "failed", "passed": 1, "failed": 1, "ignored": 1, "measured": 0, "filtered_out": 0, "exec_time": 0.3 }
"#;
        let parsed = parse_output(output);

        assert!(parsed.problems.is_empty(), "{:?}", parsed.problems);
        assert_eq!(parsed.cases.len(), 3);
        assert_eq!(parsed.cases[0].duration, Duration::from_millis(250));
        assert_eq!(parsed.cases[1].status, TestCaseStatus::Failed);
        assert_eq!(
            parsed.cases[1].failure_message.as_deref(),
            Some("thread 'b' panicked")
        );
    }

    #[test]
    fn test_malformed_json_event() {
        let output = "{ \"type\": \"suite\", \"event\": \"started\" }\n{\"type\": \"test\", \"name\": \"a\", \"ev\n";
        let parsed = parse_output(output);
        assert!(parsed
            .problems
            .iter()
            .any(|p| p.contains("unparseable libtest JSON event")));
        // The suite never finished either
        assert!(parsed.problems.iter().any(|p| p.contains("truncated")));
    }

    #[test]
    fn test_result_line_parsing() {
        let totals =
            Totals::from_result_line(" ok. 3 passed; 1 failed; 2 ignored; 0 measured; 0 filtered out")
                .unwrap();
        assert_eq!(
            totals,
            Totals {
                passed: 3,
                failed: 1,
                ignored: 2
            }
        );
        assert!(Totals::from_result_line(" garbage").is_none());
    }
}
