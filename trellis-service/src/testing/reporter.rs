// Test Reporter
// Renders a run report as JUnit XML, JSON, TAP or a terminal summary

use crate::error::{ServiceError, ServiceResult};
use crate::parser::models::{JobStatus, StepStatus};
use crate::testing::aggregator::Report;
use crate::testing::junit::ReportFormatError;
use crate::testing::TestCaseStatus;

use std::fmt;
use std::path::Path;
use tracing::info;

/// File format for the structured report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// JUnit XML format (for CI systems)
    #[default]
    JUnit,
    /// The full report as JSON
    Json,
    /// TAP (Test Anything Protocol) format
    Tap,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::JUnit => write!(f, "junit"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Tap => write!(f, "tap"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "junit" | "junit-xml" | "xml" => Ok(ReportFormat::JUnit),
            "json" => Ok(ReportFormat::Json),
            "tap" => Ok(ReportFormat::Tap),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: junit, json, tap",
                s
            )),
        }
    }
}

/// Test reporter that generates output in various formats
pub struct TestReporter;

impl TestReporter {
    /// Generate a report in the specified format
    pub fn report(report: &Report, format: ReportFormat) -> ServiceResult<String> {
        match format {
            ReportFormat::JUnit => Ok(Self::to_junit_xml(report)),
            ReportFormat::Json => Self::to_json(report),
            ReportFormat::Tap => Ok(Self::to_tap(report)),
        }
    }

    /// Render and write a report file
    pub fn write(report: &Report, format: ReportFormat, path: &Path) -> ServiceResult<()> {
        let content = Self::report(report, format)?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), format = %format, "report written");
        Ok(())
    }

    /// Generate JUnit XML output: one `<testsuite>` per job identity.
    ///
    /// Compatible with CI systems like Azure DevOps, Jenkins, GitHub Actions, etc.
    pub fn to_junit_xml(report: &Report) -> String {
        let total = report.test_count();
        let failures: usize = report
            .suites
            .iter()
            .map(|s| s.count(TestCaseStatus::Failed))
            .sum();

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuites name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
            xml_escape(&report.name),
            total,
            failures,
            report.summary.duration.as_secs_f64()
        ));

        for suite in &report.suites {
            xml.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
                xml_escape(&suite.job),
                suite.cases.len(),
                suite.count(TestCaseStatus::Failed),
                suite.count(TestCaseStatus::Ignored),
                suite.duration().as_secs_f64()
            ));

            for case in &suite.cases {
                xml.push_str(&format!(
                    "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
                    xml_escape(&case.name),
                    xml_escape(&case.job),
                    case.duration.as_secs_f64()
                ));

                match case.status {
                    TestCaseStatus::Passed => xml.push_str(" />\n"),
                    TestCaseStatus::Ignored => {
                        xml.push_str(">\n      <skipped/>\n    </testcase>\n");
                    }
                    TestCaseStatus::Failed => {
                        xml.push_str(">\n");
                        match &case.failure_message {
                            Some(msg) => {
                                let first = msg.lines().next().unwrap_or("Test failed");
                                xml.push_str(&format!(
                                    "      <failure message=\"{}\">{}</failure>\n",
                                    xml_escape(first),
                                    xml_escape(msg)
                                ));
                            }
                            None => {
                                xml.push_str("      <failure message=\"Test failed\"/>\n");
                            }
                        }
                        xml.push_str("    </testcase>\n");
                    }
                }
            }

            xml.push_str("  </testsuite>\n");
        }

        xml.push_str("</testsuites>\n");
        xml
    }

    /// The whole report, job outcomes included
    pub fn to_json(report: &Report) -> ServiceResult<String> {
        serde_json::to_string_pretty(report).map_err(|e| ServiceError::Report(e.to_string()))
    }

    /// Read back a report written by [`TestReporter::to_json`]
    pub fn from_json(json: &str) -> Result<Report, ReportFormatError> {
        serde_json::from_str(json).map_err(|e| ReportFormatError::Json(e.to_string()))
    }

    /// Generate TAP (Test Anything Protocol) output
    ///
    /// TAP version 13 compatible; each test is named `job: test`
    pub fn to_tap(report: &Report) -> String {
        let mut tap = String::new();
        tap.push_str("TAP version 13\n");
        tap.push_str(&format!("1..{}\n", report.test_count()));

        let cases = report.suites.iter().flat_map(|s| s.cases.iter());
        for (i, case) in cases.enumerate() {
            let test_num = i + 1;

            match case.status {
                TestCaseStatus::Passed => {
                    tap.push_str(&format!("ok {} - {}: {}\n", test_num, case.job, case.name));
                }
                TestCaseStatus::Ignored => {
                    tap.push_str(&format!(
                        "ok {} - {}: {} # SKIP\n",
                        test_num, case.job, case.name
                    ));
                }
                TestCaseStatus::Failed => {
                    tap.push_str(&format!(
                        "not ok {} - {}: {}\n",
                        test_num, case.job, case.name
                    ));

                    // YAML diagnostics block
                    tap.push_str("  ---\n");
                    tap.push_str(&format!("  duration_ms: {}\n", case.duration.as_millis()));
                    if let Some(ref msg) = case.failure_message {
                        tap.push_str("  message: |\n");
                        for line in msg.lines() {
                            tap.push_str(&format!("    {}\n", line));
                        }
                    }
                    tap.push_str("  ...\n");
                }
            }
        }

        let count = |status| {
            report
                .suites
                .iter()
                .map(|s| s.count(status))
                .sum::<usize>()
        };
        tap.push_str(&format!(
            "# tests {}\n# pass {}\n# fail {}\n# skip {}\n# jobs {} succeeded, {} failed, {} skipped\n",
            report.test_count(),
            count(TestCaseStatus::Passed),
            count(TestCaseStatus::Failed),
            count(TestCaseStatus::Ignored),
            report.summary.succeeded,
            report.summary.failed,
            report.summary.skipped,
        ));

        tap
    }

    /// Generate human-readable terminal output
    pub fn to_terminal(report: &Report) -> String {
        let mut out = String::new();

        out.push_str(&format!("\nRun: {}\n", report.name));
        out.push_str(&"=".repeat(60));
        out.push('\n');

        let width = report
            .jobs
            .iter()
            .map(|j| j.identity.len())
            .max()
            .unwrap_or(0);

        for job in &report.jobs {
            let (symbol, status) = match job.status {
                JobStatus::Succeeded => ("+", "PASS"),
                JobStatus::Failed => ("x", "FAIL"),
                JobStatus::Skipped => ("-", "SKIP"),
                JobStatus::Pending | JobStatus::Running => ("?", "----"),
            };

            out.push_str(&format!(
                "  [{}] {} {:<width$} ({:.2}s)\n",
                symbol,
                status,
                job.identity,
                job.duration.as_secs_f64(),
                width = width,
            ));

            if let Some(ref reason) = job.skip_reason {
                out.push_str(&format!("       {}\n", reason));
            }

            for step in job.steps.iter().filter(|s| s.status.is_failure()) {
                let detail = match step.status {
                    StepStatus::TimedOut => "timed out".to_string(),
                    StepStatus::Canceled => "canceled".to_string(),
                    _ => step
                        .error
                        .clone()
                        .unwrap_or_else(|| "failed".to_string()),
                };
                out.push_str(&format!("       step '{}': {}\n", step.name, detail));
            }

            let failed_tests = report
                .suites
                .iter()
                .filter(|s| s.job == job.identity)
                .flat_map(|s| s.cases.iter())
                .filter(|c| c.status == TestCaseStatus::Failed);
            for case in failed_tests {
                out.push_str(&format!("       test failed: {}\n", case.name));
            }
        }

        out.push_str(&"-".repeat(60));
        out.push('\n');

        if report.test_count() > 0 {
            let count = |status| {
                report
                    .suites
                    .iter()
                    .map(|s| s.count(status))
                    .sum::<usize>()
            };
            out.push_str(&format!(
                "  Tests: {} passed, {} failed, {} ignored\n",
                count(TestCaseStatus::Passed),
                count(TestCaseStatus::Failed),
                count(TestCaseStatus::Ignored),
            ));
        }

        for error in &report.errors {
            out.push_str(&format!("  Report problem: {}\n", error));
        }

        let summary = &report.summary;
        let status_line = if summary.failed == 0 {
            format!(
                "  All {} jobs passed ({:.2}s)",
                summary.succeeded,
                summary.duration.as_secs_f64()
            )
        } else {
            format!(
                "  {} of {} jobs failed ({:.2}s)",
                summary.failed,
                summary.total(),
                summary.duration.as_secs_f64()
            )
        };
        out.push_str(&status_line);
        out.push('\n');

        if summary.skipped > 0 {
            out.push_str(&format!("  {} jobs skipped\n", summary.skipped));
        }

        out.push('\n');
        out
    }
}

/// Escape special XML characters
/// Escape markup and replace characters XML 1.0 cannot carry at all
/// (terminal escapes in captured output, for one) with U+FFFD
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            '\u{0}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}' => out.push(char::REPLACEMENT_CHARACTER),
            _ => out.push(c),
        }
    }
    out
}
