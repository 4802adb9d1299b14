// Test Results Module
// Test-case records gathered from job output, and their report formats

pub mod aggregator;
pub mod junit;
pub mod libtest;
pub mod reporter;

// Re-export key types
pub use aggregator::{Report, ResultAggregator, RunSummary};
pub use junit::{parse_junit, ReportFormatError};
pub use libtest::{parse_output, ParsedCase, ParsedOutput};
pub use reporter::{ReportFormat, TestReporter};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Result of one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseStatus {
    Passed,
    Failed,
    Ignored,
}

impl fmt::Display for TestCaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestCaseStatus::Passed => write!(f, "passed"),
            TestCaseStatus::Failed => write!(f, "failed"),
            TestCaseStatus::Ignored => write!(f, "ignored"),
        }
    }
}

/// One test case, tagged with the job it ran in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    pub job: String,
    pub name: String,
    pub status: TestCaseStatus,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// All test cases of one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteReport {
    pub job: String,
    pub cases: Vec<TestCaseRecord>,
}

impl TestSuiteReport {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            cases: Vec::new(),
        }
    }

    pub fn count(&self, status: TestCaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    pub fn duration(&self) -> Duration {
        self.cases.iter().map(|c| c.duration).sum()
    }
}

/// (job, test name, status) triples; the identity preserved by every report format
pub fn test_triples(suites: &[TestSuiteReport]) -> BTreeSet<(String, String, TestCaseStatus)> {
    suites
        .iter()
        .flat_map(|suite| suite.cases.iter())
        .map(|case| (case.job.clone(), case.name.clone(), case.status))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(job: &str, name: &str, status: TestCaseStatus) -> TestCaseRecord {
        TestCaseRecord {
            job: job.to_string(),
            name: name.to_string(),
            status,
            duration: Duration::from_millis(5),
            failure_message: None,
        }
    }

    #[test]
    fn test_suite_counts() {
        let suite = TestSuiteReport {
            job: "linux-stable".to_string(),
            cases: vec![
                case("linux-stable", "a", TestCaseStatus::Passed),
                case("linux-stable", "b", TestCaseStatus::Failed),
                case("linux-stable", "c", TestCaseStatus::Passed),
            ],
        };

        assert_eq!(suite.count(TestCaseStatus::Passed), 2);
        assert_eq!(suite.count(TestCaseStatus::Ignored), 0);
        assert_eq!(suite.duration(), Duration::from_millis(15));
    }

    #[test]
    fn test_triples_are_sorted_and_unique() {
        let suites = vec![
            TestSuiteReport {
                job: "windows-beta".to_string(),
                cases: vec![case("windows-beta", "a", TestCaseStatus::Ignored)],
            },
            TestSuiteReport {
                job: "linux-beta".to_string(),
                cases: vec![
                    case("linux-beta", "a", TestCaseStatus::Passed),
                    case("linux-beta", "a", TestCaseStatus::Passed),
                ],
            },
        ];

        let triples: Vec<_> = test_triples(&suites).into_iter().collect();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].0, "linux-beta");
        assert_eq!(triples[1].2, TestCaseStatus::Ignored);
    }
}
