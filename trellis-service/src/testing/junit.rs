// JUnit Reader
// Reads JUnit XML back into per-job suites

use crate::testing::{TestCaseRecord, TestCaseStatus, TestSuiteReport};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// A report file that could not be read back
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportFormatError {
    #[error("malformed JUnit XML: {0}")]
    Xml(String),

    #[error("unexpected JUnit structure: {0}")]
    Structure(String),

    #[error("malformed JSON report: {0}")]
    Json(String),
}

/// Test case being read
struct OpenCase {
    record: TestCaseRecord,
    in_failure: bool,
    failure_attr: Option<String>,
    failure_body: String,
}

#[derive(Default)]
struct ReadState {
    suites: Vec<TestSuiteReport>,
    in_suite: bool,
    case: Option<OpenCase>,
}

impl ReadState {
    /// Handle `<tag ...>` (open) or `<tag .../>` (closed)
    fn start(&mut self, e: &BytesStart, open: bool) -> Result<(), ReportFormatError> {
        match e.name().as_ref() {
            b"testsuite" => {
                let name = attributes(e)?.remove("name").ok_or_else(|| {
                    ReportFormatError::Structure("<testsuite> without a name".to_string())
                })?;
                self.suites.push(TestSuiteReport::new(name));
                self.in_suite = open;
            }
            b"testcase" => {
                let record = open_case(e, self.in_suite, &self.suites)?;
                if open {
                    self.case = Some(OpenCase {
                        record,
                        in_failure: false,
                        failure_attr: None,
                        failure_body: String::new(),
                    });
                } else {
                    push_case(&mut self.suites, record);
                }
            }
            b"failure" | b"error" => {
                let case = self.case.as_mut().ok_or_else(|| {
                    ReportFormatError::Structure("<failure> outside <testcase>".to_string())
                })?;
                case.record.status = TestCaseStatus::Failed;
                case.failure_attr = attributes(e)?.remove("message");
                case.in_failure = open;
            }
            b"skipped" => {
                let case = self.case.as_mut().ok_or_else(|| {
                    ReportFormatError::Structure("<skipped> outside <testcase>".to_string())
                })?;
                case.record.status = TestCaseStatus::Ignored;
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"testsuite" => self.in_suite = false,
            b"failure" | b"error" => {
                if let Some(case) = self.case.as_mut() {
                    case.in_failure = false;
                }
            }
            b"testcase" => {
                if let Some(case) = self.case.take() {
                    let mut record = case.record;
                    if record.status == TestCaseStatus::Failed {
                        record.failure_message = if case.failure_body.is_empty() {
                            case.failure_attr
                        } else {
                            Some(case.failure_body)
                        };
                    }
                    push_case(&mut self.suites, record);
                }
            }
            _ => {}
        }
    }

    /// Failure body text, if a `<failure>` element is open
    fn failure_text(&mut self, text: &str) {
        if let Some(case) = self.case.as_mut().filter(|c| c.in_failure) {
            if !case.failure_body.is_empty() {
                case.failure_body.push('\n');
            }
            case.failure_body.push_str(text);
        }
    }
}

/// Parse JUnit XML into one suite per `<testsuite>`.
///
/// A case's job is its `classname`, falling back to the suite name.
pub fn parse_junit(xml: &str) -> Result<Vec<TestSuiteReport>, ReportFormatError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = ReadState::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => state.start(&e, true)?,
            Ok(Event::Empty(e)) => state.start(&e, false)?,
            Ok(Event::End(e)) => state.end(e.name().as_ref()),
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| ReportFormatError::Xml(e.to_string()))?;
                state.failure_text(&text);
            }
            Ok(Event::CData(e)) => state.failure_text(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ReportFormatError::Xml(e.to_string())),
        }
    }

    if state.case.is_some() {
        return Err(ReportFormatError::Structure(
            "unterminated <testcase>".to_string(),
        ));
    }

    Ok(state.suites)
}

fn open_case(
    e: &BytesStart,
    in_suite: bool,
    suites: &[TestSuiteReport],
) -> Result<TestCaseRecord, ReportFormatError> {
    let suite = suites
        .last()
        .filter(|_| in_suite)
        .ok_or_else(|| ReportFormatError::Structure("<testcase> outside <testsuite>".to_string()))?;

    let mut attrs = attributes(e)?;
    let name = attrs
        .remove("name")
        .ok_or_else(|| ReportFormatError::Structure("<testcase> without a name".to_string()))?;
    let job = attrs
        .remove("classname")
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| suite.job.clone());
    let duration = attrs
        .get("time")
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|t| t.is_finite() && *t >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_default();

    Ok(TestCaseRecord {
        job,
        name,
        status: TestCaseStatus::Passed,
        duration,
        failure_message: None,
    })
}

fn push_case(suites: &mut [TestSuiteReport], record: TestCaseRecord) {
    if let Some(suite) = suites.last_mut() {
        suite.cases.push(record);
    }
}

fn attributes(e: &BytesStart) -> Result<HashMap<String, String>, ReportFormatError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ReportFormatError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ReportFormatError::Xml(e.to_string()))?;
        map.insert(key, value.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites name="ci" tests="3" failures="1" time="1.500">
  <testsuite name="linux-stable" tests="2" failures="1" skipped="0" errors="0" time="0.500">
    <testcase name="adds" classname="linux-stable" time="0.250" />
    <testcase name="divides" classname="linux-stable" time="0.250">
      <failure message="attempt to divide by zero">thread &apos;divides&apos; panicked
attempt to divide by zero</failure>
    </testcase>
  </testsuite>
  <testsuite name="windows-beta" tests="1" failures="0" skipped="1" errors="0" time="0.000">
    <testcase name="slow" time="0.000">
      <skipped/>
    </testcase>
  </testsuite>
  <testsuite name="empty" tests="0" failures="0" skipped="0" errors="0" time="0.000">
  </testsuite>
</testsuites>
"#;

    #[test]
    fn test_parse_junit() {
        let suites = parse_junit(XML).unwrap();

        assert_eq!(suites.len(), 3);
        assert_eq!(suites[0].job, "linux-stable");
        assert_eq!(suites[0].cases.len(), 2);
        assert_eq!(suites[0].cases[0].status, TestCaseStatus::Passed);
        assert_eq!(suites[0].cases[0].duration, Duration::from_millis(250));

        let failed = &suites[0].cases[1];
        assert_eq!(failed.status, TestCaseStatus::Failed);
        let message = failed.failure_message.as_deref().unwrap();
        assert!(message.starts_with("thread 'divides' panicked"));

        // classname missing: job falls back to the suite name
        assert_eq!(suites[1].cases[0].job, "windows-beta");
        assert_eq!(suites[1].cases[0].status, TestCaseStatus::Ignored);

        assert!(suites[2].cases.is_empty());
    }

    #[test]
    fn test_failure_message_attribute_only() {
        let xml = r#"<testsuites><testsuite name="a"><testcase name="t"><failure message="boom"/></testcase></testsuite></testsuites>"#;
        let suites = parse_junit(xml).unwrap();
        assert_eq!(
            suites[0].cases[0].failure_message.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_testcase_outside_suite() {
        let err = parse_junit(r#"<testsuites><testcase name="t"/></testsuites>"#).unwrap_err();
        assert!(matches!(err, ReportFormatError::Structure(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_junit(r#"<testsuites><testsuite name="a"></testsuites>"#).unwrap_err();
        assert!(matches!(err, ReportFormatError::Xml(_)));
    }
}
