// Definition errors
// Where a definition went wrong (source position or document path) and how to fix it

use std::fmt;

/// Keys other CI systems use for what trellis spells differently
const RENAMES: &[(&str, &str)] = &[
    ("script", "run"),
    ("if", "condition"),
    ("when", "condition"),
    ("os", "host"),
    ("timeout", "timeout_seconds"),
    ("continue_on_error", "best_effort"),
    ("strategy", "matrix"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Not YAML, or YAML that does not have the shape of a definition
    Syntax,
    /// A well-formed document that breaks a structural rule
    Structure,
    /// The definition file could not be read
    Io,
}

/// 1-indexed position in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A definition that could not be loaded
#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Dotted path of the offending node, e.g. `steps[2].commands`
    pub path: Option<String>,
    pub position: Option<Position>,
    /// Source lines leading up to the error, with a caret under the column
    pub excerpt: Option<String>,
    pub suggestion: Option<String>,
}

impl ParseError {
    fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            position: None,
            excerpt: None,
            suggestion: None,
        }
    }

    /// A structural rule broken at `path`
    pub fn at_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        let mut err = Self::new(ParseErrorKind::Structure, message);
        err.path = Some(path.into());
        err
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Io, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Syntax, message)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Convert a deserialization failure, keeping its document path and
    /// pointing into `source`
    pub fn from_yaml(err: &serde_yaml::Error, source: &str) -> Self {
        let text = err.to_string();
        let text = match text.rfind(" at line ") {
            Some(idx) if err.location().is_some() => &text[..idx],
            _ => text.as_str(),
        };
        let (path, detail) = split_document_path(text);

        let mut parsed = Self::syntax(detail.replace('`', "'"));
        parsed.path = path.map(str::to_string);
        parsed.position = err.location().map(|loc| Position {
            line: loc.line(),
            column: loc.column(),
        });
        if let Some(position) = parsed.position {
            parsed.excerpt = excerpt(source, position);
        }
        parsed.suggestion = suggest(detail, source, parsed.position);
        parsed
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.message)?;

        match (&self.path, self.position) {
            (Some(path), Some(pos)) => write!(f, "\n  --> {} (line {}:{})", path, pos.line, pos.column)?,
            (Some(path), None) => write!(f, "\n  --> {}", path)?,
            (None, Some(pos)) => write!(f, "\n  --> line {}:{}", pos.line, pos.column)?,
            (None, None) => {}
        }

        if let Some(excerpt) = &self.excerpt {
            write!(f, "\n{}", excerpt.trim_end())?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nhelp: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// serde_yaml prefixes nested errors with the node path (`steps[0].run: ...`)
fn split_document_path(text: &str) -> (Option<&str>, &str) {
    if let Some((head, rest)) = text.split_once(": ") {
        let is_path = !head.is_empty()
            && head
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']'));
        if is_path {
            return (Some(head), rest);
        }
    }
    (None, text)
}

/// The error line and the one before it, plus a caret line
fn excerpt(source: &str, pos: Position) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let target = lines.get(pos.line.checked_sub(1)?)?;

    let mut out = String::new();
    if pos.line >= 2 {
        if let Some(prev) = lines.get(pos.line - 2) {
            out.push_str(&format!("{:>5} | {}\n", pos.line - 1, prev));
        }
    }
    out.push_str(&format!("{:>5} | {}\n", pos.line, target));
    out.push_str(&format!(
        "{:>5} | {}^\n",
        "",
        " ".repeat(pos.column.saturating_sub(1))
    ));
    Some(out)
}

fn suggest(detail: &str, source: &str, pos: Option<Position>) -> Option<String> {
    if let Some(field) = between(detail, "missing field `", "`") {
        return match field {
            "steps" => Some("a pipeline needs a 'steps' list describing what each job runs".to_string()),
            "name" => Some("every step needs a 'name' used in summaries and reports".to_string()),
            _ => None,
        };
    }

    if let Some(field) = between(detail, "unknown field `", "`") {
        let expected: Vec<&str> = detail
            .split_once("expected ")
            .map(|(_, list)| list.split('`').skip(1).step_by(2).collect())
            .unwrap_or_default();
        return closest_field(field, &expected).map(|name| format!("did you mean '{}'?", name));
    }

    let line = pos.and_then(|p| source.lines().nth(p.line.checked_sub(1)?))?;
    if line.starts_with('\t') {
        return Some("indent with spaces; YAML does not allow tabs".to_string());
    }
    None
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

/// Known rename, else the expected name within a small edit distance
fn closest_field<'a>(field: &str, expected: &[&'a str]) -> Option<&'a str> {
    let lower = field.to_ascii_lowercase().replace('-', "_");
    if let Some((_, to)) = RENAMES.iter().find(|(from, _)| *from == lower) {
        if let Some(name) = expected.iter().copied().find(|name| name == to) {
            return Some(name);
        }
    }

    expected
        .iter()
        .map(|name| (edit_distance(&lower, name), *name))
        .filter(|(distance, name)| *distance <= (name.len() / 3).max(1))
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, name)| name)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_error_display() {
        let err = ParseError::at_path("'run' and 'commands' are mutually exclusive", "steps[1]")
            .with_suggestion("keep one of them");
        let output = err.to_string();

        assert_eq!(err.kind, ParseErrorKind::Structure);
        assert!(output.contains("--> steps[1]"));
        assert!(!output.contains("line"));
        assert!(output.ends_with("help: keep one of them"));
    }

    #[test]
    fn test_yaml_error_keeps_path_and_position() {
        let source = "steps:\n  - name: build\n    run: make\n    condtion: x == 'y'\n";
        #[derive(Debug, serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        #[allow(dead_code)]
        struct Step {
            name: String,
            run: String,
            condition: Option<String>,
        }
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Doc {
            steps: Vec<Step>,
        }

        let err = serde_yaml::from_str::<Doc>(source).unwrap_err();
        let err = ParseError::from_yaml(&err, source);

        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert_eq!(err.path.as_deref(), Some("steps[0]"));
        assert!(err.message.starts_with("unknown field 'condtion'"));
        assert_eq!(err.position.map(|p| p.line), Some(4));
        assert!(err.excerpt.as_deref().unwrap().contains("    4 |     condtion"));
        assert_eq!(err.suggestion.as_deref(), Some("did you mean 'condition'?"));
    }

    #[test]
    fn test_excerpt_caret() {
        let excerpt = excerpt("a: 1\nb: [\n", Position { line: 2, column: 4 }).unwrap();
        assert_eq!(excerpt, "    1 | a: 1\n    2 | b: [\n      |    ^\n");
        assert!(super::excerpt("a: 1", Position { line: 9, column: 1 }).is_none());
    }

    #[test]
    fn test_split_document_path() {
        assert_eq!(
            split_document_path("settings.max_parallel: invalid type"),
            (Some("settings.max_parallel"), "invalid type")
        );
        assert_eq!(
            split_document_path("missing field `steps`"),
            (None, "missing field `steps`")
        );
        assert_eq!(
            split_document_path("invalid value: x, expected y"),
            (None, "invalid value: x, expected y")
        );
    }

    #[test]
    fn test_closest_field() {
        let expected = ["name", "run", "commands", "condition", "timeout_seconds"];
        assert_eq!(closest_field("comands", &expected), Some("commands"));
        assert_eq!(closest_field("script", &expected), Some("run"));
        assert_eq!(closest_field("Timeout", &expected), Some("timeout_seconds"));
        assert_eq!(closest_field("artifacts", &expected), None);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }
}
