// Definition Parser
// Loads pipeline definitions from YAML and checks their structure

use crate::parser::error::{ParseError, ParseResult};
use crate::parser::models::PipelineDefinition;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parser for pipeline definition documents
pub struct DefinitionParser;

impl DefinitionParser {
    /// Parse a definition from a YAML string
    pub fn parse(content: &str) -> ParseResult<PipelineDefinition> {
        let definition: PipelineDefinition = serde_yaml::from_str(content)
            .map_err(|e| ParseError::from_yaml(&e, content))?;
        Self::validate(&definition)?;
        Ok(definition)
    }

    /// Parse a definition from a file path
    pub fn parse_file(path: &Path) -> ParseResult<PipelineDefinition> {
        let content = fs::read_to_string(path).map_err(|e| {
            ParseError::io(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Serialize a definition back to YAML
    pub fn to_yaml(definition: &PipelineDefinition) -> ParseResult<String> {
        serde_yaml::to_string(definition)
            .map_err(|e| ParseError::syntax(format!("cannot serialize definition: {}", e)))
    }

    /// Structural checks that serde cannot express.
    ///
    /// Matrix and condition checks need the expanded jobs and live in
    /// `ExecutionPlan::build`.
    pub(crate) fn validate(definition: &PipelineDefinition) -> ParseResult<()> {
        if definition.steps.is_empty() {
            return Err(ParseError::at_path(
                "a pipeline must declare at least one step",
                "steps",
            ));
        }

        let mut names = HashSet::new();
        for (i, step) in definition.steps.iter().enumerate() {
            let path = format!("steps[{}]", i);

            if step.name.trim().is_empty() {
                return Err(ParseError::at_path("step name must not be empty", path));
            }

            if !names.insert(step.name.as_str()) {
                return Err(ParseError::at_path(
                    format!("duplicate step name '{}'", step.name),
                    path,
                )
                .with_suggestion("step names identify outcomes in reports and must be unique"));
            }

            match (&step.run, step.commands.is_empty()) {
                (Some(_), false) => {
                    return Err(ParseError::at_path(
                        "'run' and 'commands' are mutually exclusive",
                        path,
                    ))
                }
                (None, true) => {
                    return Err(ParseError::at_path(
                        format!("step '{}' has nothing to run", step.name),
                        path,
                    )
                    .with_suggestion("add 'run: <script>' or a 'commands:' list"))
                }
                _ => {}
            }

            if step.timeout_seconds == Some(0) {
                return Err(ParseError::at_path(
                    "timeout_seconds must be greater than zero",
                    format!("{}.timeout_seconds", path),
                ));
            }
        }

        if definition.settings.max_parallel == Some(0) {
            return Err(ParseError::at_path(
                "max_parallel must be greater than zero",
                "settings.max_parallel",
            ));
        }

        if definition.settings.step_timeout_seconds == Some(0) {
            return Err(ParseError::at_path(
                "step_timeout_seconds must be greater than zero",
                "settings.step_timeout_seconds",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::error::ParseErrorKind;
    use crate::parser::models::{CommandSpec, HostOs, RunPolicy};
    use crate::runners::shell::Shell;

    const CI: &str = r#"
name: ci
matrix:
  platform:
    linux:
      imageName: ubuntu-latest
    windows:
      imageName: windows-latest
  channel:
    stable:
      toolchain_channel: stable
    beta:
      toolchain_channel: beta
exclude:
  - platform: windows
    channel: beta
settings:
  fail_fast: true
  max_parallel: 2
steps:
  - name: install
    run: rustup default $(toolchain_channel)
    policy: always
  - name: build
    commands:
      - cargo build --verbose
      - run: cargo clippy
        best_effort: true
  - name: test
    run: cargo test
    condition: platform == 'linux'
    host: unix
    shell: bash
    timeout_seconds: 600
"#;

    #[test]
    fn test_parse_full_definition() {
        let definition = DefinitionParser::parse(CI).unwrap();

        assert_eq!(definition.display_name(), "ci");
        let dims: Vec<_> = definition.matrix.keys().cloned().collect();
        assert_eq!(dims, vec!["platform", "channel"]);
        let labels: Vec<_> = definition.matrix["platform"].keys().cloned().collect();
        assert_eq!(labels, vec!["linux", "windows"]);
        assert_eq!(definition.exclude.len(), 1);
        assert_eq!(definition.settings.fail_fast, Some(true));
        assert_eq!(definition.settings.max_parallel, Some(2));

        assert_eq!(definition.steps.len(), 3);
        assert_eq!(definition.steps[0].policy, RunPolicy::Always);
        assert_eq!(definition.steps[1].commands.len(), 2);
        assert!(matches!(
            definition.steps[1].commands[1],
            CommandSpec::Detailed { best_effort: true, .. }
        ));
        assert_eq!(definition.steps[2].host, Some(HostOs::Unix));
        assert_eq!(definition.steps[2].shell, Shell::Bash);
        assert_eq!(definition.steps[2].timeout_seconds, Some(600));
    }

    #[test]
    fn test_yaml_round_trip_is_lossless() {
        let definition = DefinitionParser::parse(CI).unwrap();
        let yaml = DefinitionParser::to_yaml(&definition).unwrap();
        let reparsed = DefinitionParser::parse(&yaml).unwrap();

        assert_eq!(definition, reparsed);
    }

    #[test]
    fn test_version_bindings_keep_their_text() {
        let yaml = "matrix:\n  rust:\n    old: { version: 1.10 }\n    new: { version: 1.80 }\nsteps:\n  - name: a\n    run: echo\n";
        let definition = DefinitionParser::parse(yaml).unwrap();

        assert_eq!(definition.matrix["rust"]["old"].0["version"], "1.10");
        assert_eq!(definition.matrix["rust"]["new"].0["version"], "1.80");

        let reparsed = DefinitionParser::parse(&DefinitionParser::to_yaml(&definition).unwrap()).unwrap();
        assert_eq!(reparsed, definition);
    }

    #[test]
    fn test_missing_steps() {
        let err = DefinitionParser::parse("name: empty\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains("steps"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let yaml = "steps:\n  - name: build\n    run: make\n    condtion: x == 'y'\n";
        let err = DefinitionParser::parse(yaml).unwrap_err();
        assert!(err.message.contains("condtion"));
        assert_eq!(err.suggestion.as_deref(), Some("did you mean 'condition'?"));
    }

    #[test]
    fn test_run_and_commands_are_exclusive() {
        let yaml = "steps:\n  - name: build\n    run: make\n    commands: [make test]\n";
        let err = DefinitionParser::parse(yaml).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("steps[0]"));
    }

    #[test]
    fn test_step_without_commands() {
        let yaml = "steps:\n  - name: build\n";
        let err = DefinitionParser::parse(yaml).unwrap_err();
        assert!(err.message.contains("nothing to run"));
    }

    #[test]
    fn test_duplicate_step_names() {
        let yaml = "steps:\n  - name: build\n    run: a\n  - name: build\n    run: b\n";
        let err = DefinitionParser::parse(yaml).unwrap_err();
        assert!(err.message.contains("duplicate step name"));
        assert_eq!(err.path.as_deref(), Some("steps[1]"));
    }

    #[test]
    fn test_zero_max_parallel() {
        let yaml = "settings:\n  max_parallel: 0\nsteps:\n  - name: a\n    run: echo\n";
        let err = DefinitionParser::parse(yaml).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("settings.max_parallel"));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trellis.yml");
        fs::write(&path, CI).unwrap();

        let definition = DefinitionParser::parse_file(&path).unwrap();
        assert_eq!(definition.steps.len(), 3);

        let err = DefinitionParser::parse_file(&dir.path().join("missing.yml")).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Io);
    }
}
