// Execution Plan
// Everything checked before a single process is spawned

use crate::error::ConfigError;
use crate::execution::matrix::{is_reserved, JobConfig, MatrixExpander, MatrixFilter};
use crate::expression::Condition;
use crate::parser::definition::DefinitionParser;
use crate::parser::models::{PipelineDefinition, Settings, Step};

use tracing::debug;

/// A step with its condition compiled
#[derive(Debug, Clone)]
pub struct PreparedStep {
    pub step: Step,
    pub condition: Option<Condition>,
}

/// A validated run: expanded jobs plus compiled steps
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub settings: Settings,
    pub steps: Vec<PreparedStep>,
    pub jobs: Vec<JobConfig>,
}

impl ExecutionPlan {
    /// Expand the matrix, compile every condition and check each one
    /// against every job.
    pub fn build(
        definition: &PipelineDefinition,
        filters: &[MatrixFilter],
    ) -> Result<Self, ConfigError> {
        DefinitionParser::validate(definition)?;

        let jobs = MatrixExpander::expand_definition(definition, filters)?;
        let steps = definition
            .steps
            .iter()
            .map(|step| Self::prepare_step(step, &jobs))
            .collect::<Result<Vec<_>, _>>()?;

        for job in &jobs {
            for prepared in &steps {
                if let Some(condition) = &prepared.condition {
                    if let Some(variable) = condition.first_unknown(&job.variables) {
                        return Err(ConfigError::UnknownVariable {
                            step: prepared.step.name.clone(),
                            variable: variable.to_string(),
                            job: job.identity.clone(),
                        });
                    }
                }
            }
        }

        debug!(
            jobs = jobs.len(),
            steps = steps.len(),
            "execution plan built"
        );

        Ok(Self {
            name: definition.display_name().to_string(),
            settings: definition.settings.clone(),
            steps,
            jobs,
        })
    }

    fn prepare_step(step: &Step, jobs: &[JobConfig]) -> Result<PreparedStep, ConfigError> {
        for name in step.env.keys() {
            if is_reserved(name) {
                return Err(ConfigError::InvalidStep {
                    step: step.name.clone(),
                    reason: format!("env variable '{}' uses a reserved name", name),
                });
            }
            if jobs.iter().any(|job| job.variables.contains_key(name)) {
                return Err(ConfigError::InvalidStep {
                    step: step.name.clone(),
                    reason: format!("env variable '{}' collides with a matrix variable", name),
                });
            }
        }

        let condition = step
            .condition
            .as_deref()
            .map(Condition::parse)
            .transpose()
            .map_err(|e| ConfigError::InvalidCondition {
                step: step.name.clone(),
                message: e.to_string(),
            })?;

        Ok(PreparedStep {
            step: step.clone(),
            condition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DefinitionParser;

    const CI: &str = r#"
name: ci
matrix:
  platform:
    linux: { imageName: ubuntu-latest }
    windows: { imageName: windows-latest }
  channel:
    stable:
    beta:
steps:
  - name: build
    run: cargo build
  - name: test
    run: cargo test
    condition: platform == 'linux' && variables['imageName'] != ''
"#;

    #[test]
    fn test_build_plan() {
        let definition = DefinitionParser::parse(CI).unwrap();
        let plan = ExecutionPlan::build(&definition, &[]).unwrap();

        assert_eq!(plan.name, "ci");
        assert_eq!(plan.jobs.len(), 4);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps[0].condition.is_none());
        assert!(plan.steps[1].condition.is_some());
    }

    #[test]
    fn test_undeclared_variable_is_rejected() {
        let yaml = CI.replace("platform == 'linux'", "platfrom == 'linux'");
        let definition = DefinitionParser::parse(&yaml).unwrap();
        let err = ExecutionPlan::build(&definition, &[]).unwrap_err();

        match err {
            ConfigError::UnknownVariable { step, variable, job } => {
                assert_eq!(step, "test");
                assert_eq!(variable, "platfrom");
                assert_eq!(job, "linux-stable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_variable_missing_from_one_job() {
        let yaml = r#"
matrix:
  platform:
    linux: { imageName: ubuntu-latest }
    windows: {}
steps:
  - name: build
    run: make
    condition: imageName == 'ubuntu-latest'
"#;
        let definition = DefinitionParser::parse(yaml).unwrap();
        let err = ExecutionPlan::build(&definition, &[]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownVariable { ref job, .. } if job == "windows"
        ));

        // Filtering the offending job out makes the plan valid
        let plan =
            ExecutionPlan::build(&definition, &[MatrixFilter::new("platform", "linux")]).unwrap();
        assert_eq!(plan.jobs.len(), 1);
    }

    #[test]
    fn test_condition_syntax_error() {
        let yaml = CI.replace("platform == 'linux'", "platform = 'linux'");
        let definition = DefinitionParser::parse(&yaml).unwrap();
        let err = ExecutionPlan::build(&definition, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCondition { .. }));
    }

    #[test]
    fn test_step_env_collision() {
        let mut definition = DefinitionParser::parse(CI).unwrap();
        definition.steps[0]
            .env
            .insert("imageName".to_string(), "custom".to_string());
        let err = ExecutionPlan::build(&definition, &[]).unwrap_err();
        assert!(err.to_string().contains("collides"));

        let mut definition = DefinitionParser::parse(CI).unwrap();
        definition.steps[0]
            .env
            .insert("TRELLIS_STEP".to_string(), "x".to_string());
        let err = ExecutionPlan::build(&definition, &[]).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_programmatic_definition_is_validated() {
        let definition = PipelineDefinition::default();
        let err = ExecutionPlan::build(&definition, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Definition(_)));
    }
}
