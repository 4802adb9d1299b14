// Matrix Expansion
// Expands matrix dimensions into the ordered list of concrete jobs

use crate::error::ConfigError;
use crate::parser::models::PipelineDefinition;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Prefix reserved for variables the executor exports itself
pub const RESERVED_PREFIX: &str = "TRELLIS_";

/// Identity of the single job produced by a matrix with no dimensions
pub const DEFAULT_IDENTITY: &str = "default";

/// One axis of the matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub variants: Vec<Variant>,
}

/// One value of a dimension: a label plus the variables it binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub label: String,
    pub bindings: IndexMap<String, String>,
}

impl Dimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: Vec::new(),
        }
    }

    /// Add a variant with the given bindings
    pub fn variant<K, V>(
        mut self,
        label: impl Into<String>,
        bindings: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.variants.push(Variant {
            label: label.into(),
            bindings: bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    fn variant_index(&self, label: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.label == label)
    }
}

/// One cell of the cross-product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Position in expansion order
    pub index: usize,
    /// Variant labels joined by `-`, in dimension order
    pub identity: String,
    /// (dimension, label) pairs, in dimension order
    pub selections: Vec<(String, String)>,
    /// Variables exported to every step of the job
    pub variables: IndexMap<String, String>,
}

impl fmt::Display for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)
    }
}

/// `dimension=label` selection given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixFilter {
    pub dimension: String,
    pub label: String,
}

impl MatrixFilter {
    pub fn new(dimension: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            label: label.into(),
        }
    }
}

impl FromStr for MatrixFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidFilter {
            filter: s.to_string(),
            reason: reason.to_string(),
        };

        let (dimension, label) = s.split_once('=').ok_or_else(|| invalid("expected dimension=label"))?;
        let (dimension, label) = (dimension.trim(), label.trim());

        if dimension.is_empty() || label.is_empty() {
            return Err(invalid("expected dimension=label"));
        }

        Ok(Self::new(dimension, label))
    }
}

impl fmt::Display for MatrixFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.dimension, self.label)
    }
}

/// Whether a variable name may be declared by a matrix
pub fn is_reserved(name: &str) -> bool {
    name.is_empty()
        || name.contains('=')
        || name.to_ascii_uppercase().starts_with(RESERVED_PREFIX)
}

fn check_label(dimension: &str, label: &str) -> Result<(), ConfigError> {
    let reason = if label.is_empty() {
        Some("label must not be empty")
    } else if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        Some("labels may only contain letters, digits, '_' and '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidLabel {
            dimension: dimension.to_string(),
            label: label.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Matrix expander
pub struct MatrixExpander;

impl MatrixExpander {
    /// Dimensions declared by a definition, in declaration order
    pub fn dimensions(definition: &PipelineDefinition) -> Vec<Dimension> {
        definition
            .matrix
            .iter()
            .map(|(name, variants)| Dimension {
                name: name.clone(),
                variants: variants
                    .iter()
                    .map(|(label, bindings)| Variant {
                        label: label.clone(),
                        bindings: bindings.0.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Expand a definition's matrix, applying its exclude rules and the given filters
    pub fn expand_definition(
        definition: &PipelineDefinition,
        filters: &[MatrixFilter],
    ) -> Result<Vec<JobConfig>, ConfigError> {
        Self::expand(&Self::dimensions(definition), &definition.exclude, filters)
    }

    /// Expand dimensions into jobs.
    ///
    /// Cells are produced in declaration order with the last dimension varying
    /// fastest. Excluded and filtered-out cells are dropped before indexes are
    /// assigned, so `index` is always the position in the returned list.
    pub fn expand(
        dimensions: &[Dimension],
        exclude: &[IndexMap<String, String>],
        filters: &[MatrixFilter],
    ) -> Result<Vec<JobConfig>, ConfigError> {
        Self::validate(dimensions)?;
        let exclusions = Self::resolve_excludes(dimensions, exclude)?;
        let selected = Self::resolve_filters(dimensions, filters)?;

        // Cross-product of variant positions
        let mut cells: Vec<Vec<usize>> = vec![Vec::new()];
        for dimension in dimensions {
            cells = cells
                .into_iter()
                .flat_map(|prefix| {
                    (0..dimension.variants.len()).map(move |i| {
                        let mut cell = prefix.clone();
                        cell.push(i);
                        cell
                    })
                })
                .collect();
        }

        let jobs: Vec<JobConfig> = cells
            .into_iter()
            .filter(|cell| {
                !exclusions
                    .iter()
                    .any(|rule| rule.iter().all(|&(d, v)| cell[d] == v))
            })
            .filter(|cell| {
                selected
                    .iter()
                    .all(|(&d, labels)| labels.contains(&cell[d]))
            })
            .enumerate()
            .map(|(index, cell)| Self::build_job(dimensions, index, &cell))
            .collect();

        if jobs.is_empty() {
            return Err(ConfigError::EmptySelection);
        }

        Ok(jobs)
    }

    fn build_job(dimensions: &[Dimension], index: usize, cell: &[usize]) -> JobConfig {
        let mut selections = Vec::with_capacity(dimensions.len());
        let mut variables = IndexMap::new();

        for (dimension, &position) in dimensions.iter().zip(cell) {
            let variant = &dimension.variants[position];
            selections.push((dimension.name.clone(), variant.label.clone()));
            variables.insert(dimension.name.clone(), variant.label.clone());
            for (name, value) in &variant.bindings {
                variables.insert(name.clone(), value.clone());
            }
        }

        let identity = if selections.is_empty() {
            DEFAULT_IDENTITY.to_string()
        } else {
            selections
                .iter()
                .map(|(_, label)| label.as_str())
                .collect::<Vec<_>>()
                .join("-")
        };

        JobConfig {
            index,
            identity,
            selections,
            variables,
        }
    }

    fn validate(dimensions: &[Dimension]) -> Result<(), ConfigError> {
        // variable name -> dimension that declares it
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for dimension in dimensions {
            if is_reserved(&dimension.name) {
                return Err(ConfigError::ReservedVariable {
                    variable: dimension.name.clone(),
                    dimension: dimension.name.clone(),
                });
            }
            if let Some(first) = owners.insert(&dimension.name, &dimension.name) {
                return Err(ConfigError::VariableCollision {
                    variable: dimension.name.clone(),
                    first: first.to_string(),
                    second: dimension.name.clone(),
                });
            }
        }

        for dimension in dimensions {
            if dimension.variants.is_empty() {
                return Err(ConfigError::EmptyDimension {
                    dimension: dimension.name.clone(),
                });
            }

            let mut labels = std::collections::HashSet::new();
            for variant in &dimension.variants {
                check_label(&dimension.name, &variant.label)?;
                if !labels.insert(variant.label.as_str()) {
                    return Err(ConfigError::InvalidLabel {
                        dimension: dimension.name.clone(),
                        label: variant.label.clone(),
                        reason: "label is declared twice".to_string(),
                    });
                }

                for name in variant.bindings.keys() {
                    if is_reserved(name) {
                        return Err(ConfigError::ReservedVariable {
                            variable: name.clone(),
                            dimension: dimension.name.clone(),
                        });
                    }
                    match owners.get(name.as_str()) {
                        Some(&owner) if owner != dimension.name || name == &dimension.name => {
                            return Err(ConfigError::VariableCollision {
                                variable: name.clone(),
                                first: owner.to_string(),
                                second: dimension.name.clone(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            owners.insert(name, &dimension.name);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Exclude rules as (dimension position, variant position) pairs
    fn resolve_excludes(
        dimensions: &[Dimension],
        exclude: &[IndexMap<String, String>],
    ) -> Result<Vec<Vec<(usize, usize)>>, ConfigError> {
        exclude
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                if rule.is_empty() {
                    return Err(ConfigError::UnknownExclude {
                        index,
                        what: "cells (the rule names no dimensions)".to_string(),
                    });
                }

                rule.iter()
                    .map(|(dim_name, label)| {
                        let d = dimensions
                            .iter()
                            .position(|dim| &dim.name == dim_name)
                            .ok_or_else(|| ConfigError::UnknownExclude {
                                index,
                                what: format!("dimension '{}'", dim_name),
                            })?;
                        let v = dimensions[d].variant_index(label).ok_or_else(|| {
                            ConfigError::UnknownExclude {
                                index,
                                what: format!("label '{}' in dimension '{}'", label, dim_name),
                            }
                        })?;
                        Ok((d, v))
                    })
                    .collect()
            })
            .collect()
    }

    /// Filters grouped by dimension position; labels within a group are OR'd
    fn resolve_filters(
        dimensions: &[Dimension],
        filters: &[MatrixFilter],
    ) -> Result<HashMap<usize, Vec<usize>>, ConfigError> {
        let mut selected: HashMap<usize, Vec<usize>> = HashMap::new();

        for filter in filters {
            let d = dimensions
                .iter()
                .position(|dim| dim.name == filter.dimension)
                .ok_or_else(|| ConfigError::InvalidFilter {
                    filter: filter.to_string(),
                    reason: format!("unknown dimension '{}'", filter.dimension),
                })?;
            let v = dimensions[d]
                .variant_index(&filter.label)
                .ok_or_else(|| ConfigError::InvalidFilter {
                    filter: filter.to_string(),
                    reason: format!(
                        "dimension '{}' has no variant '{}'",
                        filter.dimension, filter.label
                    ),
                })?;
            selected.entry(d).or_default().push(v);
        }

        Ok(selected)
    }
}
