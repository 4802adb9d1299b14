pub mod matrix;
pub mod run;
pub mod validate;

use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use std::path::Path;
use trellis_service::{DefinitionParser, PipelineDefinition};

use crate::output;

/// Read and parse a definition file
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    if !path.exists() {
        bail!("Pipeline file not found: {}", path.display());
    }

    output::status("Parsing", &format!("{}", path.display()));
    DefinitionParser::parse_file(path)
        .map_err(|e| eyre!("failed to parse {}\n{}", path.display(), e))
}
