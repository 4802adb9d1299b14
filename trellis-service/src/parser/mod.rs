// Parser module for pipeline definitions
// Provides YAML parsing, structural validation and serialization

pub mod definition;
pub mod error;
pub mod models;

pub use definition::DefinitionParser;
pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use models::*;
