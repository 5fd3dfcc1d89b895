//! Selection model and query text parsing.

mod field_type;
mod query;
mod selection;

use displaydoc::Display;
pub use field_type::FieldType;
pub use query::Query;
pub use selection::Selection;
pub use selection::SelectionSet;
use thiserror::Error;

use crate::graphql::ErrorExtension;

/// GraphQL parsing errors.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpecError {
    /// parsing error: {0}
    ParsingError(String),
    /// invalid type reference '{0}'
    InvalidType(String),
    /// Unknown operation named "{0}"
    UnknownOperation(String),
    /// the document holds several operations, an operation name is required
    MissingOperationName,
    /// the document holds no operation
    NoOperation,
    /// only query operations are supported
    UnsupportedOperation,
    /// unknown fragment '{0}'
    UnknownFragment(String),
    /// fragment '{0}' spreads itself
    RecursiveFragment(String),
    /// variable '${0}' is not defined
    UnknownVariable(String),
    /// invalid value: {0}
    InvalidValue(String),
    /// field '{field}' of '{type_name}' is marked shareable but never declared
    UndeclaredShareableField { type_name: String, field: String },
}

impl ErrorExtension for SpecError {
    fn extension_code(&self) -> String {
        match self {
            SpecError::ParsingError(_) => "PARSING_ERROR",
            SpecError::InvalidType(_) | SpecError::UndeclaredShareableField { .. } => {
                "INVALID_TYPE"
            }
            SpecError::UnknownOperation(_)
            | SpecError::MissingOperationName
            | SpecError::NoOperation => "GRAPHQL_UNKNOWN_OPERATION_NAME",
            SpecError::UnsupportedOperation => "OPERATION_NOT_SUPPORTED",
            SpecError::UnknownFragment(_)
            | SpecError::RecursiveFragment(_)
            | SpecError::UnknownVariable(_)
            | SpecError::InvalidValue(_) => "GRAPHQL_VALIDATION_FAILED",
        }
        .to_string()
    }
}
