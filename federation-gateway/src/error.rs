//! Gateway errors.

use displaydoc::Display;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
pub use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::graphql::Response;
use crate::json_ext::Path;
pub use crate::spec::SpecError;

/// Errors raised while building the [`SchemaRegistry`](crate::registry::SchemaRegistry).
///
/// These happen once at startup and are fatal.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// field '{type_name}.{field}' is declared by services {services} without exactly one of them owning it
    AmbiguousFieldOwnership {
        type_name: String,
        field: String,
        /// Comma separated names of the declaring services.
        services: String,
    },

    /// type '{0}' has no field served by any service
    TypeWithoutService(String),

    /// field '{type_name}.{field}' is declared as '{first}' and as '{second}'
    ConflictingFieldType {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// union '{0}' is declared with different member sets
    ConflictingUnion(String),

    /// union '{union_name}' lists '{member}', which is not an object type
    UnknownUnionMember { union_name: String, member: String },

    /// field '{type_name}.{field}' has type '{field_type}', which is neither declared by a service nor a built-in scalar
    UnknownFieldType {
        type_name: String,
        field: String,
        field_type: String,
    },

    /// service '{0}' is registered twice
    DuplicateService(String),

    /// service '{service}' declares the reserved name '{name}'
    ReservedFieldName { service: String, name: String },
}

impl ErrorExtension for RegistryError {
    fn extension_code(&self) -> String {
        match self {
            RegistryError::AmbiguousFieldOwnership { .. } => "AMBIGUOUS_FIELD_OWNERSHIP",
            RegistryError::TypeWithoutService(_) => "TYPE_WITHOUT_SERVICE",
            RegistryError::ConflictingFieldType { .. } => "CONFLICTING_FIELD_TYPE",
            RegistryError::ConflictingUnion(_) => "CONFLICTING_UNION",
            RegistryError::UnknownUnionMember { .. } => "UNKNOWN_UNION_MEMBER",
            RegistryError::UnknownFieldType { .. } => "UNKNOWN_FIELD_TYPE",
            RegistryError::DuplicateService(_) => "DUPLICATE_SERVICE",
            RegistryError::ReservedFieldName { .. } => "RESERVED_FIELD_NAME",
        }
        .to_string()
    }
}

/// Registry lookup failures.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum RegistryLookupError {
    /// field '{type_name}.{field}' is not served by any service
    NotFound { type_name: String, field: String },
}

/// Errors raised while planning a query.
///
/// Each variant carries the response path where planning failed.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlanningError {
    /// unknown type '{type_name}' at '{path}'
    UnknownType { type_name: String, path: Path },

    /// cannot query field '{field}' on type '{type_name}' at '{path}'
    UnknownField {
        type_name: String,
        field: String,
        path: Path,
    },

    /// field '{field}' is reserved and cannot be selected (at '{path}')
    ReservedField { field: String, path: Path },

    /// service '{service}' cannot resolve '{type_name}' from a key (needed at '{path}')
    MissingKeyResolver {
        type_name: String,
        service: String,
        path: Path,
    },

    /// service '{service}' cannot extract a key for '{type_name}' (needed at '{path}')
    MissingKeyExtractor {
        type_name: String,
        service: String,
        path: Path,
    },

    /// invalid selection of '{field}' at '{path}': {reason}
    InvalidSelection {
        field: String,
        reason: String,
        path: Path,
    },

    /// fragment on '{fragment}' cannot apply to '{type_name}' at '{path}'
    InvalidFragment {
        fragment: String,
        type_name: String,
        path: Path,
    },

    /// response key '{alias}' is selected more than once at '{path}'
    DuplicateAlias { alias: String, path: Path },
}

impl PlanningError {
    pub fn path(&self) -> &Path {
        match self {
            PlanningError::UnknownType { path, .. }
            | PlanningError::UnknownField { path, .. }
            | PlanningError::ReservedField { path, .. }
            | PlanningError::MissingKeyResolver { path, .. }
            | PlanningError::MissingKeyExtractor { path, .. }
            | PlanningError::InvalidSelection { path, .. }
            | PlanningError::InvalidFragment { path, .. }
            | PlanningError::DuplicateAlias { path, .. } => path,
        }
    }

    /// Convert the planning error to a GraphQL error.
    pub fn to_graphql_error(&self) -> Error {
        let builder = Error::builder()
            .message(self.to_string())
            .path(self.path().clone())
            .extension_code(self.extension_code());
        match self {
            PlanningError::MissingKeyResolver { service, .. }
            | PlanningError::MissingKeyExtractor { service, .. } => {
                builder.extension("service", service.as_str()).build()
            }
            _ => builder.build(),
        }
    }
}

impl ErrorExtension for PlanningError {
    fn extension_code(&self) -> String {
        match self {
            PlanningError::UnknownType { .. } => "UNKNOWN_TYPE",
            PlanningError::UnknownField { .. } => "UNKNOWN_FIELD",
            PlanningError::ReservedField { .. } => "RESERVED_FIELD",
            PlanningError::MissingKeyResolver { .. } => "MISSING_KEY_RESOLVER",
            PlanningError::MissingKeyExtractor { .. } => "MISSING_KEY_EXTRACTOR",
            PlanningError::InvalidSelection { .. } => "INVALID_SELECTION",
            PlanningError::InvalidFragment { .. } => "INVALID_FRAGMENT",
            PlanningError::DuplicateAlias { .. } => "DUPLICATE_ALIAS",
        }
        .to_string()
    }
}

/// Error types for execution.
///
/// Each variant carries the response path where the failure happened and the service it
/// started at. Cancellation and timeouts belong to the whole request and carry no service.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FetchError {
    /// service '{service}' failed at '{path}': {reason}
    SubrequestError {
        service: String,
        path: Path,
        reason: String,
    },

    /// no subgraph is registered for service '{service}' (needed at '{path}')
    UnknownService { service: String, path: Path },

    /// service '{service}' response was malformed at '{path}': {reason}
    MalformedResponse {
        service: String,
        path: Path,
        reason: String,
    },

    /// instance of '{type_name}' from service '{service}' at '{path}' has no stitching key
    MissingKey {
        service: String,
        type_name: String,
        path: Path,
    },

    /// service '{service}' returned {actual} '{type_name}' entities for {expected} keys at '{path}'
    EntityCountMismatch {
        service: String,
        type_name: String,
        path: Path,
        expected: usize,
        actual: usize,
    },

    /// value of union '{union_name}' from service '{service}' at '{path}' cannot be discriminated: {reason}
    UnionDiscrimination {
        service: String,
        union_name: String,
        path: Path,
        reason: String,
    },

    /// request was cancelled (at '{path}')
    Cancelled { path: Path },

    /// request deadline exceeded (at '{path}')
    Timeout { path: Path },
}

impl FetchError {
    pub fn path(&self) -> &Path {
        match self {
            FetchError::SubrequestError { path, .. }
            | FetchError::UnknownService { path, .. }
            | FetchError::MalformedResponse { path, .. }
            | FetchError::MissingKey { path, .. }
            | FetchError::EntityCountMismatch { path, .. }
            | FetchError::UnionDiscrimination { path, .. }
            | FetchError::Cancelled { path }
            | FetchError::Timeout { path } => path,
        }
    }

    pub fn service(&self) -> Option<&str> {
        match self {
            FetchError::SubrequestError { service, .. }
            | FetchError::UnknownService { service, .. }
            | FetchError::MalformedResponse { service, .. }
            | FetchError::MissingKey { service, .. }
            | FetchError::EntityCountMismatch { service, .. }
            | FetchError::UnionDiscrimination { service, .. } => Some(service),
            FetchError::Cancelled { .. } | FetchError::Timeout { .. } => None,
        }
    }

    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self) -> Error {
        let builder = Error::builder()
            .message(self.to_string())
            .path(self.path().clone())
            .extension_code(self.extension_code());
        // Following https://www.apollographql.com/docs/apollo-server/data/errors/#including-custom-error-details
        match self.service() {
            Some(service) => builder.extension("service", service).build(),
            None => builder.build(),
        }
    }

    /// Convert the error to an appropriate response.
    pub fn to_response(&self) -> Response {
        Response::from_error(self.to_graphql_error())
    }
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::SubrequestError { .. } => "SUBREQUEST_ERROR",
            FetchError::UnknownService { .. } => "UNKNOWN_SERVICE",
            FetchError::MalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::MissingKey { .. } => "MISSING_KEY",
            FetchError::EntityCountMismatch { .. } => "ENTITY_COUNT_MISMATCH",
            FetchError::UnionDiscrimination { .. } => "UNION_DISCRIMINATION",
            FetchError::Cancelled { .. } => "REQUEST_CANCELLED",
            FetchError::Timeout { .. } => "REQUEST_TIMEOUT",
        }
        .to_string()
    }
}

/// Everything that can go wrong between receiving query text and returning data.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// {0}
    Registry(#[from] RegistryError),
    /// {0}
    Configuration(#[from] ConfigurationError),
    /// {0}
    Spec(#[from] SpecError),
    /// {0}
    Planning(#[from] PlanningError),
    /// {0}
    Fetch(#[from] FetchError),
}

impl GatewayError {
    /// Convert the error to a GraphQL error.
    pub fn to_graphql_error(&self) -> Error {
        match self {
            GatewayError::Planning(err) => err.to_graphql_error(),
            GatewayError::Fetch(err) => err.to_graphql_error(),
            GatewayError::Spec(err) => Error::builder()
                .message(err.to_string())
                .extension_code(err.extension_code())
                .build(),
            GatewayError::Registry(err) => Error::builder()
                .message(err.to_string())
                .extension_code(err.extension_code())
                .build(),
            GatewayError::Configuration(err) => Error::builder()
                .message(err.to_string())
                .extension_code("INVALID_CONFIGURATION")
                .build(),
        }
    }

    /// Convert the error to an appropriate response.
    pub fn to_response(&self) -> Response {
        Response::from_error(self.to_graphql_error())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn fetch_error_to_graphql_error() {
        let error = FetchError::SubrequestError {
            service: "accounts".to_string(),
            path: Path::from("users/@/friends"),
            reason: "connection refused".to_string(),
        };
        let graphql_error = error.to_graphql_error();
        assert_eq!(
            graphql_error.message,
            "service 'accounts' failed at 'users/@/friends': connection refused"
        );
        assert_eq!(graphql_error.path, Some(Path::from("users/@/friends")));
        assert_eq!(
            serde_json_bytes::Value::Object(graphql_error.extensions),
            json!({"code": "SUBREQUEST_ERROR", "service": "accounts"})
        );
    }

    #[test]
    fn planning_error_to_graphql_error() {
        let error = PlanningError::MissingKeyResolver {
            type_name: "Foo".to_string(),
            service: "schema2".to_string(),
            path: Path::from("s1f"),
        };
        let graphql_error = error.to_graphql_error();
        assert_eq!(graphql_error.extension_code().as_deref(), Some("MISSING_KEY_RESOLVER"));
        assert_eq!(
            graphql_error.extensions.get("service"),
            Some(&json!("schema2"))
        );
    }

    #[test]
    fn stitching_errors_name_their_service() {
        let error = FetchError::MissingKey {
            service: "schema1".to_string(),
            type_name: "Foo".to_string(),
            path: Path::from("s1fff/0"),
        };
        assert_eq!(
            error.to_string(),
            "instance of 'Foo' from service 'schema1' at 's1fff/0' has no stitching key"
        );
        assert_eq!(
            error.to_graphql_error().extensions.get("service"),
            Some(&json!("schema1"))
        );

        let error = FetchError::UnionDiscrimination {
            service: "schema1".to_string(),
            union_name: "FooOrBar".to_string(),
            path: Path::from("s1both/0"),
            reason: "no member payload".to_string(),
        };
        assert_eq!(error.service(), Some("schema1"));
    }

    #[test]
    fn errors_without_service() {
        let error = FetchError::Timeout {
            path: Path::from("a"),
        };
        assert_eq!(error.service(), None);
        let response = error.to_response();
        assert_eq!(response.data, None);
        assert_eq!(
            response.errors[0].extension_code().as_deref(),
            Some("REQUEST_TIMEOUT")
        );
        assert!(!response.errors[0].extensions.contains_key("service"));
    }

    #[test]
    fn gateway_error_wraps_spec_errors() {
        let error: GatewayError = SpecError::NoOperation.into();
        let graphql_error = error.to_graphql_error();
        assert_eq!(graphql_error.message, "the document holds no operation");
        assert_eq!(graphql_error.path, None);
    }
}
