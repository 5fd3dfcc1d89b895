use tracing::Instrument;

use super::execution::ExecutionParameters;
use super::log;
use super::PlanNode;
use super::ENTITY_FETCH_SPAN_NAME;
use crate::error::FetchError;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::registry::ENTITIES_FIELD;
use crate::services::SubgraphRequest;
use crate::spec::Selection;
use crate::spec::SelectionSet;

impl PlanNode {
    /// Runs the node's selection on its service's root type.
    pub(crate) async fn fetch_root(
        &self,
        parameters: &ExecutionParameters<'_>,
    ) -> Result<Value, FetchError> {
        let path = Path::empty();
        let response = call(parameters, &self.service, self.selection_set.clone(), &path, 0).await?;
        match response {
            Value::Object(_) => Ok(response),
            other => Err(FetchError::MalformedResponse {
                service: self.service.clone(),
                path,
                reason: format!("expected an object, got {}", kind(&other)),
            }),
        }
    }

    /// Resolves one instance per key through the service's entity entry point.
    ///
    /// All keys go in a single call; equal keys are sent as many times as they appear.
    pub(crate) async fn fetch_entities(
        &self,
        parameters: &ExecutionParameters<'_>,
        keys: Vec<Value>,
        path: &Path,
    ) -> Result<Vec<Value>, FetchError> {
        let expected = keys.len();
        let selection_set = vec![
            Selection::field(ENTITIES_FIELD).with_selection_set(vec![
                Selection::field(self.type_name.as_str())
                    .with_argument("keys", Value::Array(keys))
                    .with_selection_set(self.selection_set.clone()),
            ]),
        ];

        let mut response = call(parameters, &self.service, selection_set, path, expected)
            .instrument(tracing::info_span!(
                ENTITY_FETCH_SPAN_NAME,
                "otel.kind" = "INTERNAL",
                "subgraph.name" = self.service.as_str(),
                "graphql.path" = %path,
                "entity.type" = self.type_name.as_str(),
                "entity.count" = expected,
            ))
            .await?;

        let location = Path(vec![
            PathElement::Key(ENTITIES_FIELD.to_string()),
            PathElement::Key(self.type_name.clone()),
        ]);
        let entities = match response.get_path_mut(&location).map(Value::take) {
            Some(Value::Array(entities)) => entities,
            Some(other) => {
                return Err(FetchError::MalformedResponse {
                    service: self.service.clone(),
                    path: path.clone(),
                    reason: format!("expected a list of entities, got {}", kind(&other)),
                });
            }
            None => {
                return Err(FetchError::MalformedResponse {
                    service: self.service.clone(),
                    path: path.clone(),
                    reason: format!("missing '{location}' in response"),
                });
            }
        };

        if entities.len() != expected {
            return Err(FetchError::EntityCountMismatch {
                service: self.service.clone(),
                type_name: self.type_name.clone(),
                path: path.clone(),
                expected,
                actual: entities.len(),
            });
        }
        Ok(entities)
    }
}

/// One subgraph call, raced against the request's cancellation and deadline.
async fn call(
    parameters: &ExecutionParameters<'_>,
    service: &str,
    selection_set: SelectionSet,
    path: &Path,
    keys: usize,
) -> Result<Value, FetchError> {
    let subgraph = parameters
        .subgraphs
        .get(service)
        .ok_or_else(|| FetchError::UnknownService {
            service: service.to_string(),
            path: path.clone(),
        })?;
    let context = parameters.context;
    log::trace_subfetch(service, &selection_set, keys);

    let request = SubgraphRequest {
        context: context.clone(),
        service_name: service.to_string(),
        selection_set,
    };
    let token = context.cancellation_token();
    let fetch = async {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Cancelled { path: path.clone() }),
            result = subgraph.execute(request) => result.map_err(|err| FetchError::SubrequestError {
                service: service.to_string(),
                path: path.clone(),
                reason: err.to_string(),
            }),
        }
    };

    match context.deadline() {
        Some(deadline) => tokio::time::timeout_at(deadline, fetch)
            .await
            .map_err(|_| FetchError::Timeout { path: path.clone() })?,
        None => fetch.await,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
