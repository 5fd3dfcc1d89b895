use futures::future;
use futures::future::BoxFuture;
use tracing::Instrument;

use super::log;
use super::PlanNode;
use super::QueryPlan;
use super::FETCH_SPAN_NAME;
use super::FLATTEN_SPAN_NAME;
use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::registry::KEY_FIELD;
use crate::services::Subgraphs;
use crate::Context;

impl QueryPlan {
    /// Execute the plan and return the raw stitched data, before response shaping.
    ///
    /// Root nodes run concurrently. The first error cancels every call still in flight.
    pub async fn execute(&self, parameters: &ExecutionParameters<'_>) -> Result<Value, FetchError> {
        log::trace_query_plan(self);
        let scope = parameters.context.request_scope();
        let parameters = ExecutionParameters {
            context: &scope,
            subgraphs: parameters.subgraphs,
        };

        let results = future::try_join_all(self.nodes.iter().map(|node| {
            let fetch_time_offset = scope.created_at.elapsed().as_nanos() as i64;
            node.execute_root(&parameters).instrument(tracing::info_span!(
                FETCH_SPAN_NAME,
                "otel.kind" = "INTERNAL",
                "subgraph.name" = node.service.as_str(),
                "sent_time_offset" = fetch_time_offset
            ))
        }))
        .await;

        match results {
            Ok(values) => {
                let mut data = Value::Object(Object::new());
                for value in values {
                    data.deep_merge(value);
                }
                Ok(data)
            }
            Err(err) => {
                scope.cancel();
                failfast_error!("Fetch error: {}", err);
                Err(err)
            }
        }
    }
}

/// Holds the plan execution arguments that do not change between calls.
pub struct ExecutionParameters<'a> {
    pub context: &'a Context,
    pub subgraphs: &'a Subgraphs,
}

impl PlanNode {
    async fn execute_root(&self, parameters: &ExecutionParameters<'_>) -> Result<Value, FetchError> {
        let root = self.fetch_root(parameters).await?;
        let mut resolved = self
            .resolve_children(parameters, vec![root], Path::empty())
            .await?;
        Ok(resolved.pop().unwrap_or_default())
    }

    /// Runs every child plan against `instances`, the root objects of this node, and splices
    /// the fetched entities back in.
    ///
    /// `origin` is the absolute location of the root objects. Children run concurrently; the
    /// results are spliced in plan order.
    pub(super) fn resolve_children<'a>(
        &'a self,
        parameters: &'a ExecutionParameters<'a>,
        mut instances: Vec<Value>,
        origin: Path,
    ) -> BoxFuture<'a, Result<Vec<Value>, FetchError>> {
        Box::pin(async move {
            if self.children.is_empty() {
                return Ok(instances);
            }

            let mut fetches = Vec::with_capacity(self.children.len());
            for child in &self.children {
                let mut targets = Vec::new();
                let mut keys = Vec::new();
                for (index, instance) in instances.iter().enumerate() {
                    let mut missing = None;
                    instance.select_values_and_paths(&child.path, |path, value| {
                        match value.as_object().and_then(|object| object.get(KEY_FIELD)) {
                            Some(key) if !key.is_null() => {
                                targets.push((index, path.clone()));
                                keys.push(key.clone());
                            }
                            _ => {
                                missing.get_or_insert_with(|| path.clone());
                            }
                        }
                    });
                    if let Some(path) = missing {
                        return Err(FetchError::MissingKey {
                            service: self.service.clone(),
                            type_name: child.node.type_name.clone(),
                            path: origin.join(path),
                        });
                    }
                }
                fetches.push((child, origin.join(&child.path), targets, keys));
            }

            let results = future::try_join_all(fetches.into_iter().map(
                |(child, path, targets, keys)| async move {
                    if keys.is_empty() {
                        tracing::trace!("no instances at '{}', skipping fetch", path);
                        return Ok::<_, FetchError>((targets, Vec::new()));
                    }
                    let entities = child
                        .node
                        .fetch_entities(parameters, keys, &path)
                        .await?;
                    let entities = child
                        .node
                        .resolve_children(parameters, entities, path.clone())
                        .await?;
                    Ok((targets, entities))
                }
                .instrument(tracing::info_span!(
                    FLATTEN_SPAN_NAME,
                    "otel.kind" = "INTERNAL",
                    "graphql.path" = %origin.join(&child.path),
                )),
            ))
            .await?;

            for (targets, entities) in results {
                for ((index, path), entity) in targets.into_iter().zip(entities) {
                    if entity.is_null() {
                        continue;
                    }
                    if let Some(target) = instances
                        .get_mut(index)
                        .and_then(|instance| instance.get_path_mut(&path))
                    {
                        target.deep_merge(entity);
                    }
                }
            }
            Ok(instances)
        })
    }
}
