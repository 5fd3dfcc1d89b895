//! The gateway facade: plans queries against the registry and executes them on subgraphs.

use std::collections::HashMap;
use std::sync::Arc;

use derivative::Derivative;
use tracing::Instrument;

use crate::configuration::Configuration;
use crate::error::FetchError;
use crate::error::GatewayError;
use crate::error::PlanningError;
use crate::graphql;
use crate::json_ext::Value;
use crate::query_planner::merge;
use crate::query_planner::ExecutionParameters;
use crate::query_planner::QueryPlan;
use crate::query_planner::QueryPlanner;
use crate::query_planner::EXECUTE_SPAN_NAME;
use crate::registry::SchemaRegistry;
use crate::registry::ServiceCapabilities;
use crate::services::Subgraph;
use crate::services::Subgraphs;
use crate::spec::Query;
use crate::spec::SelectionSet;
use crate::spec::SpecError;
use crate::Context;

/// Serves queries spanning several services.
///
/// ```ignore
/// let gateway = Gateway::builder()
///     .services(vec![accounts.capabilities("accounts"), reviews.capabilities("reviews")])
///     .subgraphs(subgraphs)
///     .build()?;
/// let response = gateway.execute_request(request, &Context::new()).await;
/// ```
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Gateway {
    registry: Arc<SchemaRegistry>,
    #[derivative(Debug = "ignore")]
    subgraphs: Arc<Subgraphs>,
    configuration: Arc<Configuration>,
}

#[buildstructor::buildstructor]
impl Gateway {
    /// Build the registry from the services' capabilities.
    ///
    /// Fails if the capabilities do not compose.
    #[builder(visibility = "pub")]
    fn new(
        services: Vec<ServiceCapabilities>,
        subgraphs: HashMap<String, Arc<dyn Subgraph>>,
        configuration: Option<Configuration>,
    ) -> Result<Self, GatewayError> {
        let registry = SchemaRegistry::new(services)?;
        for service in registry.services() {
            if !subgraphs.contains_key(service) {
                tracing::warn!("service '{}' has no subgraph, its fields will fail", service);
            }
        }
        for name in subgraphs.keys() {
            if !registry.services().any(|service| service == name) {
                tracing::warn!("subgraph '{}' declared no capabilities and is never called", name);
            }
        }
        Ok(Gateway {
            registry: Arc::new(registry),
            subgraphs: Arc::new(subgraphs),
            configuration: Arc::new(configuration.unwrap_or_default()),
        })
    }
}

impl Gateway {
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Plan a query on the root type.
    pub fn plan(&self, selection_set: &SelectionSet) -> Result<QueryPlan, PlanningError> {
        QueryPlanner::new(&self.registry).plan(selection_set)
    }

    /// Execute a plan and shape the result along the plan's query.
    ///
    /// The configured timeout, if any, is applied on top of the context's own deadline.
    pub async fn execute(&self, plan: &QueryPlan, context: &Context) -> Result<Value, FetchError> {
        let context = match self.configuration.timeout {
            Some(timeout) => context.clone().with_timeout(timeout),
            None => context.clone(),
        };
        let parameters = ExecutionParameters {
            context: &context,
            subgraphs: &self.subgraphs,
        };
        let raw = plan
            .execute(&parameters)
            .instrument(tracing::info_span!(
                EXECUTE_SPAN_NAME,
                "otel.kind" = "INTERNAL",
                "fetches" = plan.subgraph_fetches()
            ))
            .await?;
        merge::format_response(plan, &raw, &self.registry, &self.configuration)
    }

    /// Plan and execute a query.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn query(
        &self,
        selection_set: &SelectionSet,
        context: &Context,
    ) -> Result<Value, GatewayError> {
        let plan = self.plan(selection_set)?;
        Ok(self.execute(&plan, context).await?)
    }

    /// Parse, plan and execute a GraphQL request.
    ///
    /// Every failure is reported in the response's errors, without data.
    #[tracing::instrument(skip_all, level = "debug", fields(operation_name = ?request.operation_name))]
    pub async fn execute_request(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> graphql::Response {
        match self.run_request(request, context).await {
            Ok(data) => graphql::Response::from_data(data),
            Err(err) => {
                tracing::debug!("request failed: {}", err);
                err.to_response()
            }
        }
    }

    async fn run_request(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<Value, GatewayError> {
        let query = request.query.as_deref().ok_or(SpecError::NoOperation)?;
        let query = Query::parse(
            query,
            request.operation_name.as_deref(),
            &request.variables,
        )?;
        self.query(&query.selection_set, context).await
    }
}
