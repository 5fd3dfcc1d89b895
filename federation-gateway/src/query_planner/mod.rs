//! Query planning, execution and result shaping.

use serde::Serialize;

pub use self::execution::ExecutionParameters;
pub use self::planner::QueryPlanner;
use crate::json_ext::Path;
use crate::spec::SelectionSet;

mod execution;
pub(crate) mod fetch;
pub mod merge;
mod planner;

pub(crate) const EXECUTE_SPAN_NAME: &str = "execute";
pub(crate) const FETCH_SPAN_NAME: &str = "fetch";
pub(crate) const ENTITY_FETCH_SPAN_NAME: &str = "entity_fetch";
pub(crate) const FLATTEN_SPAN_NAME: &str = "flatten";

/// A plan for a given query: one root node per service owning root fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub root_type: String,
    pub nodes: Vec<PlanNode>,
    /// The query as the client wrote it, used to shape the response.
    pub query: SelectionSet,
}

/// Work done by one service: a selection on instances of one type, and the nodes continuing
/// from objects inside its results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub service: String,
    pub type_name: String,
    /// The local selection, stitching keys included.
    pub selection_set: SelectionSet,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildPlan>,
}

/// A node continuing from the objects found at `path` in its parent's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildPlan {
    /// Relative to the parent node's root objects.
    pub path: Path,
    pub node: PlanNode,
}

impl QueryPlan {
    /// Number of service calls this plan makes, assuming every child finds instances.
    pub fn subgraph_fetches(&self) -> usize {
        self.nodes.iter().map(PlanNode::subgraph_fetches).sum()
    }

    pub fn services(&self) -> Vec<&str> {
        let mut services = Vec::new();
        for node in &self.nodes {
            node.collect_services(&mut services);
        }
        services
    }
}

impl PlanNode {
    pub fn subgraph_fetches(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| child.node.subgraph_fetches())
            .sum::<usize>()
    }

    fn collect_services<'a>(&'a self, services: &mut Vec<&'a str>) {
        if !services.contains(&self.service.as_str()) {
            services.push(&self.service);
        }
        for child in &self.children {
            child.node.collect_services(services);
        }
    }
}

// The code resides in a separate submodule to allow writing a log filter activating it
// separately from the query planner logs, as follows:
// `RUST_LOG=info,federation_gateway::query_planner::log=trace`
mod log {
    use crate::query_planner::QueryPlan;
    use crate::spec::SelectionSet;

    pub(crate) fn trace_query_plan(plan: &QueryPlan) {
        tracing::trace!("query plan\n{:#?}", plan.nodes);
    }

    pub(crate) fn trace_subfetch(service_name: &str, selection_set: &SelectionSet, keys: usize) {
        tracing::trace!(
            "subgraph fetch to {}: {} keys, selection = {}",
            service_name,
            keys,
            serde_json::to_string(selection_set).unwrap_or_default()
        );
    }
}
