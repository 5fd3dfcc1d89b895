//! Services the executor talks to.
//!
//! Every backend service is reached through the [`Subgraph`] trait. Remote transports live
//! outside this crate; any [`tower::Service`] can be plugged in with [`TowerSubgraph`], and
//! in-process schemas are served by [`local::LocalSubgraph`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tower::BoxError;

pub use self::tower_compat::SubgraphService;
pub use self::tower_compat::TowerSubgraph;
use crate::context::Context;
use crate::json_ext::Value;
use crate::spec::SelectionSet;

pub mod local;
mod tower_compat;

/// Subgraphs by service name.
pub type Subgraphs = HashMap<String, Arc<dyn Subgraph>>;

/// One call to one service.
#[derive(Clone, Debug)]
pub struct SubgraphRequest {
    pub context: Context,
    pub service_name: String,
    /// The selection to run on the service's root type. Key based fetches select the
    /// `_federation` entry point.
    pub selection_set: SelectionSet,
}

/// A backend service.
#[async_trait]
pub trait Subgraph: Send + Sync {
    /// Run the request's selection and return the result object.
    async fn execute(&self, request: SubgraphRequest) -> Result<Value, BoxError>;
}

#[async_trait]
impl<T> Subgraph for Arc<T>
where
    T: Subgraph + ?Sized,
{
    async fn execute(&self, request: SubgraphRequest) -> Result<Value, BoxError> {
        self.as_ref().execute(request).await
    }
}
