use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use super::Subgraph;
use super::SubgraphRequest;
use crate::json_ext::Value;

/// Exposes a [`tower::Service`] as a [`Subgraph`], so transports can be layered with tower
/// middleware (timeouts, retries, rate limits).
#[derive(Clone, Debug)]
pub struct TowerSubgraph<S> {
    service: S,
}

impl<S> TowerSubgraph<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> Subgraph for TowerSubgraph<S>
where
    S: Service<SubgraphRequest, Response = Value> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    async fn execute(&self, request: SubgraphRequest) -> Result<Value, BoxError> {
        self.service
            .clone()
            .oneshot(request)
            .await
            .map_err(Into::into)
    }
}

/// Exposes a [`Subgraph`] as a [`tower::Service`].
pub struct SubgraphService {
    subgraph: Arc<dyn Subgraph>,
}

impl Clone for SubgraphService {
    fn clone(&self) -> Self {
        Self {
            subgraph: self.subgraph.clone(),
        }
    }
}

impl SubgraphService {
    pub fn new(subgraph: Arc<dyn Subgraph>) -> Self {
        Self { subgraph }
    }
}

impl Service<SubgraphRequest> for SubgraphService {
    type Response = Value;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SubgraphRequest) -> Self::Future {
        let subgraph = self.subgraph.clone();
        Box::pin(async move { subgraph.execute(request).await })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json_bytes::json;
    use tower::ServiceBuilder;

    use super::*;
    use crate::context::Context as RequestContext;
    use crate::spec::Selection;

    fn request(field: &str) -> SubgraphRequest {
        SubgraphRequest {
            context: RequestContext::new(),
            service_name: "echo".to_string(),
            selection_set: vec![Selection::field(field)],
        }
    }

    #[tokio::test]
    async fn service_fn_as_subgraph() {
        let subgraph = TowerSubgraph::new(tower::service_fn(|request: SubgraphRequest| async move {
            Ok::<_, BoxError>(json!({ "field": request.selection_set[0].name.clone() }))
        }));
        assert_eq!(
            subgraph.execute(request("hello")).await.unwrap(),
            json!({"field": "hello"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tower_layers_apply() {
        let slow = tower::service_fn(|_request: SubgraphRequest| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, BoxError>(json!({}))
        });
        let subgraph = TowerSubgraph::new(
            ServiceBuilder::new()
                .timeout(Duration::from_secs(1))
                .service(slow),
        );
        assert!(subgraph.execute(request("a")).await.is_err());
    }

    #[tokio::test]
    async fn subgraph_as_service() {
        let inner = TowerSubgraph::new(tower::service_fn(|_request: SubgraphRequest| async move {
            Ok::<_, BoxError>(json!({"ok": true}))
        }));
        let service = SubgraphService::new(Arc::new(inner));
        assert_eq!(
            service.oneshot(request("a")).await.unwrap(),
            json!({"ok": true})
        );
    }
}
