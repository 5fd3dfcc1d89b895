#![allow(dead_code)]

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use federation_gateway::json_ext::Value;
use federation_gateway::registry::ENTITIES_FIELD;
use federation_gateway::services::local::LocalSchema;
use federation_gateway::services::local::LocalSubgraph;
use federation_gateway::services::local::SchemaBuilder;
use federation_gateway::services::local::UnionMember;
use federation_gateway::services::Subgraph;
use federation_gateway::services::SubgraphRequest;
use federation_gateway::services::TowerSubgraph;
use federation_gateway::Configuration;
use federation_gateway::Gateway;
use serde_json_bytes::json;
use tower::BoxError;

pub const KITCHEN_SINK_QUERY: &str = r#"{
    s1fff {
        a: s1nest { b: s1nest { c: s1nest { s2ok } } }
        s1hmm
        s2ok
        s2bar { id s1baz }
        s1nest { name }
        s2nest { name }
    }
    s1both {
        ... on Foo {
            name
            s1hmm
            s2ok
            a: s1nest { b: s1nest { c: s1nest { s2ok } } }
        }
        ... on Bar { id s1baz }
    }
    s2root
}"#;

pub fn kitchen_sink_response() -> Value {
    json!({
        "s1fff": [
            {
                "a": {"b": {"c": {"__federation": "jimbo", "s2ok": 5}}},
                "s1hmm": "jimbo!!!",
                "s2ok": 5,
                "s2bar": {"id": 14, "__federation": 14, "s1baz": "14"},
                "s1nest": {"name": "jimbo"},
                "s2nest": {"name": "jimbo"},
                "__federation": "jimbo"
            },
            {
                "a": {"b": {"c": {"__federation": "bob", "s2ok": 3}}},
                "s1hmm": "bob!!!",
                "s2ok": 3,
                "s2bar": {"id": 10, "__federation": 10, "s1baz": "10"},
                "s1nest": {"name": "bob"},
                "s2nest": {"name": "bob"},
                "__federation": "bob"
            }
        ],
        "s1both": [
            {
                "__typename": "Foo",
                "__federation": "this is the foo",
                "name": "this is the foo",
                "s1hmm": "this is the foo!!!",
                "a": {"b": {"c": {"__federation": "this is the foo", "s2ok": 15}}},
                "s2ok": 15
            },
            {"__typename": "Bar", "id": 1234, "s1baz": "1234"}
        ],
        "s2root": "hello"
    })
}

fn name_len(foo: &Value) -> i64 {
    foo["name"]
        .as_str()
        .map(|name| name.len() as i64)
        .unwrap_or_default()
}

pub fn schema1() -> LocalSchema {
    let mut schema = SchemaBuilder::new();
    schema
        .query()
        .field("s1f", "Foo", |_, _| Ok(json!({"name": "jimbob"}).into()))
        .field("s1fff", "[Foo]", |_, _| {
            Ok(json!([{"name": "jimbo"}, {"name": "bob"}]).into())
        })
        .field("s1both", "[FooOrBar]", |_, _| {
            Ok(vec![
                UnionMember::new("Foo", json!({"name": "this is the foo"})),
                UnionMember::new("Bar", json!({"id": 1234})),
            ]
            .into())
        });
    schema
        .object("Foo")
        .property("name", "String!")
        .batch_field("s1hmm", "String", |foos, _| {
            Ok(foos
                .iter()
                .map(|foo| json!(format!("{}!!!", foo["name"].as_str().unwrap_or_default())).into())
                .collect())
        })
        .field("s1nest", "Foo", |foo, _| Ok(foo.clone().into()))
        .key(|foo| Ok(foo["name"].clone()));
    schema
        .object("Bar")
        .property("id", "Int!")
        .shareable("id")
        .field("s1baz", "String", |bar, _| Ok(json!(bar["id"].to_string()).into()))
        .entity_resolver(|ids| Ok(ids.into_iter().map(|id| json!({ "id": id })).collect()));
    schema.union("FooOrBar", ["Foo", "Bar"]);
    schema.build().expect("schema1 is valid")
}

pub fn schema2() -> LocalSchema {
    let mut schema = SchemaBuilder::new();
    schema
        .query()
        .field("s2root", "String", |_, _| Ok(json!("hello").into()));
    schema
        .object("Foo")
        .property("name", "String!")
        .shareable("name")
        .field("s2ok", "Int", |foo, _| Ok(json!(name_len(foo)).into()))
        .field("s2bar", "Bar", |foo, _| {
            Ok(json!({"id": name_len(foo) * 2 + 4}).into())
        })
        .field("s2nest", "Foo", |foo, _| Ok(foo.clone().into()))
        .key(|foo| Ok(foo["name"].clone()))
        .entity_resolver(|names| {
            Ok(names
                .into_iter()
                .map(|name| json!({ "name": name }))
                .collect())
        });
    schema
        .object("Bar")
        .property("id", "Int!")
        .key(|bar| Ok(bar["id"].clone()));
    schema.build().expect("schema2 is valid")
}

/// A subgraph answering every request with the same data.
pub fn canned(response: Value) -> Arc<dyn Subgraph> {
    Arc::new(TowerSubgraph::new(tower::service_fn(
        move |_request: SubgraphRequest| {
            let response = response.clone();
            async move { Ok::<_, BoxError>(response) }
        },
    )))
}

/// A subgraph failing every request.
pub fn failing(message: &'static str) -> Arc<dyn Subgraph> {
    Arc::new(TowerSubgraph::new(tower::service_fn(
        move |_request: SubgraphRequest| async move { Err::<Value, BoxError>(message.into()) },
    )))
}

/// Calls and entity keys seen by every subgraph.
#[derive(Clone, Debug, Default)]
pub struct Counters {
    calls: Arc<Mutex<HashMap<String, usize>>>,
    keys: Arc<Mutex<Vec<(String, usize)>>>,
}

impl Counters {
    pub fn totals(&self) -> HashMap<String, usize> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Number of keys of every entity call, in call order.
    pub fn entity_keys(&self) -> Vec<(String, usize)> {
        self.keys.lock().unwrap().clone()
    }

    fn record(&self, request: &SubgraphRequest) {
        match self
            .calls
            .lock()
            .unwrap()
            .entry(request.service_name.clone())
        {
            Entry::Occupied(mut e) => {
                *e.get_mut() += 1;
            }
            Entry::Vacant(e) => {
                e.insert(1);
            }
        }
        let mut keys = self.keys.lock().unwrap();
        for selection in &request.selection_set {
            if selection.name != ENTITIES_FIELD {
                continue;
            }
            for entity in selection.selection_set.iter().flatten() {
                let count = entity
                    .arguments
                    .get("keys")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or_default();
                keys.push((request.service_name.clone(), count));
            }
        }
    }
}

struct CountingSubgraph {
    counters: Counters,
    delay: Option<Duration>,
    delegate: Arc<dyn Subgraph>,
}

#[async_trait]
impl Subgraph for CountingSubgraph {
    async fn execute(&self, request: SubgraphRequest) -> Result<Value, BoxError> {
        self.counters.record(&request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.delegate.execute(request).await
    }
}

pub struct Fixture {
    pub gateway: Gateway,
    pub counters: Counters,
}

/// The two kitchen sink services behind a gateway.
///
/// Capabilities always come from the local schemas; `overrides` replace the subgraph serving
/// a service, and `delays` hold a service's answers back.
#[derive(Default)]
pub struct FixtureBuilder {
    configuration: Configuration,
    delays: HashMap<String, Duration>,
    overrides: HashMap<String, Arc<dyn Subgraph>>,
}

impl FixtureBuilder {
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn delay(mut self, service: &str, delay: Duration) -> Self {
        self.delays.insert(service.to_string(), delay);
        self
    }

    pub fn subgraph(mut self, service: &str, subgraph: Arc<dyn Subgraph>) -> Self {
        self.overrides.insert(service.to_string(), subgraph);
        self
    }

    pub fn build(mut self) -> Fixture {
        let counters = Counters::default();
        let mut services = Vec::new();
        let mut subgraphs: HashMap<String, Arc<dyn Subgraph>> = HashMap::new();
        for (name, schema) in [("schema1", schema1()), ("schema2", schema2())] {
            services.push(schema.capabilities(name));
            let delegate = self
                .overrides
                .remove(name)
                .unwrap_or_else(|| Arc::new(LocalSubgraph::new(schema)) as Arc<dyn Subgraph>);
            subgraphs.insert(
                name.to_string(),
                Arc::new(CountingSubgraph {
                    counters: counters.clone(),
                    delay: self.delays.get(name).copied(),
                    delegate,
                }),
            );
        }
        let gateway = Gateway::builder()
            .services(services)
            .subgraphs(subgraphs)
            .configuration(self.configuration)
            .build()
            .expect("kitchen sink services compose");
        Fixture { gateway, counters }
    }
}

pub fn kitchen_sink() -> Fixture {
    FixtureBuilder::default().build()
}
