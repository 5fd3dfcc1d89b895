//! In-process subgraphs built from typed resolver records.
//!
//! A [`LocalSchema`] answers the same wire shapes a remote service would: root selections on
//! `Query`, key based fetches through the `_federation` entry point, stitching keys for the
//! `__federation` pseudo-field and union values as `{"<Member>": {..}}`. Execution is
//! breadth-wise: a batch field resolver is called once for every instance reached at the same
//! place of the selection.

mod builder;

use std::sync::Arc;

use async_trait::async_trait;
pub use builder::ObjectBuilder;
pub use builder::SchemaBuilder;
use derivative::Derivative;
use indexmap::IndexMap;
use tower::BoxError;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::registry::FieldCapability;
use crate::registry::ObjectCapability;
use crate::registry::ServiceCapabilities;
use crate::registry::ENTITIES_FIELD;
use crate::registry::KEY_FIELD;
use crate::registry::ROOT_TYPE;
use crate::registry::TYPENAME;
use crate::services::Subgraph;
use crate::services::SubgraphRequest;
use crate::spec::FieldType;
use crate::spec::Selection;

type FieldFn = dyn Fn(&Value, &Object) -> Result<Resolved, BoxError> + Send + Sync;
type BatchFieldFn = dyn Fn(&[Value], &Object) -> Result<Vec<Resolved>, BoxError> + Send + Sync;
type KeyFn = dyn Fn(&Value) -> Result<Value, BoxError> + Send + Sync;
type EntityFn = dyn Fn(Vec<Value>) -> Result<Vec<Value>, BoxError> + Send + Sync;

/// What a resolver returns for one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// A scalar, or the data of an object instance.
    Value(Value),
    /// An instance of one member of a union.
    Union(UnionMember),
    List(Vec<Resolved>),
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

impl From<UnionMember> for Resolved {
    fn from(member: UnionMember) -> Self {
        Resolved::Union(member)
    }
}

impl<T> From<Vec<T>> for Resolved
where
    T: Into<Resolved>,
{
    fn from(items: Vec<T>) -> Self {
        Resolved::List(items.into_iter().map(Into::into).collect())
    }
}

/// A union value: exactly one member type and its instance.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionMember {
    type_name: String,
    instance: Value,
}

impl UnionMember {
    pub fn new(type_name: impl Into<String>, instance: Value) -> Self {
        UnionMember {
            type_name: type_name.into(),
            instance,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn instance(&self) -> &Value {
        &self.instance
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
enum Resolver {
    Field(#[derivative(Debug = "ignore")] Arc<FieldFn>),
    Batch(#[derivative(Debug = "ignore")] Arc<BatchFieldFn>),
    Property(String),
}

#[derive(Debug)]
struct FieldDefinition {
    ty: FieldType,
    shareable: bool,
    resolver: Resolver,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ObjectDefinition {
    fields: IndexMap<String, FieldDefinition>,
    #[derivative(Debug = "ignore")]
    key: Option<Arc<KeyFn>>,
    #[derivative(Debug = "ignore")]
    entity_resolver: Option<Arc<EntityFn>>,
}

/// A frozen set of resolver records.
#[derive(Debug)]
pub struct LocalSchema {
    objects: IndexMap<String, ObjectDefinition>,
    unions: IndexMap<String, Vec<String>>,
}

impl LocalSchema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// What this schema declares when registered as `service_name`.
    pub fn capabilities(&self, service_name: impl Into<String>) -> ServiceCapabilities {
        let mut capabilities = ServiceCapabilities::new(service_name);
        for (name, object) in &self.objects {
            let capability = ObjectCapability {
                fields: object
                    .fields
                    .iter()
                    .map(|(field_name, field)| {
                        (
                            field_name.clone(),
                            FieldCapability {
                                ty: field.ty.clone(),
                                shareable: field.shareable,
                            },
                        )
                    })
                    .collect(),
                key_extractor: object.key.is_some(),
                key_resolver: object.entity_resolver.is_some(),
            };
            capabilities = capabilities.object(name.clone(), capability);
        }
        for (name, members) in &self.unions {
            capabilities = capabilities.union(name.clone(), members.iter().cloned());
        }
        capabilities
    }

    /// Runs a selection on the root type.
    pub fn execute(&self, selection_set: &[Selection]) -> Result<Value, BoxError> {
        Executor { schema: self }.execute_root(selection_set)
    }
}

/// Serves a [`LocalSchema`] as a [`Subgraph`].
#[derive(Clone, Debug)]
pub struct LocalSubgraph {
    schema: Arc<LocalSchema>,
}

impl LocalSubgraph {
    pub fn new(schema: LocalSchema) -> Self {
        LocalSubgraph {
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &LocalSchema {
        &self.schema
    }
}

#[async_trait]
impl Subgraph for LocalSubgraph {
    #[tracing::instrument(skip_all, level = "debug", fields(service = %request.service_name))]
    async fn execute(&self, request: SubgraphRequest) -> Result<Value, BoxError> {
        self.schema.execute(&request.selection_set)
    }
}

struct Executor<'a> {
    schema: &'a LocalSchema,
}

impl Executor<'_> {
    fn object(&self, type_name: &str) -> Result<&ObjectDefinition, BoxError> {
        self.schema
            .objects
            .get(type_name)
            .ok_or_else(|| format!("unknown type '{type_name}'").into())
    }

    fn execute_root(&self, selections: &[Selection]) -> Result<Value, BoxError> {
        let (entities, fields): (Vec<Selection>, Vec<Selection>) = selections
            .iter()
            .cloned()
            .partition(|selection| selection.name == ENTITIES_FIELD);

        let mut output = Object::new();
        if !fields.is_empty() {
            let root = Value::Object(Object::new());
            let objects = self.execute_batch(ROOT_TYPE, std::slice::from_ref(&root), &fields)?;
            for (key, value) in objects.into_iter().flatten() {
                output.insert(key, value);
            }
        }
        for selection in &entities {
            output.insert(selection.alias.clone(), Value::Object(self.entities(selection)?));
        }
        Ok(Value::Object(output))
    }

    /// `_federation { <Type>(keys: [..]) { .. } }`
    fn entities(&self, selection: &Selection) -> Result<Object, BoxError> {
        let mut output = Object::new();
        for entity in selection.selection_set.iter().flatten() {
            let type_name = entity.name.as_str();
            let resolver = self
                .object(type_name)?
                .entity_resolver
                .as_ref()
                .ok_or_else(|| format!("type '{type_name}' cannot be resolved from keys"))?;
            let keys = match entity.arguments.get("keys") {
                Some(Value::Array(keys)) => keys.clone(),
                _ => return Err(format!("missing keys for '{type_name}'").into()),
            };
            let expected = keys.len();
            let instances = resolver(keys)?;
            if instances.len() != expected {
                return Err(format!(
                    "entity resolver for '{type_name}' returned {} instances for {expected} keys",
                    instances.len()
                )
                .into());
            }
            tracing::trace!("resolved {} '{}' entities", expected, type_name);
            let resolved = instances.into_iter().map(Resolved::Value).collect();
            let values = self.complete(&FieldType::named(type_name), resolved, entity)?;
            output.insert(entity.alias.clone(), Value::Array(values));
        }
        Ok(output)
    }

    /// Runs `selections` on every instance at once, returning one object per instance.
    fn execute_batch(
        &self,
        type_name: &str,
        instances: &[Value],
        selections: &[Selection],
    ) -> Result<Vec<Object>, BoxError> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        let object = self.object(type_name)?;
        let mut outputs = vec![Object::new(); instances.len()];

        for selection in selections {
            if let Some(fragment) = &selection.fragment_type {
                if fragment != type_name {
                    continue;
                }
            }
            let values = match selection.name.as_str() {
                TYPENAME => vec![Value::String(type_name.into()); instances.len()],
                KEY_FIELD => {
                    let key = object
                        .key
                        .as_ref()
                        .ok_or_else(|| format!("type '{type_name}' has no key"))?;
                    instances
                        .iter()
                        .map(|instance| key(instance))
                        .collect::<Result<Vec<_>, _>>()?
                }
                name => {
                    let field = object.fields.get(name).ok_or_else(|| {
                        format!("cannot query field '{name}' on type '{type_name}'")
                    })?;
                    let resolved = match &field.resolver {
                        Resolver::Field(resolver) => instances
                            .iter()
                            .map(|instance| resolver(instance, &selection.arguments))
                            .collect::<Result<Vec<_>, _>>()?,
                        Resolver::Batch(resolver) => {
                            let resolved = resolver(instances, &selection.arguments)?;
                            if resolved.len() != instances.len() {
                                return Err(format!(
                                    "batch resolver for '{type_name}.{name}' returned {} results for {} instances",
                                    resolved.len(),
                                    instances.len()
                                )
                                .into());
                            }
                            resolved
                        }
                        Resolver::Property(property) => instances
                            .iter()
                            .map(|instance| {
                                Resolved::Value(
                                    instance.get(property.as_str()).cloned().unwrap_or_default(),
                                )
                            })
                            .collect(),
                    };
                    self.complete(&field.ty, resolved, selection)?
                }
            };
            for (output, value) in outputs.iter_mut().zip(values) {
                output.insert(selection.alias.clone(), value);
            }
        }
        Ok(outputs)
    }

    /// Turns resolver results into wire values, running sub-selections over all results at once.
    fn complete(
        &self,
        ty: &FieldType,
        resolved: Vec<Resolved>,
        selection: &Selection,
    ) -> Result<Vec<Value>, BoxError> {
        let sub_selections = selection.selection_set.as_deref().unwrap_or_default();
        match ty {
            FieldType::List(inner) => {
                let mut lengths = Vec::with_capacity(resolved.len());
                let mut items = Vec::new();
                for result in resolved {
                    match result {
                        Resolved::List(list) => {
                            lengths.push(Some(list.len()));
                            items.extend(list);
                        }
                        Resolved::Value(Value::Array(values)) => {
                            lengths.push(Some(values.len()));
                            items.extend(values.into_iter().map(Resolved::Value));
                        }
                        Resolved::Value(Value::Null) => lengths.push(None),
                        _ => {
                            return Err(format!(
                                "field '{}' of type '{ty}' resolved to a non list value",
                                selection.name
                            )
                            .into());
                        }
                    }
                }
                let mut completed = self.complete(inner, items, selection)?.into_iter();
                Ok(lengths
                    .into_iter()
                    .map(|length| match length {
                        Some(length) => Value::Array(completed.by_ref().take(length).collect()),
                        None => Value::Null,
                    })
                    .collect())
            }
            FieldType::Named(name) if self.schema.objects.contains_key(name) => {
                let mut output = vec![Value::Null; resolved.len()];
                let mut positions = Vec::new();
                let mut instances = Vec::new();
                for (index, result) in resolved.into_iter().enumerate() {
                    match result {
                        Resolved::Value(Value::Null) => {}
                        Resolved::Value(instance) => {
                            positions.push(index);
                            instances.push(instance);
                        }
                        _ => {
                            return Err(format!(
                                "field '{}' of type '{name}' resolved to a non object value",
                                selection.name
                            )
                            .into());
                        }
                    }
                }
                let objects = self.execute_batch(name, &instances, sub_selections)?;
                for (position, object) in positions.into_iter().zip(objects) {
                    output[position] = Value::Object(object);
                }
                Ok(output)
            }
            FieldType::Named(name) if self.schema.unions.contains_key(name) => {
                let members = &self.schema.unions[name];
                let mut output = vec![Value::Null; resolved.len()];
                let mut groups: IndexMap<String, (Vec<usize>, Vec<Value>)> = IndexMap::new();
                for (index, result) in resolved.into_iter().enumerate() {
                    match result {
                        Resolved::Value(Value::Null) => {}
                        Resolved::Union(UnionMember {
                            type_name,
                            instance,
                        }) if members.contains(&type_name) => {
                            let (positions, instances) = groups.entry(type_name).or_default();
                            positions.push(index);
                            instances.push(instance);
                        }
                        _ => {
                            return Err(format!(
                                "field '{}' of union '{name}' resolved to a value which is not one of its members",
                                selection.name
                            )
                            .into());
                        }
                    }
                }
                for (member, (positions, instances)) in groups {
                    let objects = self.execute_batch(&member, &instances, sub_selections)?;
                    for (position, object) in positions.into_iter().zip(objects) {
                        let mut payload = Object::new();
                        payload.insert(member.clone(), Value::Object(object));
                        output[position] = Value::Object(payload);
                    }
                }
                Ok(output)
            }
            FieldType::Named(_) => resolved
                .into_iter()
                .map(|result| match result {
                    Resolved::Value(value) => Ok(value),
                    _ => Err(format!(
                        "field '{}' of type '{ty}' resolved to a composite value",
                        selection.name
                    )
                    .into()),
                })
                .collect(),
        }
    }
}
