use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::IndexSet;
use tower::BoxError;

use super::BatchFieldFn;
use super::EntityFn;
use super::FieldDefinition;
use super::FieldFn;
use super::KeyFn;
use super::LocalSchema;
use super::ObjectDefinition;
use super::Resolved;
use super::Resolver;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::registry::ROOT_TYPE;
use crate::spec::SpecError;

/// Collects resolver records for an in-process schema.
///
/// ```ignore
/// let mut schema = SchemaBuilder::new();
/// schema.query().field("me", "User", |_, _| Ok(json!({"id": 1}).into()));
/// schema
///     .object("User")
///     .property("id", "Int")
///     .key(|user| Ok(user["id"].clone()))
///     .entity_resolver(|keys| Ok(keys.into_iter().map(|id| json!({"id": id})).collect()));
/// let schema = schema.build()?;
/// ```
#[derive(Default)]
pub struct SchemaBuilder {
    objects: IndexMap<String, ObjectBuilder>,
    unions: IndexMap<String, Vec<String>>,
}

/// Resolver records for one object type.
#[derive(Default)]
pub struct ObjectBuilder {
    fields: IndexMap<String, PendingField>,
    shareable: IndexSet<String>,
    key: Option<Arc<KeyFn>>,
    entity_resolver: Option<Arc<EntityFn>>,
}

struct PendingField {
    ty: String,
    resolver: Resolver,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The root query type.
    pub fn query(&mut self) -> &mut ObjectBuilder {
        self.object(ROOT_TYPE)
    }

    pub fn object(&mut self, name: impl Into<String>) -> &mut ObjectBuilder {
        self.objects.entry(name.into()).or_default()
    }

    pub fn union<I, S>(&mut self, name: impl Into<String>, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unions
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Resolves field types and freezes the schema.
    pub fn build(self) -> Result<LocalSchema, SpecError> {
        let mut objects = IndexMap::with_capacity(self.objects.len());
        for (name, object) in self.objects {
            if let Some(field) = object
                .shareable
                .iter()
                .find(|field| !object.fields.contains_key(field.as_str()))
            {
                return Err(SpecError::UndeclaredShareableField {
                    type_name: name,
                    field: field.clone(),
                });
            }
            let mut fields = IndexMap::with_capacity(object.fields.len());
            for (field_name, field) in object.fields {
                let shareable = object.shareable.contains(&field_name);
                fields.insert(
                    field_name,
                    FieldDefinition {
                        ty: field.ty.parse()?,
                        shareable,
                        resolver: field.resolver,
                    },
                );
            }
            objects.insert(
                name,
                ObjectDefinition {
                    fields,
                    key: object.key,
                    entity_resolver: object.entity_resolver,
                },
            );
        }
        Ok(LocalSchema {
            objects,
            unions: self.unions,
        })
    }
}

impl ObjectBuilder {
    fn insert(&mut self, name: impl Into<String>, ty: &str, resolver: Resolver) -> &mut Self {
        self.fields.insert(
            name.into(),
            PendingField {
                ty: ty.to_string(),
                resolver,
            },
        );
        self
    }

    /// A field resolved once per instance, from the instance and the field arguments.
    pub fn field<F>(&mut self, name: impl Into<String>, ty: &str, resolver: F) -> &mut Self
    where
        F: Fn(&Value, &Object) -> Result<Resolved, BoxError> + Send + Sync + 'static,
    {
        let resolver: Arc<FieldFn> = Arc::new(resolver);
        self.insert(name, ty, Resolver::Field(resolver))
    }

    /// A field resolved once for every instance reached at the same place of a selection.
    ///
    /// The resolver must return one result per instance, in order.
    pub fn batch_field<F>(&mut self, name: impl Into<String>, ty: &str, resolver: F) -> &mut Self
    where
        F: Fn(&[Value], &Object) -> Result<Vec<Resolved>, BoxError> + Send + Sync + 'static,
    {
        let resolver: Arc<BatchFieldFn> = Arc::new(resolver);
        self.insert(name, ty, Resolver::Batch(resolver))
    }

    /// A field read from the instance's own data under the same name.
    pub fn property(&mut self, name: impl Into<String>, ty: &str) -> &mut Self {
        let name = name.into();
        self.insert(name.clone(), ty, Resolver::Property(name))
    }

    /// Marks a field as shareable: served here, owned by another service.
    ///
    /// The field may be declared before or after; [`SchemaBuilder::build`] fails if it never is.
    pub fn shareable(&mut self, name: impl Into<String>) -> &mut Self {
        self.shareable.insert(name.into());
        self
    }

    /// Extracts the stitching key of an instance.
    pub fn key<F>(&mut self, extractor: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(extractor));
        self
    }

    /// Resolves instances from stitching keys, one instance (or null) per key, in order.
    pub fn entity_resolver<F>(&mut self, resolver: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>, BoxError> + Send + Sync + 'static,
    {
        self.entity_resolver = Some(Arc::new(resolver));
        self
    }
}
