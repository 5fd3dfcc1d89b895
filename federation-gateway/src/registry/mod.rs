//! The schema registry: which service owns and serves which field.
//!
//! Built once from every service's [`ServiceCapabilities`] and immutable afterwards.

mod capabilities;

use std::collections::HashSet;

pub use capabilities::FieldCapability;
pub use capabilities::ObjectCapability;
pub use capabilities::ServiceCapabilities;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::error::RegistryError;
use crate::error::RegistryLookupError;
use crate::spec::FieldType;

/// The root query type.
pub const ROOT_TYPE: &str = "Query";
/// Discriminant of union values, also selectable on objects.
pub const TYPENAME: &str = "__typename";
/// The stitching key pseudo-field.
pub const KEY_FIELD: &str = "__federation";
/// The entity entry point sent to services for key based fetches.
pub const ENTITIES_FIELD: &str = "_federation";

pub(crate) const RESERVED_NAMES: [&str; 3] = [TYPENAME, KEY_FIELD, ENTITIES_FIELD];

/// Leaf types every service may use without declaring them.
pub const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

/// A field as seen across all services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub ty: FieldType,
    pub owner: String,
    pub services: IndexSet<String>,
}

#[derive(Debug, Clone, Default)]
struct TypeInfo {
    fields: IndexMap<String, FieldInfo>,
    key_extractors: IndexSet<String>,
    key_resolvers: IndexSet<String>,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    services: IndexSet<String>,
    types: IndexMap<String, TypeInfo>,
    unions: IndexMap<String, IndexSet<String>>,
}

#[derive(Default)]
struct FieldDeclaration {
    ty: Option<FieldType>,
    services: IndexSet<String>,
    claimants: Vec<String>,
}

impl SchemaRegistry {
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn new(
        capabilities: impl IntoIterator<Item = ServiceCapabilities>,
    ) -> Result<Self, RegistryError> {
        let mut services = IndexSet::new();
        let mut declarations: IndexMap<String, IndexMap<String, FieldDeclaration>> =
            IndexMap::new();
        let mut types: IndexMap<String, TypeInfo> = IndexMap::new();
        let mut unions: IndexMap<String, IndexSet<String>> = IndexMap::new();

        for service in capabilities {
            if !services.insert(service.name.clone()) {
                return Err(RegistryError::DuplicateService(service.name));
            }
            let reserved = |name: &str| RegistryError::ReservedFieldName {
                service: service.name.clone(),
                name: name.to_string(),
            };

            for (type_name, object) in &service.objects {
                if RESERVED_NAMES.contains(&type_name.as_str()) {
                    return Err(reserved(type_name));
                }
                let info = types.entry(type_name.clone()).or_default();
                if object.key_extractor {
                    info.key_extractors.insert(service.name.clone());
                }
                if object.key_resolver {
                    info.key_resolvers.insert(service.name.clone());
                }
                let fields = declarations.entry(type_name.clone()).or_default();
                for (field_name, field) in &object.fields {
                    if RESERVED_NAMES.contains(&field_name.as_str()) {
                        return Err(reserved(field_name));
                    }
                    let declaration = fields.entry(field_name.clone()).or_default();
                    match &declaration.ty {
                        Some(ty) if *ty != field.ty => {
                            return Err(RegistryError::ConflictingFieldType {
                                type_name: type_name.clone(),
                                field: field_name.clone(),
                                first: ty.to_string(),
                                second: field.ty.to_string(),
                            });
                        }
                        Some(_) => {}
                        None => declaration.ty = Some(field.ty.clone()),
                    }
                    declaration.services.insert(service.name.clone());
                    if !field.shareable {
                        declaration.claimants.push(service.name.clone());
                    }
                }
            }

            for (union_name, members) in &service.unions {
                if RESERVED_NAMES.contains(&union_name.as_str()) {
                    return Err(reserved(union_name));
                }
                let members: IndexSet<String> = members.iter().cloned().collect();
                match unions.get(union_name) {
                    Some(existing) => {
                        let existing: HashSet<&String> = existing.iter().collect();
                        let declared: HashSet<&String> = members.iter().collect();
                        if existing != declared {
                            return Err(RegistryError::ConflictingUnion(union_name.clone()));
                        }
                    }
                    None => {
                        unions.insert(union_name.clone(), members);
                    }
                }
            }
        }

        for (type_name, fields) in declarations {
            let info = types.entry(type_name.clone()).or_default();
            for (field_name, declaration) in fields {
                let owner = match (declaration.services.len(), declaration.claimants.as_slice()) {
                    (1, _) => declaration.services.first().cloned(),
                    (_, [claimant]) => Some(claimant.clone()),
                    _ => None,
                };
                let (Some(owner), Some(ty)) = (owner, declaration.ty) else {
                    return Err(RegistryError::AmbiguousFieldOwnership {
                        type_name,
                        field: field_name,
                        services: declaration
                            .services
                            .iter()
                            .map(String::as_str)
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                };
                info.fields.insert(
                    field_name,
                    FieldInfo {
                        ty,
                        owner,
                        services: declaration.services,
                    },
                );
            }
        }

        if !types.contains_key(ROOT_TYPE) {
            return Err(RegistryError::TypeWithoutService(ROOT_TYPE.to_string()));
        }
        if let Some((type_name, _)) = types.iter().find(|(_, info)| info.fields.is_empty()) {
            return Err(RegistryError::TypeWithoutService(type_name.clone()));
        }

        for (union_name, members) in &unions {
            if types.contains_key(union_name) {
                return Err(RegistryError::ConflictingUnion(union_name.clone()));
            }
            if let Some(member) = members.iter().find(|member| !types.contains_key(*member)) {
                return Err(RegistryError::UnknownUnionMember {
                    union_name: union_name.clone(),
                    member: member.clone(),
                });
            }
        }

        for (type_name, info) in &types {
            for (field_name, field) in &info.fields {
                let field_type = field.ty.inner_type_name();
                if !types.contains_key(field_type)
                    && !unions.contains_key(field_type)
                    && !BUILTIN_SCALARS.contains(&field_type)
                {
                    return Err(RegistryError::UnknownFieldType {
                        type_name: type_name.clone(),
                        field: field_name.clone(),
                        field_type: field_type.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            services = services.len(),
            types = types.len(),
            unions = unions.len(),
            "schema registry built"
        );
        Ok(SchemaRegistry {
            services,
            types,
            unions,
        })
    }

    /// The owning service of `type_name.field`.
    pub fn lookup(&self, type_name: &str, field: &str) -> Result<&str, RegistryLookupError> {
        self.field(type_name, field)
            .map(|info| info.owner.as_str())
            .ok_or_else(|| RegistryLookupError::NotFound {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldInfo> {
        self.types.get(type_name)?.fields.get(field)
    }

    pub fn field_type(&self, type_name: &str, field: &str) -> Option<&FieldType> {
        self.field(type_name, field).map(|info| &info.ty)
    }

    /// Whether `service` can resolve instances of `type_name` from keys.
    pub fn key_resolver(&self, type_name: &str, service: &str) -> bool {
        self.types
            .get(type_name)
            .map(|info| info.key_resolvers.contains(service))
            .unwrap_or(false)
    }

    /// Whether `service` can produce keys for instances of `type_name`.
    pub fn key_extractor(&self, type_name: &str, service: &str) -> bool {
        self.types
            .get(type_name)
            .map(|info| info.key_extractors.contains(service))
            .unwrap_or(false)
    }

    pub fn key_extractor_services(&self, type_name: &str) -> Vec<&str> {
        self.types
            .get(type_name)
            .map(|info| info.key_extractors.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn serves_field(&self, type_name: &str, field: &str, service: &str) -> bool {
        self.field(type_name, field)
            .map(|info| info.services.contains(service))
            .unwrap_or(false)
    }

    /// Whether `service` serves at least one field of `type_name`.
    pub fn serves_type(&self, type_name: &str, service: &str) -> bool {
        self.types
            .get(type_name)
            .map(|info| info.fields.values().any(|f| f.services.contains(service)))
            .unwrap_or(false)
    }

    pub fn is_object(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn is_union(&self, type_name: &str) -> bool {
        self.unions.contains_key(type_name)
    }

    pub fn is_composite(&self, type_name: &str) -> bool {
        self.is_object(type_name) || self.is_union(type_name)
    }

    pub fn union_members(&self, union_name: &str) -> Option<impl Iterator<Item = &str>> {
        self.unions
            .get(union_name)
            .map(|members| members.iter().map(String::as_str))
    }

    pub fn is_union_member(&self, union_name: &str, type_name: &str) -> bool {
        self.unions
            .get(union_name)
            .map(|members| members.contains(type_name))
            .unwrap_or(false)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }
}
