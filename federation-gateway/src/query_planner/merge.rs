//! Shapes the stitched data into the response the client asked for.
//!
//! Fields are emitted in query order, `__typename` is produced from the static type or the
//! union discriminant, and union payloads are checked to hold exactly one member.

use super::QueryPlan;
use crate::configuration::Configuration;
use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::registry::SchemaRegistry;
use crate::registry::KEY_FIELD;
use crate::registry::TYPENAME;
use crate::spec::FieldType;
use crate::spec::Selection;

/// Shape `raw`, the output of [`QueryPlan::execute`], along the plan's query.
pub fn format_response(
    plan: &QueryPlan,
    raw: &Value,
    registry: &SchemaRegistry,
    configuration: &Configuration,
) -> Result<Value, FetchError> {
    let formatter = Formatter {
        registry,
        expose_keys: configuration.expose_federation_keys,
    };
    match raw {
        Value::Null => Ok(Value::Null),
        Value::Object(object) => Ok(Value::Object(formatter.format_object(
            &plan.query,
            &plan.root_type,
            object,
            &Path::empty(),
        )?)),
        _ => Err(FetchError::MalformedResponse {
            service: plan.services().join(", "),
            path: Path::empty(),
            reason: "expected an object at the root".to_string(),
        }),
    }
}

struct Formatter<'a> {
    registry: &'a SchemaRegistry,
    expose_keys: bool,
}

impl Formatter<'_> {
    fn format_object(
        &self,
        selections: &[Selection],
        type_name: &str,
        raw: &Object,
        path: &Path,
    ) -> Result<Object, FetchError> {
        let mut output = Object::new();
        for selection in selections {
            if !self.applies(selection, type_name) {
                continue;
            }
            if selection.name == TYPENAME {
                output.insert(selection.alias.as_str(), Value::String(type_name.into()));
                continue;
            }
            let field_path = path.with(PathElement::Key(selection.alias.clone()));
            let (ty, service) = match (
                self.registry.field_type(type_name, &selection.name),
                self.registry.lookup(type_name, &selection.name),
            ) {
                (Some(ty), Ok(service)) => (ty, service),
                _ => {
                    return Err(FetchError::MalformedResponse {
                        service: String::new(),
                        path: field_path,
                        reason: format!("no field '{}' on type '{type_name}'", selection.name),
                    });
                }
            };
            let value = raw.get(selection.alias.as_str()).unwrap_or(&Value::Null);
            let formatted = self.format_value(value, ty, selection, service, &field_path)?;
            output.insert(selection.alias.as_str(), formatted);
        }

        if self.expose_keys {
            if let Some(key) = raw.get(KEY_FIELD).filter(|key| !key.is_null()) {
                output.insert(KEY_FIELD, key.clone());
            }
        }
        Ok(output)
    }

    fn format_value(
        &self,
        value: &Value,
        ty: &FieldType,
        selection: &Selection,
        service: &str,
        path: &Path,
    ) -> Result<Value, FetchError> {
        match (ty, value) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldType::List(inner), Value::Array(values)) => values
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    self.format_value(
                        value,
                        inner,
                        selection,
                        service,
                        &path.with(PathElement::Index(index)),
                    )
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (FieldType::List(_), _) => Err(malformed(service, path, "expected a list")),
            (FieldType::Named(type_name), value) => {
                let selections = match &selection.selection_set {
                    Some(selections) => selections,
                    None => return Ok(value.clone()),
                };
                let object = value
                    .as_object()
                    .ok_or_else(|| malformed(service, path, "expected an object"))?;
                if self.registry.is_union(type_name) {
                    self.discriminate(selections, type_name, object, service, path)
                        .map(Value::Object)
                } else {
                    self.format_object(selections, type_name, object, path)
                        .map(Value::Object)
                }
            }
        }
    }

    /// Picks the single populated member payload of a union value.
    fn discriminate(
        &self,
        selections: &[Selection],
        union_name: &str,
        raw: &Object,
        service: &str,
        path: &Path,
    ) -> Result<Object, FetchError> {
        let mut payloads = raw.iter().filter(|(_, payload)| !payload.is_null());
        let (member, payload) = match (payloads.next(), payloads.next()) {
            (Some(payload), None) => payload,
            (None, _) => {
                return Err(FetchError::UnionDiscrimination {
                    service: service.to_string(),
                    union_name: union_name.to_string(),
                    path: path.clone(),
                    reason: "no member payload".to_string(),
                });
            }
            (Some(_), Some(_)) => {
                let members: Vec<&str> = raw
                    .iter()
                    .filter(|(_, payload)| !payload.is_null())
                    .map(|(member, _)| member.as_str())
                    .collect();
                return Err(FetchError::UnionDiscrimination {
                    service: service.to_string(),
                    union_name: union_name.to_string(),
                    path: path.clone(),
                    reason: format!("several member payloads: {}", members.join(", ")),
                });
            }
        };

        let member = member.as_str();
        if !self.registry.is_union_member(union_name, member) {
            return Err(FetchError::UnionDiscrimination {
                service: service.to_string(),
                union_name: union_name.to_string(),
                path: path.clone(),
                reason: format!("'{member}' is not a member"),
            });
        }
        let payload = payload.as_object().ok_or_else(|| FetchError::UnionDiscrimination {
            service: service.to_string(),
            union_name: union_name.to_string(),
            path: path.clone(),
            reason: format!("payload of '{member}' is not an object"),
        })?;

        let mut output = Object::new();
        output.insert(TYPENAME, Value::String(member.into()));
        for (key, value) in self.format_object(selections, member, payload, path)? {
            output.insert(key, value);
        }
        Ok(output)
    }

    fn applies(&self, selection: &Selection, type_name: &str) -> bool {
        match selection.fragment_type.as_deref() {
            None => true,
            Some(fragment) if fragment == type_name => true,
            Some(fragment) => self.registry.is_union_member(fragment, type_name),
        }
    }
}

fn malformed(service: &str, path: &Path, reason: &str) -> FetchError {
    FetchError::MalformedResponse {
        service: service.to_string(),
        path: path.clone(),
        reason: reason.to_string(),
    }
}
