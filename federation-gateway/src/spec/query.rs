//! Query text to selection tree conversion.
//!
//! This is a syntactic conversion: no schema validation happens here, unknown fields are
//! reported by the planner.

use std::collections::HashMap;

use apollo_parser::cst;
use apollo_parser::cst::CstNode;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::Selection;
use crate::spec::SelectionSet;
use crate::spec::SpecError;

/// A parsed query operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub string: String,
    pub operation_name: Option<String>,
    pub selection_set: SelectionSet,
}

struct FragmentDefinition {
    type_condition: String,
    selection_set: cst::SelectionSet,
}

impl Query {
    /// Parse `query`, selecting the operation named `operation_name` (or the only one) and
    /// substituting `variables`.
    ///
    /// Named fragments are inlined, and every field selected through a fragment keeps its
    /// type condition in [`Selection::fragment_type`].
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn parse(
        query: impl Into<String>,
        operation_name: Option<&str>,
        variables: &Object,
    ) -> Result<Self, SpecError> {
        let string = query.into();
        let parser = apollo_parser::Parser::new(string.as_str());
        let tree = parser.parse();
        let errors = tree
            .errors()
            .map(|err| err.message().to_string())
            .collect::<Vec<_>>();
        if !errors.is_empty() {
            failfast_debug!("Parsing error(s): {}", errors.join(", "));
            return Err(SpecError::ParsingError(errors.join(", ")));
        }

        let document = tree.document();
        let mut fragments = HashMap::new();
        let mut operations = Vec::new();
        for definition in document.definitions() {
            match definition {
                cst::Definition::OperationDefinition(operation) => operations.push(operation),
                cst::Definition::FragmentDefinition(fragment) => {
                    let name = fragment
                        .fragment_name()
                        .and_then(|name| name.name())
                        .map(|name| name.text().to_string())
                        .ok_or_else(|| SpecError::ParsingError("unnamed fragment".to_string()))?;
                    let type_condition = fragment
                        .type_condition()
                        .and_then(|condition| condition.named_type())
                        .and_then(|named| named.name())
                        .map(|name| name.text().to_string())
                        .ok_or_else(|| {
                            SpecError::ParsingError(format!(
                                "fragment '{name}' has no type condition"
                            ))
                        })?;
                    let selection_set = fragment.selection_set().ok_or_else(|| {
                        SpecError::ParsingError(format!("fragment '{name}' has no selection set"))
                    })?;
                    fragments.insert(
                        name,
                        FragmentDefinition {
                            type_condition,
                            selection_set,
                        },
                    );
                }
                // type system definitions are not part of an executable request
                _ => {}
            }
        }

        let operation = match operation_name {
            Some(wanted) => operations
                .into_iter()
                .find(|operation| {
                    operation
                        .name()
                        .map(|name| name.text().to_string() == wanted)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SpecError::UnknownOperation(wanted.to_string()))?,
            None => {
                let mut operations = operations.into_iter();
                match (operations.next(), operations.next()) {
                    (Some(operation), None) => operation,
                    (None, _) => return Err(SpecError::NoOperation),
                    (Some(_), Some(_)) => return Err(SpecError::MissingOperationName),
                }
            }
        };

        if let Some(operation_type) = operation.operation_type() {
            if operation_type.query_token().is_none() {
                return Err(SpecError::UnsupportedOperation);
            }
        }

        let mut variables = variables.clone();
        if let Some(definitions) = operation.variable_definitions() {
            for definition in definitions.variable_definitions() {
                let Some(name) = definition
                    .variable()
                    .and_then(|variable| variable.name())
                    .map(|name| name.text().to_string())
                else {
                    continue;
                };
                if variables.contains_key(name.as_str()) {
                    continue;
                }
                if let Some(default) = definition
                    .default_value()
                    .and_then(|default| default.value())
                {
                    let value = Converter::constant(default)?;
                    variables.insert(name, value);
                }
            }
        }

        let mut converter = Converter {
            fragments: &fragments,
            variables: &variables,
            visiting: Vec::new(),
        };
        let mut selection_set = Vec::new();
        if let Some(set) = operation.selection_set() {
            converter.selection_set(set, None, &mut selection_set)?;
        }

        Ok(Query {
            operation_name: operation.name().map(|name| name.text().to_string()),
            string,
            selection_set,
        })
    }
}

struct Converter<'a> {
    fragments: &'a HashMap<String, FragmentDefinition>,
    variables: &'a Object,
    /// Fragment spreads currently being expanded, to reject cycles.
    visiting: Vec<String>,
}

impl Converter<'_> {
    fn selection_set(
        &mut self,
        set: cst::SelectionSet,
        fragment_type: Option<&str>,
        output: &mut SelectionSet,
    ) -> Result<(), SpecError> {
        for selection in set.selections() {
            match selection {
                cst::Selection::Field(field) => output.push(self.field(field, fragment_type)?),
                cst::Selection::InlineFragment(inline_fragment) => {
                    let type_condition = inline_fragment
                        .type_condition()
                        .and_then(|condition| condition.named_type())
                        .and_then(|named| named.name())
                        .map(|name| name.text().to_string());
                    let scope = type_condition.as_deref().or(fragment_type);
                    if let Some(set) = inline_fragment.selection_set() {
                        self.selection_set(set, scope, output)?;
                    }
                }
                cst::Selection::FragmentSpread(spread) => {
                    let name = spread
                        .fragment_name()
                        .and_then(|name| name.name())
                        .map(|name| name.text().to_string())
                        .ok_or_else(|| {
                            SpecError::ParsingError("unnamed fragment spread".to_string())
                        })?;
                    if self.visiting.contains(&name) {
                        return Err(SpecError::RecursiveFragment(name));
                    }
                    let fragments = self.fragments;
                    let fragment = fragments
                        .get(&name)
                        .ok_or_else(|| SpecError::UnknownFragment(name.clone()))?;
                    self.visiting.push(name);
                    self.selection_set(
                        fragment.selection_set.clone(),
                        Some(fragment.type_condition.as_str()),
                        output,
                    )?;
                    self.visiting.pop();
                }
            }
        }
        Ok(())
    }

    fn field(
        &mut self,
        field: cst::Field,
        fragment_type: Option<&str>,
    ) -> Result<Selection, SpecError> {
        let name = field
            .name()
            .map(|name| name.text().to_string())
            .ok_or_else(|| SpecError::ParsingError("field without a name".to_string()))?;
        let alias = field
            .alias()
            .and_then(|alias| alias.name())
            .map(|alias| alias.text().to_string())
            .unwrap_or_else(|| name.clone());

        let mut arguments = Object::new();
        if let Some(list) = field.arguments() {
            for argument in list.arguments() {
                let argument_name = argument
                    .name()
                    .map(|name| name.text().to_string())
                    .ok_or_else(|| {
                        SpecError::ParsingError(format!("unnamed argument on '{name}'"))
                    })?;
                let value = argument.value().ok_or_else(|| {
                    SpecError::InvalidValue(format!("argument '{argument_name}' has no value"))
                })?;
                arguments.insert(argument_name, self.value(value)?);
            }
        }

        // nested fields start a new scope: fragments apply to the type of this field
        let selection_set = match field.selection_set() {
            Some(set) => {
                let mut nested = Vec::new();
                self.selection_set(set, None, &mut nested)?;
                Some(nested)
            }
            None => None,
        };

        Ok(Selection {
            name,
            alias,
            arguments,
            selection_set,
            fragment_type: fragment_type.map(str::to_string),
        })
    }

    fn value(&self, value: cst::Value) -> Result<Value, SpecError> {
        match value {
            cst::Value::Variable(variable) => {
                let name = variable
                    .name()
                    .map(|name| name.text().to_string())
                    .ok_or_else(|| SpecError::ParsingError("unnamed variable".to_string()))?;
                self.variables
                    .get(name.as_str())
                    .cloned()
                    .ok_or(SpecError::UnknownVariable(name))
            }
            cst::Value::ListValue(list) => list
                .values()
                .map(|value| self.value(value))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            cst::Value::ObjectValue(object) => {
                let mut output = Object::new();
                for field in object.object_fields() {
                    let name = field
                        .name()
                        .map(|name| name.text().to_string())
                        .ok_or_else(|| {
                            SpecError::ParsingError("unnamed object field".to_string())
                        })?;
                    let value = field.value().ok_or_else(|| {
                        SpecError::InvalidValue(format!("object field '{name}' has no value"))
                    })?;
                    output.insert(name, self.value(value)?);
                }
                Ok(Value::Object(output))
            }
            other => Self::scalar(other),
        }
    }

    /// Values allowed as variable defaults: no variable references.
    fn constant(value: cst::Value) -> Result<Value, SpecError> {
        let empty = Object::new();
        let fragments = HashMap::new();
        let converter = Converter {
            fragments: &fragments,
            variables: &empty,
            visiting: Vec::new(),
        };
        converter.value(value)
    }

    fn scalar(value: cst::Value) -> Result<Value, SpecError> {
        match value {
            cst::Value::StringValue(string) => Ok(Value::String(String::from(&string).into())),
            cst::Value::IntValue(int) => {
                let text = int.syntax().text().to_string();
                text.trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| SpecError::InvalidValue(text))
            }
            cst::Value::FloatValue(float) => {
                let text = float.syntax().text().to_string();
                text.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or(SpecError::InvalidValue(text))
            }
            cst::Value::BooleanValue(boolean) => Ok(Value::Bool(boolean.true_token().is_some())),
            cst::Value::NullValue(_) => Ok(Value::Null),
            cst::Value::EnumValue(enum_value) => enum_value
                .name()
                .map(|name| Value::String(name.text().to_string().into()))
                .ok_or_else(|| SpecError::InvalidValue("empty enum value".to_string())),
            other => Err(SpecError::InvalidValue(other.syntax().text().to_string())),
        }
    }
}
