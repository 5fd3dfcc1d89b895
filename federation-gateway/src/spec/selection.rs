use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// An ordered list of selections.
pub type SelectionSet = Vec<Selection>;

/// One field of a selection set.
///
/// Inline fragments and fragment spreads are flattened at parse time: every field they hold
/// keeps the type condition it was selected under in `fragment_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub name: String,
    /// The response key; equal to `name` when the query does not alias the field.
    pub alias: String,
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub arguments: Object,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_set: Option<SelectionSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_type: Option<String>,
}

impl Selection {
    /// A leaf selection of `name`, not aliased.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Selection {
            alias: name.clone(),
            name,
            arguments: Object::new(),
            selection_set: None,
            fragment_type: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_argument(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name, value.into());
        self
    }

    pub fn with_selection_set(mut self, selection_set: SelectionSet) -> Self {
        self.selection_set = Some(selection_set);
        self
    }

    /// Restrict this selection to objects of type `type_name`.
    pub fn on(mut self, type_name: impl Into<String>) -> Self {
        self.fragment_type = Some(type_name.into());
        self
    }

    /// The key under which this field appears in a response.
    pub fn response_key(&self) -> &str {
        &self.alias
    }

    pub fn is_aliased(&self) -> bool {
        self.alias != self.name
    }
}
