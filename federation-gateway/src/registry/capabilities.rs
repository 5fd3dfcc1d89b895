use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::spec::FieldType;

/// What one backend service declares at startup.
///
/// ```yaml
/// name: accounts
/// objects:
///   User:
///     key_extractor: true
///     key_resolver: true
///     fields:
///       name: { type: String }
///       friends: { type: "[User]" }
/// unions:
///   Account: [User, Organization]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceCapabilities {
    pub name: String,
    #[serde(default)]
    pub objects: IndexMap<String, ObjectCapability>,
    #[serde(default)]
    pub unions: IndexMap<String, Vec<String>>,
}

/// What a service declares about one object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectCapability {
    #[serde(default)]
    pub fields: IndexMap<String, FieldCapability>,
    /// The service can produce the stitching key of its instances.
    #[serde(default)]
    pub key_extractor: bool,
    /// The service can resolve instances from stitching keys.
    #[serde(default)]
    pub key_resolver: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldCapability {
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Also served by this service while another service owns it.
    #[serde(default)]
    pub shareable: bool,
}

impl ServiceCapabilities {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceCapabilities {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_yaml(raw_yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw_yaml)
    }

    pub fn object(mut self, type_name: impl Into<String>, object: ObjectCapability) -> Self {
        self.objects.insert(type_name.into(), object);
        self
    }

    pub fn union<I, S>(mut self, union_name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unions
            .insert(union_name.into(), members.into_iter().map(Into::into).collect());
        self
    }
}

impl ObjectCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldCapability {
                ty,
                shareable: false,
            },
        );
        self
    }

    pub fn shareable_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldCapability {
                ty,
                shareable: true,
            },
        );
        self
    }

    pub fn key_extractor(mut self) -> Self {
        self.key_extractor = true;
        self
    }

    pub fn key_resolver(mut self) -> Self {
        self.key_resolver = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn yaml_declaration() {
        let capabilities = ServiceCapabilities::from_yaml(
            r#"
name: accounts
objects:
  Query:
    fields:
      me: { type: User }
  User:
    key_extractor: true
    key_resolver: true
    fields:
      name: { type: String, shareable: true }
      friends: { type: "[User]" }
unions:
  Account: [User]
"#,
        )
        .unwrap();

        assert_eq!(
            capabilities,
            ServiceCapabilities::new("accounts")
                .object(
                    "Query",
                    ObjectCapability::new().field("me", FieldType::named("User"))
                )
                .object(
                    "User",
                    ObjectCapability::new()
                        .key_extractor()
                        .key_resolver()
                        .shareable_field("name", FieldType::named("String"))
                        .field("friends", FieldType::list(FieldType::named("User")))
                )
                .union("Account", ["User"])
        );
    }
}
