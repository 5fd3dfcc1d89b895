use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::spec::SpecError;

/// The declared result type of a field.
///
/// A named type which is neither an object nor a union of the registry must be a built-in
/// scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// An object, union or scalar, referenced by name.
    Named(String),
    /// A list of the inner type.
    List(Box<FieldType>),
}

impl FieldType {
    pub fn named(name: impl Into<String>) -> Self {
        FieldType::Named(name.into())
    }

    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    /// The named type at the bottom of any list wrapping.
    pub fn inner_type_name(&self) -> &str {
        match self {
            FieldType::Named(name) => name,
            FieldType::List(inner) => inner.inner_type_name(),
        }
    }

    /// Number of list levels wrapping the named type.
    pub fn list_depth(&self) -> usize {
        match self {
            FieldType::Named(_) => 0,
            FieldType::List(inner) => 1 + inner.list_depth(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Named(ty) => write!(f, "{ty}"),
            FieldType::List(ty) => write!(f, "[{ty}]"),
        }
    }
}

impl FromStr for FieldType {
    type Err = SpecError;

    /// Parses the GraphQL type reference notation. Non-null markers are accepted and ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_suffix('!').unwrap_or(s).trim_end();
        if let Some(inner) = s.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| SpecError::InvalidType(s.to_string()))?;
            return Ok(FieldType::list(inner.parse()?));
        }
        if s.is_empty()
            || !s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SpecError::InvalidType(s.to_string()));
        }
        Ok(FieldType::named(s))
    }
}

impl Serialize for FieldType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let ty: FieldType = "[[Foo!]!]".parse().unwrap();
        assert_eq!(
            ty,
            FieldType::list(FieldType::list(FieldType::named("Foo")))
        );
        assert_eq!(ty.to_string(), "[[Foo]]");
        assert_eq!(ty.inner_type_name(), "Foo");
        assert_eq!(ty.list_depth(), 2);
        assert!(ty.is_list());
    }

    #[test]
    fn rejects_malformed_types() {
        assert!("[Foo".parse::<FieldType>().is_err());
        assert!("".parse::<FieldType>().is_err());
        assert!("Foo Bar".parse::<FieldType>().is_err());
    }

    #[test]
    fn serde_uses_type_notation() {
        let ty: FieldType = serde_json::from_str(r#""[Int]""#).unwrap();
        assert_eq!(ty, FieldType::list(FieldType::named("Int")));
        assert_eq!(serde_json::to_string(&ty).unwrap(), r#""[Int]""#);
    }
}
