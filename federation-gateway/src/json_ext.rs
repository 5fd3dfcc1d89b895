//! JSON helpers shared by the planner, the executor and the merger.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

const FLATTEN_CHARACTER: &str = "@";
const FRAGMENT_PREFIX: &str = "|[";
const FRAGMENT_SUFFIX: &str = "]";

/// One step of a [`Path`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathElement {
    /// Every element of a list.
    Flatten,

    /// One element of a list.
    Index(usize),

    /// An object field, by response key (the alias).
    Key(String),

    /// The payload of one union member.
    Fragment(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Flatten => f.write_str(FLATTEN_CHARACTER),
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
            PathElement::Fragment(type_name) => {
                write!(f, "{FRAGMENT_PREFIX}{type_name}{FRAGMENT_SUFFIX}")
            }
        }
    }
}

impl FromStr for PathElement {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == FLATTEN_CHARACTER {
            return Ok(PathElement::Flatten);
        }
        if let Some(type_name) = s
            .strip_prefix(FRAGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(FRAGMENT_SUFFIX))
        {
            return Ok(PathElement::Fragment(type_name.to_string()));
        }
        Ok(match s.parse::<usize>() {
            Ok(index) => PathElement::Index(index),
            Err(_) => PathElement::Key(s.to_string()),
        })
    }
}

impl Serialize for PathElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PathElement::Index(index) => serializer.serialize_u64(*index as u64),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(usize),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Index(index) => PathElement::Index(index),
            Raw::Text(text) => match text.parse() {
                Ok(element) => element,
                Err(never) => match never {},
            },
        })
    }
}

/// A path into a response tree, e.g. `users/@/friends/0/|[Admin]/name`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    /// Returns a new path made of this one followed by `other`.
    pub fn join(&self, other: impl AsRef<Path>) -> Path {
        let other = other.as_ref();
        let mut elements = Vec::with_capacity(self.len() + other.len());
        elements.extend(self.0.iter().cloned());
        elements.extend(other.0.iter().cloned());
        Path(elements)
    }

    pub(crate) fn with(&self, element: PathElement) -> Path {
        let mut path = self.clone();
        path.push(element);
        path
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path(
            s.split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| match segment.parse() {
                    Ok(element) => element,
                    Err(never) => match never {},
                })
                .collect(),
        )
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, element) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

/// Extension trait for [`serde_json_bytes::Value`].
pub trait ValueExt {
    /// Deep merge `other` into `self`.
    ///
    /// Objects are merged key by key, keeping the position of keys already present in
    /// `self`; any other value in `other` replaces the one in `self`.
    fn deep_merge(&mut self, other: Self);

    /// Get a reference to the value at a concrete path (no [`PathElement::Flatten`]).
    fn get_path(&self, path: &Path) -> Option<&Value>;

    /// Get a mutable reference to the value at a concrete path (no [`PathElement::Flatten`]).
    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value>;

    /// Visit every value matching `path`, along with its concrete path.
    ///
    /// Lists are expanded at [`PathElement::Flatten`] steps. Nulls and values whose shape
    /// does not match the path are skipped.
    fn select_values_and_paths<'a, F>(&'a self, path: &Path, f: F)
    where
        F: FnMut(&Path, &'a Value);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(key.as_str()) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
                for (existing, value) in a.iter_mut().zip(b) {
                    existing.deep_merge(value);
                }
            }
            (a, b) => *a = b,
        }
    }

    fn get_path(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object))
                | (PathElement::Fragment(key), Value::Object(object)) => {
                    object.get(key.as_str())?
                }
                (PathElement::Index(index), Value::Array(array)) => array.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object))
                | (PathElement::Fragment(key), Value::Object(object)) => {
                    object.get_mut(key.as_str())?
                }
                (PathElement::Index(index), Value::Array(array)) => array.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &Path, mut f: F)
    where
        F: FnMut(&Path, &'a Value),
    {
        iterate_path(&mut Path::empty(), &path.0, self, &mut f)
    }
}

fn iterate_path<'a, F>(parent: &mut Path, path: &[PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(&Path, &'a Value),
{
    if data.is_null() {
        return;
    }
    match path.first() {
        None => f(parent, data),
        Some(PathElement::Flatten) => {
            if let Value::Array(array) = data {
                for (index, value) in array.iter().enumerate() {
                    parent.push(PathElement::Index(index));
                    iterate_path(parent, &path[1..], value, f);
                    parent.0.pop();
                }
            }
        }
        Some(PathElement::Index(index)) => {
            if let Some(value) = data.as_array().and_then(|array| array.get(*index)) {
                parent.push(PathElement::Index(*index));
                iterate_path(parent, &path[1..], value, f);
                parent.0.pop();
            }
        }
        Some(element) => {
            let (PathElement::Key(key) | PathElement::Fragment(key)) = element else {
                return;
            };
            if let Some(value) = data.as_object().and_then(|object| object.get(key.as_str())) {
                parent.push(element.clone());
                iterate_path(parent, &path[1..], value, f);
                parent.0.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn path_parsing_and_display() {
        let path = Path::from("users/@/friends/0/|[Admin]/name");
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("users".to_string()),
                PathElement::Flatten,
                PathElement::Key("friends".to_string()),
                PathElement::Index(0),
                PathElement::Fragment("Admin".to_string()),
                PathElement::Key("name".to_string()),
            ])
        );
        assert_eq!(path.to_string(), "users/@/friends/0/|[Admin]/name");
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            r#"["users","@","friends",0,"|[Admin]","name"]"#
        );
        let parsed: Path = serde_json::from_str(r#"["users","@","friends",0,"|[Admin]","name"]"#)
            .unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn deep_merge_keeps_existing_positions() {
        let mut value = json!({"a": 1, "b": {"c": 2}});
        value.deep_merge(json!({"b": {"d": 3}, "a": 4, "e": 5}));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"a":4,"b":{"c":2,"d":3},"e":5}"#
        );
    }

    #[test]
    fn select_values_expands_lists_and_skips_nulls() {
        let value = json!({
            "users": [
                {"friend": {"id": 1}},
                {"friend": null},
                {"friend": {"id": 3}},
            ]
        });
        let mut selected = Vec::new();
        value.select_values_and_paths(&Path::from("users/@/friend"), |path, value| {
            selected.push((path.to_string(), value.clone()))
        });
        assert_eq!(
            selected,
            vec![
                ("users/0/friend".to_string(), json!({"id": 1})),
                ("users/2/friend".to_string(), json!({"id": 3})),
            ]
        );
    }

    #[test]
    fn get_path_mut_follows_fragments() {
        let mut value = json!({"item": [{"Foo": {"name": "a"}}]});
        let target = value
            .get_path_mut(&Path::from("item/0/|[Foo]"))
            .expect("path exists");
        target.deep_merge(json!({"size": 1}));
        assert_eq!(
            value.get_path(&Path::from("item/0/|[Foo]/size")),
            Some(&json!(1))
        );
    }

    #[test]
    fn wire_round_trip_preserves_sibling_order() {
        let value = json!({
            "zeta": [1, 2.5, "three", null, true],
            "alpha": {"nested": {"y": 1, "x": 2}},
            "middle": []
        });
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), encoded);
        let keys: Vec<_> = decoded
            .as_object()
            .unwrap()
            .keys()
            .map(|key| key.as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["zeta", "alpha", "middle"]);
    }
}
