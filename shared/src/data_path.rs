use std::{collections::BTreeSet, fmt};

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced when resolving a dotted data key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataPathError {
    /// Key does not start with `public.` or `private.`
    #[error("Data key `{key}` must start with `public.` or `private.`")]
    InvalidRoot { key: String },

    /// Key has an empty segment, e.g. `public..name`
    #[error("Data key `{key}` contains an empty segment")]
    EmptySegment { key: String },

    /// Field filters may only name public keys
    #[error("Field filter entry `{entry}` does not name a public key")]
    InvalidFilterEntry { entry: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataRoot {
    Public,
    Private,
}

impl DataRoot {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataRoot::Public => "public",
            DataRoot::Private => "private",
        }
    }
}

/// A parsed `public.a.b` / `private.a.b` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    root: DataRoot,
    path: Vec<String>,
}

impl DataKey {
    pub fn parse(key: &str) -> Result<Self, DataPathError> {
        let (root, rest) = match key.split_once('.') {
            Some(("public", rest)) => (DataRoot::Public, rest),
            Some(("private", rest)) => (DataRoot::Private, rest),
            _ => {
                return Err(DataPathError::InvalidRoot {
                    key: key.to_string(),
                })
            }
        };
        let path: Vec<String> = rest.split('.').map(str::to_string).collect();
        if path.iter().any(|segment| segment.is_empty()) {
            return Err(DataPathError::EmptySegment {
                key: key.to_string(),
            });
        }
        Ok(Self { root, path })
    }

    pub fn root(&self) -> DataRoot {
        self.root
    }

    pub fn is_public(&self) -> bool {
        self.root == DataRoot::Public
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Path below the root, dotted; this is the key subscribers see
    pub fn relative(&self) -> String {
        self.path.join(".")
    }

    /// First segment under the root; subscriber filters match on this
    pub fn top_level(&self) -> &str {
        &self.path[0]
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.root.as_str(), self.path.join("."))
    }
}

pub fn get_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets (or with `None`, deletes) the value at `path`, creating intermediate
/// objects as needed. Non-object intermediates are overwritten when setting.
pub fn set_path(value: &mut Value, path: &[String], new_value: Option<Value>) {
    let Some((last, parents)) = path.split_last() else {
        if let Some(new_value) = new_value {
            *value = new_value;
        }
        return;
    };

    let mut current = value;
    for segment in parents {
        if !current.is_object() {
            if new_value.is_none() {
                return;
            }
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if new_value.is_none() && !map.contains_key(segment) {
            return;
        }
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        if new_value.is_none() {
            return;
        }
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        match new_value {
            Some(new_value) => {
                map.insert(last.clone(), new_value);
            }
            None => {
                map.remove(last);
            }
        }
    }
}

/// Which top-level public keys a subscriber wants pushed to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFilter {
    All,
    Keys(BTreeSet<String>),
}

impl FieldFilter {
    /// Builds a filter from an optional list of `public.name` (or bare `name`) entries
    pub fn from_field_list(fields: Option<&[String]>) -> Result<Self, DataPathError> {
        let Some(fields) = fields else {
            return Ok(FieldFilter::All);
        };
        let mut keys = BTreeSet::new();
        for entry in fields {
            let name = match entry.split_once('.') {
                Some(("public", rest)) => rest,
                Some(_) => {
                    return Err(DataPathError::InvalidFilterEntry {
                        entry: entry.clone(),
                    })
                }
                None => entry.as_str(),
            };
            let top = name.split('.').next().unwrap_or_default();
            if top.is_empty() {
                return Err(DataPathError::InvalidFilterEntry {
                    entry: entry.clone(),
                });
            }
            keys.insert(top.to_string());
        }
        Ok(FieldFilter::Keys(keys))
    }

    /// Wire form: `None` for all fields, otherwise bare top-level names
    pub fn to_field_list(&self) -> Option<Vec<String>> {
        match self {
            FieldFilter::All => None,
            FieldFilter::Keys(keys) => Some(keys.iter().cloned().collect()),
        }
    }

    pub fn includes(&self, top_level: &str) -> bool {
        match self {
            FieldFilter::All => true,
            FieldFilter::Keys(keys) => keys.contains(top_level),
        }
    }

    /// Returns the subset of a public object this filter admits
    pub fn snapshot(&self, public: &Value) -> Value {
        let Some(map) = public.as_object() else {
            return Value::Object(Map::new());
        };
        match self {
            FieldFilter::All => Value::Object(map.clone()),
            FieldFilter::Keys(keys) => Value::Object(
                map.iter()
                    .filter(|(key, _)| keys.contains(key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
        }
    }
}
