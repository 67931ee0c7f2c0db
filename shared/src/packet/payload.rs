use serde_json::Value;

/// Body of a packet: nothing, a JSON document, or opaque bytes
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// JSON view where an empty payload reads as `null`
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Json(value) => value.clone(),
            _ => Value::Null,
        }
    }

    /// Reads a string field out of a JSON object payload
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.json()?.get(field)?.as_str()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Empty,
            value => Payload::Json(value),
        }
    }
}
