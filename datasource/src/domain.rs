pub mod options {
    /// Per-call settings. Unset fields fall back to the adapter defaults.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct CallOptions {
        pub key_prefix: Option<String>,
        pub timeout: Option<u64>, // seconds, blocking pops only
    }

    impl CallOptions {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
            self.key_prefix = Some(prefix.into());
            self
        }

        pub fn with_timeout(mut self, seconds: u64) -> Self {
            self.timeout = Some(seconds);
            self
        }
    }
}

pub mod codec {
    use serde::Serialize;
    use serde_json::{Map, Value};
    use shared::Result;

    /// Strings are stored raw, everything else as compact JSON.
    pub fn prepare_string<T>(value: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_value(value)? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Flatten a structured value into string fields.
    ///
    /// Arrays become a single `value` field holding their JSON text. Object
    /// fields that are not strings are JSON-encoded; string fields are kept.
    /// Anything else is returned unchanged.
    pub fn prepare_hash(data: &Value) -> Value {
        match data {
            Value::Array(_) => {
                let mut obj = Map::new();
                obj.insert("value".to_string(), Value::String(data.to_string()));
                Value::Object(obj)
            }
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| {
                        let flat = match v {
                            Value::String(_) => v.clone(),
                            other => Value::String(other.to_string()),
                        };
                        (k.clone(), flat)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Inverse of [`prepare_hash`]: string fields are parsed back as JSON.
    ///
    /// A string field that is not valid JSON is kept as a string.
    pub fn parse_hash(data: &Value) -> Value {
        match data {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| {
                        let parsed = match v {
                            Value::String(raw) => {
                                tracing::debug!("[ parse HASH ] Value: {}", raw);
                                serde_json::from_str(raw).unwrap_or_else(|_| v.clone())
                            }
                            other => other.clone(),
                        };
                        (k.clone(), parsed)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

}
