use serde_json::Value;
use uuid::Uuid;

pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

impl NullableValue {
    /// Column change for an optional text field. `None` leaves it untouched;
    /// blank strings clear it like `null` does.
    pub fn into_change(self) -> Option<Option<String>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::String(value) => {
                let trimmed = value.trim();
                Some((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
        }
    }
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// Classifies `field` of a PATCH body into a column change.
pub fn nullable_text_change(body: &Value, field: &str) -> Result<Option<Option<String>>, String> {
    classify_nullable(body.get(field))
        .map(NullableValue::into_change)
        .map_err(|err| format!("{field}: {err}"))
}

/// Like [`nullable_text_change`] for a reference column holding a UUID.
pub fn nullable_uuid_change(body: &Value, field: &str) -> Result<Option<Option<Uuid>>, String> {
    let change = nullable_text_change(body, field)?;
    change
        .map(|value| value.map(|raw| Uuid::parse_str(&raw)).transpose())
        .transpose()
        .map_err(|err| format!("{field}: {err}"))
}
