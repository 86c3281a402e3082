//! Inbound frame validation and normalization
//!
//! Raw text frames are decoded and checked against per-type schemas before
//! any business logic runs. The envelope rejects unexpected top-level keys;
//! known payload schemas enforce required fields and enum constraints but
//! strip unknown properties so newer clients keep working against older
//! servers. A message whose `type` has no registered schema passes through
//! unmodified; routing decides whether it is unknown.
//!
//! Validation errors are `<jsonPointerPath> <message>` strings so they can
//! be concatenated into one diagnostic line.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

/// A decoded, schema-validated envelope
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: String,
    pub id: Option<String>,
    pub payload: Option<Value>,
}

/// Expected shape of one payload field
#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Str,
    Uint,
    Object,
    StrArray,
    Any,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    required: bool,
    kind: FieldKind,
}

struct MessageSchema {
    fields: Vec<FieldSpec>,
}

const CLIENT_TYPES: &[&str] = &["mobile", "web", "desktop", "other"];

static SCHEMAS: Lazy<HashMap<&'static str, MessageSchema>> = Lazy::new(|| {
    const fn field(name: &'static str, required: bool, kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name,
            required,
            kind,
        }
    }

    let mut m = HashMap::new();
    m.insert(
        "register",
        MessageSchema {
            fields: vec![
                field("name", true, FieldKind::Str),
                field("version", true, FieldKind::Str),
                field("clientType", true, FieldKind::Enum(CLIENT_TYPES)),
                field("lastSeqSeen", false, FieldKind::Uint),
            ],
        },
    );
    m.insert("getDevices", MessageSchema { fields: Vec::new() });
    m.insert("getRooms", MessageSchema { fields: Vec::new() });
    m.insert("getSnapshot", MessageSchema { fields: Vec::new() });
    m.insert("help", MessageSchema { fields: Vec::new() });
    m.insert(
        "subscribe",
        MessageSchema {
            fields: vec![
                field("deviceIds", false, FieldKind::StrArray),
                field("rooms", false, FieldKind::StrArray),
                field("capabilityTypes", false, FieldKind::StrArray),
            ],
        },
    );
    m.insert(
        "unsubscribe",
        MessageSchema {
            fields: vec![
                field("deviceIds", false, FieldKind::StrArray),
                field("rooms", false, FieldKind::StrArray),
                field("capabilityTypes", false, FieldKind::StrArray),
            ],
        },
    );
    m.insert(
        "setState",
        MessageSchema {
            fields: vec![
                field("deviceId", true, FieldKind::Str),
                field("capability", true, FieldKind::Str),
                field("state", true, FieldKind::Str),
                field("value", true, FieldKind::Any),
            ],
        },
    );
    m.insert(
        "triggerScene",
        MessageSchema {
            fields: vec![field("sceneId", true, FieldKind::Str)],
        },
    );
    m.insert(
        "saveScene",
        MessageSchema {
            fields: vec![
                field("sceneId", true, FieldKind::Str),
                field("scene", true, FieldKind::Object),
            ],
        },
    );
    m.insert(
        "deleteScene",
        MessageSchema {
            fields: vec![field("sceneId", true, FieldKind::Str)],
        },
    );
    m
});

/// A rejected frame: the collected error strings, plus the request id when
/// one could still be parsed so the `INVALID_MESSAGE` reply can mirror it
#[derive(Debug, Clone)]
pub struct InvalidFrame {
    pub id: Option<String>,
    pub errors: Vec<String>,
}

impl InvalidFrame {
    fn without_id(error: String) -> Self {
        Self {
            id: None,
            errors: vec![error],
        }
    }
}

/// Validate a raw text frame into an [`Envelope`]
///
/// Decode failure and envelope/schema violations return the collected error
/// strings; the caller reports them as one `INVALID_MESSAGE`.
pub fn validate(raw: &str) -> Result<Envelope, InvalidFrame> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| InvalidFrame::without_id(format!("/ invalid JSON: {e}")))?;

    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            return Err(InvalidFrame::without_id(
                "/ message must be an object".to_string(),
            ))
        }
    };

    let mut errors = Vec::new();

    // The envelope itself is strict: only type/id/payload are allowed.
    for key in obj.keys() {
        if !matches!(key.as_str(), "type" | "id" | "payload") {
            errors.push(format!("/ unexpected property `{key}`"));
        }
    }

    let kind = match obj.get("type") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) => {
            errors.push("/type must not be empty".to_string());
            String::new()
        }
        Some(_) => {
            errors.push("/type must be a string".to_string());
            String::new()
        }
        None => {
            errors.push("/type is required".to_string());
            String::new()
        }
    };

    let id = match obj.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("/id must be a string".to_string());
            None
        }
        None => None,
    };

    let raw_payload = match obj.get("payload") {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::Null) | None => None,
        Some(_) => {
            errors.push("/payload must be an object".to_string());
            None
        }
    };

    if !errors.is_empty() {
        return Err(InvalidFrame { id, errors });
    }

    let payload = match SCHEMAS.get(kind.as_str()) {
        Some(schema) => {
            let normalized = apply_schema(schema, raw_payload.as_ref(), &mut errors);
            if !errors.is_empty() {
                return Err(InvalidFrame { id, errors });
            }
            normalized
        }
        // No registered schema: pass through untouched.
        None => raw_payload.map(Value::Object),
    };

    Ok(Envelope { kind, id, payload })
}

/// Check a payload against a schema, collecting errors and returning the
/// normalized payload with unknown properties stripped
fn apply_schema(
    schema: &MessageSchema,
    payload: Option<&Map<String, Value>>,
    errors: &mut Vec<String>,
) -> Option<Value> {
    let empty = Map::new();
    let payload = payload.unwrap_or(&empty);
    let mut normalized = Map::new();

    for spec in &schema.fields {
        match payload.get(spec.name) {
            Some(value) => {
                if let Some(err) = check_field(spec, value) {
                    errors.push(err);
                } else {
                    normalized.insert(spec.name.to_string(), value.clone());
                }
            }
            None if spec.required => {
                errors.push(format!("/payload/{} is required", spec.name));
            }
            None => {}
        }
    }

    // Unknown properties are stripped, not rejected.
    Some(Value::Object(normalized))
}

fn check_field(spec: &FieldSpec, value: &Value) -> Option<String> {
    let path = format!("/payload/{}", spec.name);
    match spec.kind {
        FieldKind::Str => {
            if !value.is_string() {
                return Some(format!("{path} must be a string"));
            }
        }
        FieldKind::Uint => {
            if !value.is_u64() {
                return Some(format!("{path} must be a non-negative integer"));
            }
        }
        FieldKind::Object => {
            if !value.is_object() {
                return Some(format!("{path} must be an object"));
            }
        }
        FieldKind::StrArray => match value.as_array() {
            Some(items) => {
                if let Some(i) = items.iter().position(|v| !v.is_string()) {
                    return Some(format!("{path}/{i} must be a string"));
                }
            }
            None => return Some(format!("{path} must be an array of strings")),
        },
        FieldKind::Any => {}
        FieldKind::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => {}
            _ => {
                return Some(format!("{path} must be one of: {}", allowed.join(", ")));
            }
        },
    }
    None
}
