/*!
Message codec.

Every frame carries a JSON array of three elements, `[type, id, body]`:

* requests: `[0, id, [command, args, kwargs]]`;
* replies: `[1, id, result]` on success, `[2, id, result]` on failure.

The `id` correlates a reply with its request, in both directions.
*/

use serde_json::{Map, Value, json};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    Success,
    Failure,
}

/// A decoded frame payload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MessageType,
    pub id: u64,
    pub body: Value,
}

/// A request issued by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub command: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("Expecting a 3 elements array, got `{0}'")]
    NotAnEnvelope(String),
    #[error("Unknown message type `{0}'")]
    UnknownType(String),
    #[error("Message id `{0}' is not an integer")]
    InvalidId(String),
    #[error("Malformed request {id}: {reason}")]
    MalformedRequest { id: u64, reason: &'static str },
}

impl MessageType {
    pub const fn code(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Success => 1,
            Self::Failure => 2,
        }
    }

    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Request),
            1 => Some(Self::Success),
            2 => Some(Self::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// Integers may come as JSON numbers or as numeric strings.
fn as_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a frame payload into an [`Envelope`].
pub fn decode(payload: &[u8]) -> Result<Envelope, CodecError> {
    let value: Value = serde_json::from_slice(payload)?;

    let elements = match value {
        Value::Array(elements) => elements,
        other => return Err(CodecError::NotAnEnvelope(other.to_string())),
    };
    let Ok([kind, id, body]) = <[Value; 3]>::try_from(elements) else {
        return Err(CodecError::NotAnEnvelope(
            String::from_utf8_lossy(payload).into_owned(),
        ));
    };

    let kind = as_integer(&kind)
        .and_then(MessageType::from_code)
        .ok_or_else(|| CodecError::UnknownType(kind.to_string()))?;
    let id = as_integer(&id).ok_or_else(|| CodecError::InvalidId(id.to_string()))?;

    Ok(Envelope { kind, id, body })
}

impl Envelope {
    /// Interpret the body as `[command, args, kwargs]`.
    ///
    /// `args` and `kwargs` may be omitted.
    pub fn into_request(self) -> Result<Request, CodecError> {
        let id = self.id;
        let malformed = |reason| CodecError::MalformedRequest { id, reason };

        if self.kind != MessageType::Request {
            return Err(malformed("not a request"));
        }
        let Value::Array(body) = self.body else {
            return Err(malformed("body is not an array"));
        };

        let mut body = body.into_iter();
        let command = match body.next() {
            Some(Value::String(command)) => command,
            _ => return Err(malformed("missing command name")),
        };
        let args = match body.next() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(_) => return Err(malformed("positional arguments are not an array")),
        };
        let kwargs = match body.next() {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(kwargs)) => kwargs,
            Some(_) => return Err(malformed("keyword arguments are not an object")),
        };

        Ok(Request {
            id,
            command,
            args,
            kwargs,
        })
    }
}

/// Replace every empty string of the tree with `null`.
pub fn empty_strings_to_null(value: &mut Value) {
    match value {
        Value::String(text) if text.is_empty() => *value = Value::Null,
        Value::Array(values) => values.iter_mut().for_each(empty_strings_to_null),
        Value::Object(map) => map.values_mut().for_each(empty_strings_to_null),
        _ => {}
    }
}

/// Build the payload of `[kind, id, body]`.
///
/// Empty strings are sent as `null` and the payload never contains a
/// newline byte.
pub fn encode(kind: MessageType, id: u64, mut body: Value) -> Result<Vec<u8>, CodecError> {
    empty_strings_to_null(&mut body);

    let mut payload = serde_json::to_vec(&json!([kind.code(), id, body]))?;
    payload.retain(|byte| *byte != b'\n');
    Ok(payload)
}

/// Build the payload of a request originated on this side.
pub fn encode_request(
    id: u64,
    command: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Result<Vec<u8>, CodecError> {
    encode(
        MessageType::Request,
        id,
        json!([command, args, Value::Object(kwargs)]),
    )
}
