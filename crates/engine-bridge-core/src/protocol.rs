//! Wire protocol spoken with an engine process.
//!
//! One JSON document per line. The host writes [`RequestEnvelope`]s to the
//! engine's stdin; the engine answers with [`EngineMessage`]s on its stdout.

use serde::{Deserialize, Serialize};

use crate::{
    handle::{ObjectId, RemoteHandle},
    traits::SessionId,
    value::{Primitive, RemoteFault, Value},
};

/// A value as it travels over the wire.
///
/// Objects are referenced by engine id only; the receiving session stamps
/// its own identity onto them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireValue {
    Empty,
    Bool {
        value: bool,
    },
    Integer {
        value: i64,
    },
    Number {
        value: f64,
    },
    Text {
        value: String,
    },
    Object {
        id: ObjectId,
        class: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identifier: Option<String>,
    },
}

impl WireValue {
    /// Attach the receiving session's identity.
    #[must_use]
    pub fn into_value(self, session: SessionId) -> Value {
        match self {
            Self::Empty => Value::Primitive(Primitive::Empty),
            Self::Bool { value } => Value::Primitive(Primitive::Bool(value)),
            Self::Integer { value } => Value::Primitive(Primitive::Integer(value)),
            Self::Number { value } => Value::Primitive(Primitive::Number(value)),
            Self::Text { value } => Value::Primitive(Primitive::Text(value)),
            Self::Object { id, class } => Value::Handle(RemoteHandle::new(session, id, class)),
            Self::Error {
                message,
                identifier,
            } => Value::Error(RemoteFault {
                message,
                identifier,
            }),
        }
    }
}

impl From<&Primitive> for WireValue {
    fn from(p: &Primitive) -> Self {
        match p {
            Primitive::Empty => Self::Empty,
            Primitive::Bool(value) => Self::Bool { value: *value },
            Primitive::Integer(value) => Self::Integer { value: *value },
            Primitive::Number(value) => Self::Number { value: *value },
            Primitive::Text(value) => Self::Text {
                value: value.clone(),
            },
        }
    }
}

impl From<&Value> for WireValue {
    /// Strips the session identity off handles. Callers check ownership first.
    fn from(v: &Value) -> Self {
        match v {
            Value::Primitive(p) => p.into(),
            Value::Handle(h) => Self::Object {
                id: h.object_id(),
                class: h.class_name().to_string(),
            },
            Value::Error(e) => Self::Error {
                message: e.message.clone(),
                identifier: e.identifier.clone(),
            },
        }
    }
}

/// Operation requested from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineRequest {
    /// Change the engine's working directory.
    ChangeDirectory { path: String },
    /// Evaluate a string of remote code, returning up to `nargout` values.
    Evaluate { expression: String, nargout: u32 },
    /// Call a remote function by (possibly dotted) name.
    Call {
        /// Sent as `callee`; `function` is reserved in the engine's language.
        #[serde(rename = "callee")]
        function: String,
        args: Vec<WireValue>,
        nargout: u32,
    },
    /// Bind a value in the engine workspace.
    WorkspaceSet { name: String, value: WireValue },
    /// Read a value from the engine workspace.
    WorkspaceGet { name: String },
    /// Ask the engine to exit.
    Shutdown,
}

impl EngineRequest {
    /// Short operation name for logging.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::ChangeDirectory { .. } => "change_directory",
            Self::Evaluate { .. } => "evaluate",
            Self::Call { .. } => "call",
            Self::WorkspaceSet { .. } => "workspace_set",
            Self::WorkspaceGet { .. } => "workspace_get",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Request as written to the engine, tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub request: EngineRequest,
}

/// Engine output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineOutcome {
    Ok {
        #[serde(default)]
        values: Vec<WireValue>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identifier: Option<String>,
    },
}

/// Message from the engine to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    /// Display output produced while serving a request.
    Output { stream: OutputStream, text: String },
    /// Completion of the request with the matching id.
    Response { id: u64, outcome: EngineOutcome },
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_request_shape() {
        let envelope = RequestEnvelope {
            id: 3,
            request: EngineRequest::Evaluate {
                expression: "init__()".into(),
                nargout: 0,
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            json!({"id": 3, "request": {"op": "evaluate", "expression": "init__()", "nargout": 0}})
        );

        let shutdown = serde_json::to_value(EngineRequest::Shutdown).unwrap();
        assert_eq!(shutdown, json!({"op": "shutdown"}));
    }

    #[test]
    fn test_call_carries_object_reference() {
        let session = Uuid::new_v4();
        let handle = RemoteHandle::new(session, 12, "Netabolics.Biology.Model");
        let request = EngineRequest::Call {
            function: "disp".into(),
            args: vec![WireValue::from(&Value::Handle(handle))],
            nargout: 0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["callee"], "disp");
        assert_eq!(
            json["args"][0],
            json!({"kind": "object", "id": 12, "class": "Netabolics.Biology.Model"})
        );
    }

    #[test]
    fn test_response_parsing() {
        let line = r#"{"type":"response","id":7,"outcome":{"status":"ok","values":[{"kind":"integer","value":42},{"kind":"empty"}]}}"#;
        let msg: EngineMessage = serde_json::from_str(line).unwrap();
        let EngineMessage::Response { id, outcome } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(id, 7);
        assert_eq!(
            outcome,
            EngineOutcome::Ok {
                values: vec![WireValue::Integer { value: 42 }, WireValue::Empty]
            }
        );

        let line = r#"{"type":"response","id":8,"outcome":{"status":"error","message":"Undefined function 'foo'."}}"#;
        let msg: EngineMessage = serde_json::from_str(line).unwrap();
        assert!(matches!(
            msg,
            EngineMessage::Response {
                outcome: EngineOutcome::Error { identifier: None, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_output_parsing() {
        let line = r#"{"type":"output","stream":"stdout","text":"typecode: 'SBML_MODEL'\n"}"#;
        let msg: EngineMessage = serde_json::from_str(line).unwrap();
        assert_eq!(
            msg,
            EngineMessage::Output {
                stream: OutputStream::Stdout,
                text: "typecode: 'SBML_MODEL'\n".into()
            }
        );
    }

    #[test]
    fn test_wire_object_gets_session_identity() {
        let session = Uuid::new_v4();
        let value = WireValue::Object {
            id: 4,
            class: "struct".into(),
        }
        .into_value(session);
        let handle = value.as_handle().unwrap();
        assert!(handle.belongs_to(session));
        assert_eq!(handle.object_id(), 4);
    }
}
