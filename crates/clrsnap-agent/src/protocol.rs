//! Wire message shapes for the breakpoint channel.
//!
//! Set-breakpoint messages arrive from the controlling client; snapshot
//! messages go back. Both directions reuse the same `Breakpoint` envelope,
//! as the transport does.

use serde::{Deserialize, Serialize};

pub use clrsnap_object::{StatusMessage, VariableNode as Variable};

fn is_false(value: &bool) -> bool {
    !*value
}

/// A source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// One captured stack frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub method_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locals: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Variable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

/// Breakpoint envelope, both for set requests and snapshot responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    pub location: SourceLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub activated: bool,
    /// Asks the agent to shut down instead of setting a breakpoint.
    #[serde(default, skip_serializing_if = "is_false")]
    pub kill_server: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_frames: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

impl Breakpoint {
    /// A plain set-breakpoint request, as clients send them.
    #[must_use]
    pub fn request(id: &str, path: &str, line: u32, condition: Option<&str>) -> Self {
        Self {
            id: id.to_owned(),
            location: SourceLocation {
                path: path.to_owned(),
                line,
                column: 0,
            },
            condition: condition.map(str::to_owned),
            activated: true,
            kill_server: false,
            stack_frames: Vec::new(),
            variables: Vec::new(),
            status: None,
        }
    }

    /// The shutdown request: a breakpoint message carrying the kill flag.
    #[must_use]
    pub fn kill_server(id: &str) -> Self {
        let mut message = Self::request(id, "", 0, None);
        message.activated = false;
        message.kill_server = true;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serialisation_skips_empty_collections() {
        let message = Breakpoint::request("bp-1", "App/Program.cs", 14, Some("x > 0"));
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"id\":\"bp-1\""));
        assert!(json.contains("\"condition\":\"x > 0\""));
        assert!(!json.contains("stackFrames"));
        assert!(!json.contains("status"));

        let back: Breakpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn requests_without_optional_fields_deserialize() {
        let json = r#"{"id":"b","location":{"path":"a.cs","line":3},"activated":false}"#;
        let message: Breakpoint = serde_json::from_str(json).unwrap();
        assert_eq!(message.location.column, 0);
        assert!(!message.activated);
        assert!(message.condition.is_none());
        assert!(!message.kill_server);
    }

    #[test]
    fn kill_server_flag_round_trips() {
        let message = Breakpoint::kill_server("bp-k");
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"killServer\":true"));
        let back: Breakpoint = serde_json::from_str(&json).unwrap();
        assert!(back.kill_server);

        // Ordinary requests never carry the flag on the wire.
        let plain = Breakpoint::request("bp", "a.cs", 1, None);
        assert!(!serde_json::to_string(&plain).unwrap().contains("killServer"));
    }
}
