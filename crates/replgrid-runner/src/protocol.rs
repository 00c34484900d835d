//! Session wire protocol.
//!
//! Every control message is a JSON text frame tagged by `event`. Requests
//! expecting a reply carry an `ack` id which the server echoes back. Shell
//! output travels as binary frames holding the raw pty bytes.

use serde::{Deserialize, Serialize};

use replgrid_core::FileNode;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    RequestTerminal,
    TerminalData { data: String },
    ResizeTerminal { cols: u16, rows: u16 },
    FetchDir {
        ack: u64,
        #[serde(default)]
        path: String,
    },
    FetchContent { ack: u64, path: String },
    UpdateContent { path: String, content: String },
    RefreshFiles { ack: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    Loaded {
        #[serde(rename = "rootContent")]
        root_content: Vec<FileNode>,
    },
    Ack { ack: u64, result: serde_json::Value },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
        message: String,
    },
    TerminalExit,
}

impl ServerMessage {
    pub fn error(ack: Option<u64>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            ack,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"error","message":"encode"}"#.to_string())
    }
}
