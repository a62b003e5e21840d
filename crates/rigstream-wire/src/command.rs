//! Outbound commands

use serde::Serialize;

use rigstream_core::{RigError, RigResult};

/// Command sent to the peer to start or stop its capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

#[derive(Serialize)]
struct CommandMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    command: &'a str,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
        }
    }

    /// Encode as a single JSON line (without the trailing newline)
    pub fn encode(self) -> RigResult<String> {
        let message = CommandMessage {
            kind: "command",
            command: self.as_str(),
        };
        serde_json::to_string(&message).map_err(|e| RigError::Transport(e.to_string()))
    }
}
