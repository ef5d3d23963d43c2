use std::fmt;
use std::str::FromStr;

use super::ECS_WELCOME;
use crate::error::ProtocolError;
use crate::ring::{Metadata, NodeEntry, ReplicaSet};

/// Messages exchanged on a node's control connection to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    // Coordinator -> node
    Welcome,
    TryAgain,
    Update(Metadata),
    /// The destination entry carries the range the source must hand over.
    InvokeTransferTo(NodeEntry),
    InvokeReceiveFrom(NodeEntry),
    ReplicaUpdate(ReplicaSet),
    Shutdown,

    // Node -> coordinator
    Add(u16),
    Remove(u16),
    ConfirmTransfer,
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Welcome => write!(f, "{}", ECS_WELCOME),
            ControlMessage::TryAgain => write!(f, "try again"),
            ControlMessage::Update(metadata) => write!(f, "update {}", metadata),
            ControlMessage::InvokeTransferTo(entry) => write!(f, "invoke transfer to {}", entry),
            ControlMessage::InvokeReceiveFrom(entry) => {
                write!(f, "invoke receive from {}", entry)
            }
            ControlMessage::ReplicaUpdate(set) => write!(f, "replica update {}", set),
            ControlMessage::Shutdown => write!(f, "shutdown"),
            ControlMessage::Add(port) => write!(f, "add {}", port),
            ControlMessage::Remove(port) => write!(f, "remove {}", port),
            ControlMessage::ConfirmTransfer => write!(f, "confirm transfer"),
        }
    }
}

impl FromStr for ControlMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();

        if line == ECS_WELCOME {
            return Ok(ControlMessage::Welcome);
        }
        match line {
            "try again" => return Ok(ControlMessage::TryAgain),
            "shutdown" => return Ok(ControlMessage::Shutdown),
            "confirm transfer" => return Ok(ControlMessage::ConfirmTransfer),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("invoke transfer to") {
            return Ok(ControlMessage::InvokeTransferTo(rest.parse()?));
        }
        if let Some(rest) = line.strip_prefix("invoke receive from") {
            return Ok(ControlMessage::InvokeReceiveFrom(rest.parse()?));
        }
        if let Some(rest) = line.strip_prefix("replica update") {
            return Ok(ControlMessage::ReplicaUpdate(rest.parse()?));
        }
        if let Some(rest) = line.strip_prefix("update") {
            return Ok(ControlMessage::Update(rest.parse()?));
        }
        if let Some(rest) = line.strip_prefix("add ") {
            return parse_port(rest).map(ControlMessage::Add);
        }
        if let Some(rest) = line.strip_prefix("remove ") {
            return parse_port(rest).map(ControlMessage::Remove);
        }

        Err(ProtocolError::UnknownControl(line.to_string()))
    }
}

fn parse_port(s: &str) -> Result<u16, ProtocolError> {
    s.trim()
        .parse()
        .map_err(|_| ProtocolError::MalformedAddress(s.to_string()))
}
