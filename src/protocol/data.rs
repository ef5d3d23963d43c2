use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::ring::{Metadata, ReplicaSet};

/// A data-path command sent to a node's client port.
///
/// `put` and `delete` are also the record format of migration and replication streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Keyrange,
    KeyrangeRead,
}

impl Request {
    /// Parses a request line. Argument errors come back as the `error ...` response the
    /// node should answer with.
    pub fn parse(line: &str) -> Result<Request, Response> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parts: Vec<&str> = line.splitn(3, ' ').collect();
        let command = parts[0];

        match command {
            "put" => {
                if parts.len() < 3 {
                    return Err(Response::Error("too few arguments for put".to_string()));
                }
                Ok(Request::Put {
                    key: parts[1].to_string(),
                    value: parts[2].to_string(),
                })
            }
            "get" | "delete" => match parts.len() {
                0 | 1 => Err(Response::Error(format!("too few arguments for {}", command))),
                2 if command == "get" => Ok(Request::Get {
                    key: parts[1].to_string(),
                }),
                2 => Ok(Request::Delete {
                    key: parts[1].to_string(),
                }),
                _ => Err(Response::Error(format!("too many arguments for {}", command))),
            },
            "keyrange" => Ok(Request::Keyrange),
            "keyrange_read" => Ok(Request::KeyrangeRead),
            other => Err(Response::Error(format!("unknown command {}", other))),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Request::Put { .. } | Request::Delete { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Request::Put { key, .. } | Request::Get { key } | Request::Delete { key } => Some(key),
            Request::Keyrange | Request::KeyrangeRead => None,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Put { key, value } => write!(f, "put {} {}", key, value),
            Request::Get { key } => write!(f, "get {}", key),
            Request::Delete { key } => write!(f, "delete {}", key),
            Request::Keyrange => write!(f, "keyrange"),
            Request::KeyrangeRead => write!(f, "keyrange_read"),
        }
    }
}

/// The single response line a node answers each request with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    PutSuccess(String),
    PutUpdate(String),
    PutError { key: String, value: String },
    GetSuccess { key: String, value: String },
    GetError(String),
    DeleteSuccess(String),
    DeleteError(String),
    KeyrangeSuccess(Metadata),
    KeyrangeReadSuccess(ReplicaSet),
    NotResponsible,
    WriteLock,
    Stopped,
    Error(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::PutSuccess(key) => write!(f, "put_success {}", key),
            Response::PutUpdate(key) => write!(f, "put_update {}", key),
            Response::PutError { key, value } => write!(f, "put_error {} {}", key, value),
            Response::GetSuccess { key, value } => write!(f, "get_success {} {}", key, value),
            Response::GetError(key) => write!(f, "get_error {}", key),
            Response::DeleteSuccess(key) => write!(f, "delete_success {}", key),
            Response::DeleteError(key) => write!(f, "delete_error {}", key),
            Response::KeyrangeSuccess(metadata) => write!(f, "keyrange_success {}", metadata),
            Response::KeyrangeReadSuccess(set) => write!(f, "keyrange_read_success {}", set),
            Response::NotResponsible => write!(f, "server_not_responsible"),
            Response::WriteLock => write!(f, "server_write_lock"),
            Response::Stopped => write!(f, "server_stopped"),
            Response::Error(message) => write!(f, "error {}", message),
        }
    }
}

impl FromStr for Response {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (status, rest) = line.split_once(' ').unwrap_or((line, ""));

        let key_value = |rest: &str| -> (String, String) {
            let (key, value) = rest.split_once(' ').unwrap_or((rest, ""));
            (key.to_string(), value.to_string())
        };

        let response = match status {
            "put_success" => Response::PutSuccess(rest.to_string()),
            "put_update" => Response::PutUpdate(rest.to_string()),
            "put_error" => {
                let (key, value) = key_value(rest);
                Response::PutError { key, value }
            }
            "get_success" => {
                let (key, value) = key_value(rest);
                Response::GetSuccess { key, value }
            }
            "get_error" => Response::GetError(rest.to_string()),
            "delete_success" => Response::DeleteSuccess(rest.to_string()),
            "delete_error" => Response::DeleteError(rest.to_string()),
            "keyrange_success" => Response::KeyrangeSuccess(rest.parse()?),
            "keyrange_read_success" => Response::KeyrangeReadSuccess(rest.parse()?),
            "server_not_responsible" => Response::NotResponsible,
            "server_write_lock" => Response::WriteLock,
            "server_stopped" => Response::Stopped,
            "error" => Response::Error(rest.to_string()),
            _ => return Err(ProtocolError::UnknownResponse(line.to_string())),
        };

        Ok(response)
    }
}
