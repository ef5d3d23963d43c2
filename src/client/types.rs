use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GetOutcome {
    Found(String),
    NotFound,
}

impl GetOutcome {
    pub fn value(&self) -> Option<&str> {
        match self {
            GetOutcome::Found(value) => Some(value),
            GetOutcome::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}
