use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use super::types::{DeleteOutcome, GetOutcome, PutOutcome};
use crate::config::ClientConfig;
use crate::error::{ClientError, ProtocolError};
use crate::protocol::{LineConnection, Request, Response, connect_node};
use crate::ring::{Metadata, NodeEntry, NodeId, ReplicaSet, hash_key};

/// Routes requests to the node owning each key, using a cached and possibly stale copy
/// of the partition map.
pub struct KvClient {
    config: ClientConfig,
    metadata: Metadata,
    /// Replica sets keyed by primary, used to spread reads.
    replicas: HashMap<NodeId, ReplicaSet>,
    connections: HashMap<NodeId, LineConnection>,
}

impl KvClient {
    /// A client that only knows `seed`, treated as owning the whole space until the
    /// first redirect.
    pub fn new(seed: SocketAddr, config: ClientConfig) -> Self {
        Self::with_metadata(Metadata::new(vec![NodeEntry::new(NodeId(seed))]), config)
    }

    pub fn with_metadata(metadata: Metadata, config: ClientConfig) -> Self {
        Self {
            config,
            metadata,
            replicas: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn cached_replicas(&self, primary: &NodeId) -> Option<&ReplicaSet> {
        self.replicas.get(primary)
    }

    pub async fn put(&mut self, key: &str, value: &str) -> Result<PutOutcome, ClientError> {
        let request = Request::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.execute(&request).await? {
            Response::PutSuccess(_) => Ok(PutOutcome::Created),
            Response::PutUpdate(_) => Ok(PutOutcome::Updated),
            Response::PutError { key, .. } => Err(ClientError::Storage { key }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<GetOutcome, ClientError> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.execute(&request).await? {
            Response::GetSuccess { value, .. } => Ok(GetOutcome::Found(value)),
            Response::GetError(_) => Ok(GetOutcome::NotFound),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete(&mut self, key: &str) -> Result<DeleteOutcome, ClientError> {
        let request = Request::Delete {
            key: key.to_string(),
        };
        match self.execute(&request).await? {
            Response::DeleteSuccess(_) => Ok(DeleteOutcome::Deleted),
            Response::DeleteError(_) => Ok(DeleteOutcome::NotFound),
            other => Err(unexpected(other)),
        }
    }

    /// Fetches the current partition map and replaces the cached one.
    pub async fn keyrange(&mut self) -> Result<Metadata, ClientError> {
        match self.execute(&Request::Keyrange).await? {
            Response::KeyrangeSuccess(metadata) => {
                self.metadata = metadata.clone();
                Ok(metadata)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Sends `request` until a node gives a final answer.
    ///
    /// `server_not_responsible` refreshes the map from the same node; `server_stopped` and
    /// `server_write_lock` back off; an unreachable node is dropped from the map and the
    /// map is refreshed from any other known node.
    async fn execute(&mut self, request: &Request) -> Result<Response, ClientError> {
        let line = request.to_string();

        for attempt in 0..self.config.max_attempts {
            let Some(target) = self.resolve(request).await else {
                return Err(ClientError::NoServerAlive);
            };
            debug!(%target, attempt, "Sending {}", line);

            let response = match self.send(target, &line).await {
                Ok(response) => response,
                Err(ClientError::Io(e)) => {
                    warn!(%target, "Node unreachable: {}", e);
                    self.evict(&target);
                    self.refresh_from_any().await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match response {
                Response::NotResponsible => {
                    info!(%target, "Node not responsible, refreshing metadata");
                    self.replicas.clear();
                    self.refresh_from(target).await;
                }
                Response::Stopped | Response::WriteLock => {
                    let delay = self.config.backoff(attempt);
                    debug!(%target, ?delay, "Node busy ({}), backing off", response);
                    tokio::time::sleep(delay).await;
                }
                other => return Ok(other),
            }
        }

        Err(ClientError::RetriesExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// Picks the node for `request`: the primary for writes, a random replica-set member
    /// for reads once the set is known.
    async fn resolve(&mut self, request: &Request) -> Option<NodeId> {
        let any = self.metadata.entries.first().map(|entry| entry.id);
        let Some(key) = request.key() else {
            return any;
        };

        let primary = self
            .metadata
            .responsible_for(hash_key(key))
            .map(|entry| entry.id)
            .or(any)?;

        if !matches!(request, Request::Get { .. }) {
            return Some(primary);
        }

        if !self.replicas.contains_key(&primary) {
            self.fetch_replicas(primary).await;
        }

        let chosen = self
            .replicas
            .get(&primary)
            .and_then(|set| set.members.choose(&mut rand::thread_rng()))
            .map(|entry| entry.id);
        Some(chosen.unwrap_or(primary))
    }

    async fn fetch_replicas(&mut self, primary: NodeId) {
        match self.send(primary, &Request::KeyrangeRead.to_string()).await {
            Ok(Response::KeyrangeReadSuccess(set)) if !set.is_empty() => {
                debug!(%primary, members = set.len(), "Cached replica set");
                self.replicas.insert(primary, set);
            }
            Ok(other) => debug!(%primary, "No replica set available: {}", other),
            Err(e) => debug!(%primary, "Unable to fetch replica set: {}", e),
        }
    }

    async fn refresh_from(&mut self, node: NodeId) {
        match self.send(node, &Request::Keyrange.to_string()).await {
            Ok(Response::KeyrangeSuccess(metadata)) if !metadata.is_empty() => {
                self.metadata = metadata;
            }
            Ok(other) => debug!(%node, "Metadata refresh refused: {}", other),
            Err(e) => warn!(%node, "Metadata refresh failed: {}", e),
        }
    }

    /// Asks every known node in turn for fresh metadata. Fails only when none of them
    /// can be reached.
    async fn refresh_from_any(&mut self) -> Result<(), ClientError> {
        let candidates: Vec<NodeId> = self.metadata.entries.iter().map(|entry| entry.id).collect();
        let mut reachable = false;

        for node in candidates {
            match self.send(node, &Request::Keyrange.to_string()).await {
                Ok(Response::KeyrangeSuccess(metadata)) if !metadata.is_empty() => {
                    info!(%node, "Metadata refreshed");
                    self.metadata = metadata;
                    return Ok(());
                }
                Ok(_) => reachable = true,
                Err(ClientError::Io(_)) => self.evict(&node),
                Err(e) => warn!(%node, "Metadata refresh failed: {}", e),
            }
        }

        if reachable {
            Ok(())
        } else {
            Err(ClientError::NoServerAlive)
        }
    }

    fn evict(&mut self, node: &NodeId) {
        self.metadata.remove(node);
        self.connections.remove(node);
        self.replicas.clear();
    }

    /// One request/response exchange, reusing a cached connection when possible.
    async fn send(&mut self, node: NodeId, line: &str) -> Result<Response, ClientError> {
        if !self.connections.contains_key(&node) {
            let conn = connect_node(node.addr()).await?;
            self.connections.insert(node, conn);
        }
        let Some(conn) = self.connections.get_mut(&node) else {
            return Err(ClientError::NoServerAlive);
        };

        match conn.request(line).await {
            Ok(reply) => Ok(reply.parse::<Response>()?),
            Err(e) => {
                self.connections.remove(&node);
                Err(e.into())
            }
        }
    }
}

fn unexpected(response: Response) -> ClientError {
    ClientError::Protocol(ProtocolError::UnknownResponse(response.to_string()))
}
