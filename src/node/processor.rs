use tracing::{debug, warn};

use super::server::KvNode;
use crate::protocol::{Request, Response};
use crate::ring::{Metadata, ReplicaSet, hash_key};
use crate::storage::{KvStore, PutStatus};

impl KvNode {
    /// Answers one client line.
    ///
    /// A node without metadata answers `server_stopped`; writes during a migration or
    /// resync answer `server_write_lock`; keys outside the node's range answer
    /// `server_not_responsible`, except reads that hit a range replicated onto this node.
    pub async fn process_line(&self, line: &str) -> Response {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(response) => return response,
        };

        let guard = self.metadata.read().await;
        let Some(metadata) = guard.as_ref() else {
            return Response::Stopped;
        };

        let _permit = if request.is_write() {
            match self.write_lock.try_enter() {
                Some(permit) => Some(permit),
                None => return Response::WriteLock,
            }
        } else {
            None
        };

        match request {
            Request::Put { key, value } => self.handle_put(metadata, key, value).await,
            Request::Delete { key } => self.handle_delete(metadata, key).await,
            Request::Get { key } => self.handle_get(metadata, key),
            Request::Keyrange => Response::KeyrangeSuccess(metadata.clone()),
            Request::KeyrangeRead => {
                let replicas = self.replicas.read().await.clone();
                match replicas {
                    Some(set) => Response::KeyrangeReadSuccess(set),
                    None => Response::KeyrangeReadSuccess(
                        metadata
                            .find(&self.id())
                            .cloned()
                            .map(ReplicaSet::single)
                            .unwrap_or_default(),
                    ),
                }
            }
        }
    }

    fn owns(&self, metadata: &Metadata, key: &str) -> bool {
        metadata
            .find(&self.id())
            .is_some_and(|entry| entry.is_responsible(key))
    }

    async fn handle_put(&self, metadata: &Metadata, key: String, value: String) -> Response {
        if !self.owns(metadata, &key) {
            debug!(%key, "Key not in range");
            return Response::NotResponsible;
        }

        match self.primary.put(&key, &value) {
            Ok(status) => {
                self.journal.lock().await.push(Request::Put {
                    key: key.clone(),
                    value,
                });
                match status {
                    PutStatus::Created => Response::PutSuccess(key),
                    PutStatus::Updated => Response::PutUpdate(key),
                }
            }
            Err(e) => {
                warn!(%key, "Error while putting value: {}", e);
                Response::PutError { key, value }
            }
        }
    }

    async fn handle_delete(&self, metadata: &Metadata, key: String) -> Response {
        if !self.owns(metadata, &key) {
            return Response::NotResponsible;
        }

        if self.primary.delete(&key) {
            self.journal
                .lock()
                .await
                .push(Request::Delete { key: key.clone() });
            Response::DeleteSuccess(key)
        } else {
            Response::DeleteError(key)
        }
    }

    fn handle_get(&self, metadata: &Metadata, key: String) -> Response {
        if let Some(value) = self.primary.get(&key) {
            return Response::GetSuccess { key, value };
        }
        if self.owns(metadata, &key) {
            return Response::GetError(key);
        }

        let hash = hash_key(&key);
        let replicated_here = self.replica_sources.iter().any(|source| {
            metadata
                .find(source.key())
                .is_some_and(|entry| entry.range.contains(hash))
        });
        if !replicated_here {
            return Response::NotResponsible;
        }

        match self.replica.get(&key) {
            Some(value) => Response::GetSuccess { key, value },
            None => Response::GetError(key),
        }
    }
}
