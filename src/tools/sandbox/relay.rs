//! Worker-side correlation table for capability relays.
//!
//! Each outstanding `uploadFile` request owns one entry mapping its
//! `RequestId` to the oneshot that resumes the waiting tool code. The
//! receive loop resolves entries as responses arrive, in any order.
//! Entries are bounded in number and expire, so a response that never
//! comes cannot pin memory.

use super::config::RelayConfig;
use super::protocol::{UploadFileResponse, UploadResult};
use crate::tools::error::ToolError;
use crate::types::RequestId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

type Resolution = Result<UploadResult, String>;

#[derive(Debug)]
struct Pending {
    resolver: oneshot::Sender<Resolution>,
    deadline: Instant,
}

/// Bounded map of in-flight relays.
#[derive(Debug)]
pub struct RelayTable {
    config: RelayConfig,
    pending: Mutex<HashMap<RequestId, Pending>>,
}

impl RelayTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of relays awaiting a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn register(&self) -> Result<(RequestId, oneshot::Receiver<Resolution>), ToolError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ToolError::internal("relay table poisoned"))?;

        let now = Instant::now();
        pending.retain(|id, entry| {
            let live = entry.deadline > now && !entry.resolver.is_closed();
            if !live {
                tracing::debug!(request_id = %id, "Dropping expired relay");
            }
            live
        });

        if pending.len() >= self.config.max_pending {
            return Err(ToolError::relay_failed(format!(
                "too many pending uploads ({})",
                self.config.max_pending
            )));
        }

        let id = RequestId::new();
        let (resolver, receiver) = oneshot::channel();
        pending.insert(
            id.clone(),
            Pending {
                resolver,
                deadline: now + self.config.response_timeout,
            },
        );
        Ok((id, receiver))
    }

    fn remove(&self, id: &RequestId) -> Option<Pending> {
        self.pending.lock().ok().and_then(|mut p| p.remove(id))
    }

    /// Runs one relay: registers an id, hands it to `send`, then waits
    /// for the matching response.
    ///
    /// Only the calling task is suspended; the receive loop keeps
    /// resolving other entries meanwhile.
    ///
    /// # Errors
    ///
    /// Fails when the table is full, `send` fails, the host reports an
    /// error, or no response arrives within the response timeout.
    pub async fn call<F>(&self, send: F) -> Result<UploadResult, ToolError>
    where
        F: FnOnce(RequestId) -> Result<(), ToolError>,
    {
        let (id, receiver) = self.register()?;

        if let Err(e) = send(id.clone()) {
            self.remove(&id);
            return Err(e.with_request(id));
        }

        match tokio::time::timeout(self.config.response_timeout, receiver).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(reason))) => Err(ToolError::relay_failed(reason).with_request(id)),
            Ok(Err(_)) => Err(ToolError::relay_failed("relay dropped before a response arrived")
                .with_request(id)),
            Err(_) => {
                self.remove(&id);
                Err(ToolError::relay_failed(format!(
                    "no response within {} ms",
                    self.config.response_timeout.as_millis()
                ))
                .with_request(id))
            }
        }
    }

    /// Resolves the entry a response belongs to.
    ///
    /// Returns false when no live entry matches; such responses are
    /// dropped.
    pub fn resolve(&self, response: UploadFileResponse) -> bool {
        let id = response.id.clone();
        let Some(entry) = self.remove(&id) else {
            tracing::debug!(request_id = %id, "Dropping response for unknown relay");
            return false;
        };
        if entry.deadline <= Instant::now() {
            tracing::debug!(request_id = %id, "Dropping response for expired relay");
            return false;
        }
        entry.resolver.send(response.into_result()).is_ok()
    }
}
