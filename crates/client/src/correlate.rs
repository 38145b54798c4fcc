//! Per-request response correlation.
//!
//! Pending requests are keyed by the generated request ID, never by command
//! name, so two in-flight `start_strategy` calls cannot swap responses.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use common::Response;

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Response>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the future its response will resolve.
    pub fn register(&self, request_id: Uuid) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(request_id, tx);
        rx
    }

    /// Resolve the pending request matching the response's echoed ID.
    /// Returns false when the response carries no ID or no one is waiting.
    pub fn fulfill(&self, response: Response) -> bool {
        let Some(request_id) = response.request_id else {
            return false;
        };
        let sender = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(&request_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop a pending request, e.g. after a timeout or failed publish.
    pub fn forget(&self, request_id: Uuid) {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(&request_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }
}
