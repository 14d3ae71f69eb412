//! Cross-process data bridge
//!
//! Asks the renderer for the contents of a legacy browser-store collection and
//! waits a bounded time for the answer. Each request registers a one-shot
//! slot keyed by source name; the reply handler resolves it. On timeout or
//! cancellation the slot is removed again.
//!
//! A reply carries only the source name, so one bridge shared by several
//! users' migrations keeps a single request in flight at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::events::{DataResponse, EventBus, RendererMessage};
use crate::error::{Result, StorageError};

/// Request id plus reply slot, keyed by source name
type PendingMap = HashMap<String, (u64, oneshot::Sender<DataResponse>)>;

pub struct LegacyDataBridge {
    bus: Arc<EventBus>,
    /// Requests awaiting a renderer reply, keyed by source name
    pending: Arc<Mutex<PendingMap>>,
    next_request_id: AtomicU64,
    /// Held for the whole exchange of one request
    in_flight: AsyncMutex<()>,
    timeout: Duration,
}

impl LegacyDataBridge {
    pub fn new(bus: Arc<EventBus>, timeout: Duration) -> Self {
        Self {
            bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicU64::new(1),
            in_flight: AsyncMutex::new(()),
            timeout,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch one legacy collection with the configured timeout
    pub async fn request_legacy_data(&self, source: &str) -> Result<Value> {
        self.request_legacy_data_with_timeout(source, self.timeout)
            .await
    }

    /// Fetch one legacy collection, waiting at most `timeout` for the reply
    ///
    /// Waits for any earlier request to finish first; the timeout starts
    /// once this request has been sent.
    pub async fn request_legacy_data_with_timeout(
        &self,
        source: &str,
        timeout: Duration,
    ) -> Result<Value> {
        let _exchange = self.in_flight.lock().await;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock_pending(&self.pending)?;
            if pending.insert(source.to_string(), (request_id, tx)).is_some() {
                tracing::warn!("Replacing outstanding legacy data request for '{}'", source);
            }
        }
        let _slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            source,
            request_id,
        };

        tracing::debug!("Requesting legacy data '{}' from renderer", source);
        self.bus.emit(RendererMessage::RequestData {
            source: source.to_string(),
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => match response.error_message() {
                Some(message) => Err(StorageError::BridgeRemote {
                    source_name: source.to_string(),
                    message,
                }),
                None => Ok(response.payload),
            },
            Ok(Err(_)) => Err(StorageError::BridgeClosed(source.to_string())),
            Err(_) => {
                tracing::warn!(
                    "Renderer did not answer legacy data request '{}' within {:?}",
                    source,
                    timeout
                );
                Err(StorageError::BridgeTimeout {
                    source_name: source.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Deliver a renderer reply to the request waiting for it
    ///
    /// # Returns
    /// true if a waiting request received the reply
    pub fn handle_response(&self, response: DataResponse) -> bool {
        let Some(source) = response.source().map(str::to_string) else {
            tracing::warn!("Ignoring renderer message with kind '{}'", response.kind);
            return false;
        };

        let sender = match lock_pending(&self.pending) {
            Ok(mut pending) => pending.remove(&source),
            Err(e) => {
                tracing::error!("{}", e);
                return false;
            }
        };

        match sender {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                tracing::warn!("No pending legacy data request for '{}'", source);
                false
            }
        }
    }

    /// Parse and deliver a raw JSON reply
    pub fn handle_raw_response(&self, raw: &str) -> Result<bool> {
        let response = DataResponse::from_json(raw)?;
        Ok(self.handle_response(response))
    }

    /// Number of requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).map(|p| p.len()).unwrap_or(0)
    }
}

fn lock_pending(pending: &Mutex<PendingMap>) -> Result<MutexGuard<'_, PendingMap>> {
    pending
        .lock()
        .map_err(|e| StorageError::lock(format!("bridge pending map poisoned: {}", e)))
}

/// Removes a request's slot when the request ends, however it ends.
/// A slot registered by a newer request for the same source stays.
struct PendingSlot<'a> {
    pending: Arc<Mutex<PendingMap>>,
    source: &'a str,
    request_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending
                .get(self.source)
                .is_some_and(|(id, _)| *id == self.request_id)
            {
                pending.remove(self.source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge(timeout_ms: u64) -> Arc<LegacyDataBridge> {
        Arc::new(LegacyDataBridge::new(
            Arc::new(EventBus::new()),
            Duration::from_millis(timeout_ms),
        ))
    }

    /// Answer every request with `reply(source)`
    fn spawn_renderer<F>(bridge: &Arc<LegacyDataBridge>, reply: F)
    where
        F: Fn(&str) -> DataResponse + Send + 'static,
    {
        let mut receiver = bridge.bus().subscribe();
        let bridge = Arc::clone(bridge);
        tokio::spawn(async move {
            while let Ok(RendererMessage::RequestData { source }) = receiver.recv().await {
                bridge.handle_response(reply(&source));
            }
        });
    }

    #[tokio::test]
    async fn test_request_receives_payload() {
        let bridge = bridge(1_000);
        spawn_renderer(&bridge, |source| {
            DataResponse::new(source, json!([{ "alias": "ll", "command": "ls -la" }]))
        });

        let payload = bridge.request_legacy_data("aliases").await.unwrap();
        assert_eq!(payload[0]["alias"], "ll");
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_clears_pending_request() {
        let bridge = bridge(20);
        let err = bridge.request_legacy_data("userConfig").await.unwrap_err();

        assert!(matches!(
            err,
            StorageError::BridgeTimeout { ref source_name, timeout_ms: 20 } if source_name == "userConfig"
        ));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_marker_becomes_remote_error() {
        let bridge = bridge(1_000);
        spawn_renderer(&bridge, |source| DataResponse::error(source, "IndexedDB unavailable"));

        let err = bridge.request_legacy_data("keyValueStore").await.unwrap_err();
        match err {
            StorageError::BridgeRemote {
                source_name,
                message,
            } => {
                assert_eq!(source_name, "keyValueStore");
                assert_eq!(message, "IndexedDB unavailable");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_each_get_their_reply() {
        let bridge = bridge(1_000);
        let replies = AtomicU64::new(0);
        spawn_renderer(&bridge, move |source| {
            let n = replies.fetch_add(1, Ordering::SeqCst) + 1;
            DataResponse::new(source, json!(n))
        });

        let (first, second) = tokio::join!(
            bridge.request_legacy_data("aliases"),
            bridge.request_legacy_data("aliases")
        );

        let mut answers = vec![first.unwrap(), second.unwrap()];
        answers.sort_by_key(|v| v.as_u64());
        assert_eq!(answers, vec![json!(1), json!(2)]);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_does_not_leak() {
        let bridge = bridge(10_000);
        let request = bridge.request_legacy_data("aliases");
        let _ = tokio::time::timeout(Duration::from_millis(10), request).await;
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_unsolicited_response_is_ignored() {
        let bridge = bridge(10);
        assert!(!bridge.handle_response(DataResponse::new("aliases", json!([]))));
        assert!(!bridge
            .handle_raw_response(r#"{"kind":"request-data","source":"x"}"#)
            .unwrap());
    }
}
