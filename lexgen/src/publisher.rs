//! Live status fan-out for stream subscribers.
//!
//! Publishing never blocks: messages go into a bounded broadcast channel and a subscriber that
//! falls more than the channel capacity behind skips ahead. Instead of the missed events it
//! receives a fresh `all_batches` snapshot, so a slow client resynchronizes without stalling the
//! worker or other subscribers.

use futures::stream::Stream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use utoipa::ToSchema;

use crate::registry::BatchRegistry;
use crate::types::{BatchId, BatchState};

/// A message on the live status stream, discriminated by `type`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// One batch changed
    BatchUpdate { batch_id: BatchId, batch: BatchState },
    /// Every tracked batch, keyed by id
    AllBatches { batches: BTreeMap<String, BatchState> },
}

#[derive(Debug, Clone)]
pub struct StatusPublisher {
    sender: broadcast::Sender<StreamMessage>,
    registry: BatchRegistry,
}

impl StatusPublisher {
    pub fn new(registry: BatchRegistry, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, registry }
    }

    /// Broadcast a single-batch update. Having no subscribers is not an error.
    pub fn publish(&self, state: &BatchState) {
        let _ = self.sender.send(StreamMessage::BatchUpdate {
            batch_id: state.batch_id.clone(),
            batch: state.clone(),
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribe to the stream. The first message is always a full-table snapshot.
    pub fn subscribe(&self) -> Pin<Box<dyn Stream<Item = StreamMessage> + Send>> {
        // Subscribe before snapshotting so no update falls between the two
        let rx = self.sender.subscribe();
        let initial = StreamMessage::AllBatches {
            batches: self.registry.table(),
        };

        let registry = self.registry.clone();
        let updates = BroadcastStream::new(rx).map(move |result| match result {
            Ok(message) => message,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::info!(lagged_count = skipped, "Status stream subscriber lagged, resending snapshot");
                StreamMessage::AllBatches {
                    batches: registry.table(),
                }
            }
        });

        Box::pin(tokio_stream::once(initial).chain(updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchConfig;
    use tokio_util::sync::CancellationToken;

    fn state(id: &str) -> BatchState {
        BatchState::new(BatchId::from(id), &BatchConfig::default(), "m".into())
    }

    #[tokio::test]
    async fn first_message_is_full_snapshot_then_updates() {
        let registry = BatchRegistry::new();
        registry.insert(state("b1"), CancellationToken::new());
        let publisher = StatusPublisher::new(registry.clone(), 16);

        let mut stream = publisher.subscribe();
        publisher.publish(&state("b1"));

        match stream.next().await.unwrap() {
            StreamMessage::AllBatches { batches } => assert!(batches.contains_key("b1")),
            other => panic!("expected snapshot, got {other:?}"),
        }
        match stream.next().await.unwrap() {
            StreamMessage::BatchUpdate { batch_id, .. } => assert_eq!(batch_id.as_str(), "b1"),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_fresh_snapshot() {
        let registry = BatchRegistry::new();
        registry.insert(state("b1"), CancellationToken::new());
        let publisher = StatusPublisher::new(registry.clone(), 2);

        let mut stream = publisher.subscribe();
        let _ = stream.next().await;

        for _ in 0..5 {
            publisher.publish(&state("b1"));
        }

        assert!(matches!(stream.next().await.unwrap(), StreamMessage::AllBatches { .. }));
        // The newest buffered updates still follow
        assert!(matches!(stream.next().await.unwrap(), StreamMessage::BatchUpdate { .. }));
    }

    #[test]
    fn messages_carry_type_discriminator() {
        let message = StreamMessage::BatchUpdate {
            batch_id: BatchId::from("b1"),
            batch: state("b1"),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "batch_update");
        assert_eq!(json["batch"]["status"], "running");

        let json = serde_json::to_value(StreamMessage::AllBatches {
            batches: BTreeMap::new(),
        })
        .unwrap();
        assert_eq!(json["type"], "all_batches");
    }
}
