use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::publisher::StatusPublisher;
use crate::registry::BatchRegistry;
use crate::types::BatchState;

/// Background task flagging running batches that stopped updating.
///
/// Runs on a fixed interval until `shutdown` is cancelled. Flagged batches are published once, with
/// `status: stuck`. The detector never cancels a worker; a worker that resumes clears the flag with
/// its next update.
#[instrument(skip(registry, publisher, shutdown))]
pub async fn stuck_detector_task(
    registry: BatchRegistry,
    publisher: StatusPublisher,
    interval: Duration,
    threshold: Duration,
    shutdown: CancellationToken,
) {
    info!("Stuck batch detector started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stuck batch detector shutting down");
                return;
            }
            _ = ticker.tick() => {
                let flagged = check_stuck(&registry, &publisher, Utc::now(), threshold);
                if flagged > 0 {
                    debug!(flagged, "Stuck batch check complete");
                }
            }
        }
    }
}

/// Flag stale batches at `now` and publish the newly flagged ones. Returns how many were new.
pub fn check_stuck(registry: &BatchRegistry, publisher: &StatusPublisher, now: DateTime<Utc>, threshold: Duration) -> usize {
    let mut newly_flagged = 0;
    for (state, newly) in registry.mark_stale(now, threshold) {
        if newly {
            report_stuck(publisher, &state);
            newly_flagged += 1;
        }
    }
    newly_flagged
}

/// Like [`check_stuck`], but returns every flagged batch, newly flagged or not.
///
/// Whichever caller flags a batch first publishes it, so an on-demand query never swallows the
/// stream event the background task would have sent.
pub fn flag_stuck(
    registry: &BatchRegistry,
    publisher: &StatusPublisher,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Vec<BatchState> {
    registry
        .mark_stale(now, threshold)
        .into_iter()
        .map(|(state, newly)| {
            if newly {
                report_stuck(publisher, &state);
            }
            state
        })
        .collect()
}

fn report_stuck(publisher: &StatusPublisher, state: &BatchState) {
    warn!(
        batch_id = %state.batch_id,
        model = %state.current_model,
        last_update = %state.updated_at,
        "Batch has not progressed, reporting it as stuck"
    );
    publisher.publish(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::StreamMessage;
    use crate::types::{BatchConfig, BatchId, BatchStatus};
    use tokio_stream::StreamExt;

    fn stale(id: &str, minutes: i64) -> BatchState {
        let mut state = BatchState::new(BatchId::from(id), &BatchConfig::default(), "m".into());
        state.updated_at = Utc::now() - chrono::Duration::minutes(minutes);
        state
    }

    #[tokio::test]
    async fn publishes_newly_stuck_batches_once() {
        let registry = BatchRegistry::new();
        let publisher = StatusPublisher::new(registry.clone(), 16);
        registry.insert(stale("old", 10), CancellationToken::new());
        registry.insert(stale("fresh", 1), CancellationToken::new());

        let mut stream = publisher.subscribe();
        let _ = stream.next().await;

        let threshold = Duration::from_secs(300);
        assert_eq!(check_stuck(&registry, &publisher, Utc::now(), threshold), 1);
        assert_eq!(check_stuck(&registry, &publisher, Utc::now(), threshold), 0);

        match stream.next().await.unwrap() {
            StreamMessage::BatchUpdate { batch_id, batch } => {
                assert_eq!(batch_id.as_str(), "old");
                assert_eq!(batch.status, BatchStatus::Stuck);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            registry.snapshot(&BatchId::from("fresh")).unwrap().status,
            BatchStatus::Running
        );
    }

    #[tokio::test]
    async fn on_demand_flagging_publishes_before_the_detector_tick() {
        let registry = BatchRegistry::new();
        let publisher = StatusPublisher::new(registry.clone(), 16);
        let mut stream = publisher.subscribe();
        let _ = stream.next().await;

        registry.insert(stale("old", 10), CancellationToken::new());
        let threshold = Duration::from_secs(300);
        let flagged = flag_stuck(&registry, &publisher, Utc::now(), threshold);
        assert_eq!(flagged.len(), 1);

        // Already flagged, so neither path publishes again
        assert_eq!(flag_stuck(&registry, &publisher, Utc::now(), threshold).len(), 1);
        assert_eq!(check_stuck(&registry, &publisher, Utc::now(), threshold), 0);

        match stream.next().await.unwrap() {
            StreamMessage::BatchUpdate { batch_id, batch } => {
                assert_eq!(batch_id.as_str(), "old");
                assert_eq!(batch.status, BatchStatus::Stuck);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.next()).await.is_err(),
            "stuck update published twice"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn task_stops_on_shutdown() {
        let registry = BatchRegistry::new();
        let publisher = StatusPublisher::new(registry.clone(), 16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(stuck_detector_task(
            registry,
            publisher,
            Duration::from_secs(60),
            Duration::from_secs(300),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
