//! Process-local store, used when no database is configured and in tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{DatasetStore, Result, StoreError};
use crate::types::{BatchId, BatchState, GeneratedSample};

#[derive(Default)]
struct Inner {
    samples: Vec<GeneratedSample>,
    sample_ids: HashMap<String, usize>,
    batches: HashMap<BatchId, BatchState>,
}

/// In-memory [`DatasetStore`]. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored sample in insertion order.
    pub fn samples(&self) -> Vec<GeneratedSample> {
        self.inner.read().samples.clone()
    }
}

#[async_trait]
impl DatasetStore for InMemoryStore {
    async fn append_sample(&self, sample: &GeneratedSample) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.sample_ids.contains_key(&sample.id) {
            return Err(StoreError::DuplicateSample { id: sample.id.clone() });
        }
        let index = inner.samples.len();
        inner.sample_ids.insert(sample.id.clone(), index);
        inner.samples.push(sample.clone());
        Ok(())
    }

    async fn save_batch(&self, state: &BatchState) -> Result<()> {
        self.inner.write().batches.insert(state.batch_id.clone(), state.clone());
        Ok(())
    }

    async fn get_batch(&self, batch_id: &BatchId) -> Result<BatchState> {
        self.inner
            .read()
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                batch_id: batch_id.clone(),
            })
    }

    async fn get_batch_history(&self) -> Result<Vec<BatchState>> {
        let mut batches: Vec<BatchState> = self.inner.read().batches.values().cloned().collect();
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.batch_id.cmp(&a.batch_id)));
        Ok(batches)
    }

    async fn count_samples(&self, batch_id: Option<&BatchId>) -> Result<u64> {
        let inner = self.inner.read();
        let count = match batch_id {
            Some(id) => inner.samples.iter().filter(|s| s.batch_id.as_ref() == Some(id)).count(),
            None => inner.samples.len(),
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchConfig, BatchStatus};
    use chrono::{Duration, Utc};

    fn sample(id: &str, batch: Option<&str>) -> GeneratedSample {
        GeneratedSample {
            id: id.to_string(),
            question: "Q?".to_string(),
            answer: "A.".to_string(),
            topic: "Contract Law - Formation".to_string(),
            difficulty: "basic".to_string(),
            case_citation: "Carlill v Carbolic Smoke Ball Co [1893]".to_string(),
            reasoning: "R.".to_string(),
            jurisdiction: "uk".to_string(),
            sample_type: "case_analysis".to_string(),
            batch_id: batch.map(BatchId::from),
            provider: "groq".to_string(),
            model: "m".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_sample_is_rejected() {
        let store = InMemoryStore::new();
        store.append_sample(&sample("groq_1", Some("b1"))).await.unwrap();

        let err = store.append_sample(&sample("groq_1", Some("b1"))).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSample { id } if id == "groq_1"));

        store.append_sample(&sample("groq_2", Some("b2"))).await.unwrap();
        assert_eq!(store.count_samples(None).await.unwrap(), 2);
        assert_eq!(store.count_samples(Some(&BatchId::from("b1"))).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_batch_overwrites_in_place_and_history_is_newest_first() {
        let store = InMemoryStore::new();
        let mut older = BatchState::new(BatchId::from("older"), &BatchConfig::default(), "m".into());
        older.started_at = Utc::now() - Duration::hours(1);
        let mut newer = BatchState::new(BatchId::from("newer"), &BatchConfig::default(), "m".into());

        store.save_batch(&older).await.unwrap();
        store.save_batch(&newer).await.unwrap();
        newer.generated_count = 4;
        newer.finish(BatchStatus::Completed);
        store.save_batch(&newer).await.unwrap();

        let history = store.get_batch_history().await.unwrap();
        let ids: Vec<_> = history.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(history[0].status, BatchStatus::Completed);
        assert_eq!(history[0].generated_count, 4);

        let err = store.get_batch(&BatchId::from("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
