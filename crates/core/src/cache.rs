use std::{collections::HashMap, sync::Arc};

use tracing::{debug, warn};

use crate::{
    error::Result,
    store::KvStore,
    types::{AdSegment, VideoId},
};

/// Get the store key for a video's cached segment
pub fn cache_key(video_id: &VideoId) -> String {
    format!("bvid-{}", video_id)
}

/// One inferred segment per video, kept for good.
#[derive(Clone)]
pub struct SegmentCache {
    store: Arc<dyn KvStore>,
}

impl SegmentCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, video_id: &VideoId) -> Result<Option<AdSegment>> {
        let key = cache_key(video_id);
        let mut values = self.store.get(&[key.as_str()]).await?;
        let Some(value) = values.remove(&key) else {
            return Ok(None);
        };

        match serde_json::from_value::<AdSegment>(value) {
            Ok(segment) => Ok(AdSegment::from_inferred(segment.start, segment.end)),
            Err(e) => {
                warn!(%video_id, "ignoring unreadable cache entry: {e}");
                Ok(None)
            }
        }
    }

    /// Persists `segment`; failures are logged and swallowed.
    pub async fn put(&self, video_id: &VideoId, segment: AdSegment) {
        let value = match serde_json::to_value(segment) {
            Ok(value) => value,
            Err(e) => {
                warn!(%video_id, "could not encode segment: {e}");
                return;
            }
        };

        match self
            .store
            .set(HashMap::from([(cache_key(video_id), value)]))
            .await
        {
            Ok(()) => debug!(%video_id, "saved segment to cache"),
            Err(e) => warn!(%video_id, "failed to save segment to cache: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn put_then_get_round_trips() -> anyhow::Result<()> {
        let cache = SegmentCache::new(Arc::new(MemoryStore::new()));
        let id = VideoId::new("BV1GJ411x7h7");
        let segment = AdSegment::from_inferred(170.0, 0.0).unwrap();

        cache.put(&id, segment).await;
        assert_eq!(cache.get(&id).await?, Some(segment));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_video_is_absent() -> anyhow::Result<()> {
        let cache = SegmentCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.get(&VideoId::new("BV1never00000")).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn sentinel_is_cached_like_any_segment() -> anyhow::Result<()> {
        let cache = SegmentCache::new(Arc::new(MemoryStore::new()));
        let id = VideoId::new("BV1noad000000");

        cache.put(&id, AdSegment::NONE).await;
        let cached = cache.get(&id).await?.unwrap();
        assert!(cached.is_sentinel());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_entries_read_as_absent() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let id = VideoId::new("BV1garbage000");
        store
            .set(HashMap::from([(cache_key(&id), json!("not a segment"))]))
            .await?;

        let cache = SegmentCache::new(store);
        assert_eq!(cache.get(&id).await?, None);
        Ok(())
    }
}
