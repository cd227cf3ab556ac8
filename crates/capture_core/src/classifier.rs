//! Process-wide cache for the detector's classifier definition.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::info;

use crate::ClassifierSource;

/// Write-once, read-many store for the classifier bytes.
///
/// Concurrent callers race to initialize; exactly one fetch succeeds and every
/// later caller reads the stored value without touching the source. A failed
/// fetch leaves the cache empty so the next caller may retry.
#[derive(Debug, Default)]
pub struct ClassifierCache {
    cell: OnceCell<Arc<[u8]>>,
}

impl ClassifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<ClassifierCache> {
        static GLOBAL: OnceLock<Arc<ClassifierCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ClassifierCache::new())))
    }

    pub fn get(&self) -> Option<Arc<[u8]>> {
        self.cell.get().cloned()
    }

    pub async fn get_or_fetch(&self, source: &dyn ClassifierSource) -> Result<Arc<[u8]>> {
        let bytes = self
            .cell
            .get_or_try_init(|| async {
                let bytes = source
                    .fetch()
                    .await
                    .context("failed to fetch classifier definition")?;
                info!(size = bytes.len(), "classifier definition cached");
                Ok::<_, anyhow::Error>(Arc::from(bytes))
            })
            .await?;
        Ok(Arc::clone(bytes))
    }
}

pub struct HttpClassifierSource {
    http: Client,
    url: String,
}

impl HttpClassifierSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ClassifierSource for HttpClassifierSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    struct SlowSource {
        fetches: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl ClassifierSource for SlowSource {
        async fn fetch(&self) -> Result<Vec<u8>> {
            let attempt = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            if self.fail_first && attempt == 1 {
                return Err(anyhow!("connection reset"));
            }
            Ok(vec![attempt as u8])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_share_a_single_fetch() {
        let cache = Arc::new(ClassifierCache::new());
        let source = Arc::new(SlowSource {
            fetches: AtomicUsize::new(0),
            fail_first: false,
        });

        let readers = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            let source = Arc::clone(&source);
            tokio::spawn(async move { cache.get_or_fetch(source.as_ref()).await })
        });
        let results = futures::future::join_all(readers).await;

        for result in results {
            let bytes = result.expect("join").expect("classifier");
            assert_eq!(&*bytes, &[1u8]);
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get().as_deref(), Some(&[1u8][..]));
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_empty_for_retry() {
        let cache = ClassifierCache::new();
        let source = SlowSource {
            fetches: AtomicUsize::new(0),
            fail_first: true,
        };

        assert!(cache.get_or_fetch(&source).await.is_err());
        assert!(cache.get().is_none());

        let bytes = cache.get_or_fetch(&source).await.expect("second attempt");
        assert_eq!(&*bytes, &[2u8]);
        cache.get_or_fetch(&source).await.expect("cached");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
