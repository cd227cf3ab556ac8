use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{CatalogIndex, Frame, ImageHandle, ImageRegistry},
    error::TransferFailure,
    protocol::{ApiPayload, SwapPhotoRequest},
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod encode;
pub mod http;

pub use http::HttpSwapApi;

pub type SubmitOutcome = std::result::Result<ImageHandle, TransferFailure>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer manager was cancelled and not rearmed before {operation}")]
    NotRearmed { operation: &'static str },
}

/// Remote catalog and swap service.
///
/// Every `Err` is a transport-level failure; a text answer from the swap
/// endpoints is a successful call carrying [`ApiPayload::Text`].
#[async_trait]
pub trait SwapApi: Send + Sync {
    async fn images_count(&self) -> Result<u32>;
    async fn image(&self, index: CatalogIndex) -> Result<Vec<u8>>;
    async fn swap_indexes(&self, first: CatalogIndex, second: CatalogIndex)
        -> Result<ApiPayload>;
    async fn swap_photo(&self, request: SwapPhotoRequest) -> Result<ApiPayload>;
}

/// Issues cancellable catalog fetches and swap submissions.
///
/// Completions run on the spawned task and are dropped once the manager has
/// been cancelled after the operation was issued.
pub struct TransferManager {
    api: Arc<dyn SwapApi>,
    registry: ImageRegistry,
    epoch: Arc<AtomicU64>,
    cancelled: AtomicBool,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

struct CompletionGate {
    epoch: Arc<AtomicU64>,
    issued_at: u64,
    operation: &'static str,
}

impl CompletionGate {
    fn is_current(&self) -> bool {
        let current = self.epoch.load(Ordering::Acquire) == self.issued_at;
        if !current {
            debug!(operation = self.operation, "dropping completion of cancelled transfer");
        }
        current
    }
}

impl TransferManager {
    pub fn new(api: Arc<dyn SwapApi>, registry: ImageRegistry) -> Self {
        Self {
            api,
            registry,
            epoch: Arc::new(AtomicU64::new(0)),
            cancelled: AtomicBool::new(false),
            inflight: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &ImageRegistry {
        &self.registry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fetches the image count, then every image one at a time in index order.
    pub fn fetch_catalog<F>(&self, on_done: F) -> std::result::Result<(), TransferError>
    where
        F: FnOnce(Option<Vec<ImageHandle>>) + Send + 'static,
    {
        let gate = self.gate("fetch_catalog")?;
        let api = Arc::clone(&self.api);
        let registry = self.registry.clone();
        self.track(async move {
            let result = fetch_catalog_items(api.as_ref(), &registry).await;
            if !gate.is_current() {
                return;
            }
            match result {
                Ok(items) => {
                    info!(count = items.len(), "catalog loaded");
                    on_done(Some(items));
                }
                Err(err) => {
                    warn!("catalog fetch failed: {err:#}");
                    on_done(None);
                }
            }
        });
        Ok(())
    }

    pub fn submit_by_frame<F>(
        &self,
        frame: Frame,
        partner: CatalogIndex,
        on_done: F,
    ) -> std::result::Result<(), TransferError>
    where
        F: FnOnce(SubmitOutcome) + Send + 'static,
    {
        let gate = self.gate("submit_by_frame")?;
        let api = Arc::clone(&self.api);
        let registry = self.registry.clone();
        self.track(async move {
            let outcome = match encode::encode_jpeg(&frame) {
                Ok(encoded) => {
                    let request = SwapPhotoRequest::new(partner, &frame, encoded);
                    classify_payload(api.swap_photo(request).await, &registry)
                }
                Err(err) => Err(TransferFailure::transport(format!("{err:#}"))),
            };
            if gate.is_current() {
                log_outcome("submit_by_frame", &outcome);
                on_done(outcome);
            }
        });
        Ok(())
    }

    pub fn submit_by_index_pair<F>(
        &self,
        first: CatalogIndex,
        second: CatalogIndex,
        on_done: F,
    ) -> std::result::Result<(), TransferError>
    where
        F: FnOnce(SubmitOutcome) + Send + 'static,
    {
        let gate = self.gate("submit_by_index_pair")?;
        let api = Arc::clone(&self.api);
        let registry = self.registry.clone();
        self.track(async move {
            let outcome = classify_payload(api.swap_indexes(first, second).await, &registry);
            if gate.is_current() {
                log_outcome("submit_by_index_pair", &outcome);
                on_done(outcome);
            }
        });
        Ok(())
    }

    /// Aborts everything in flight. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cancelled.store(true, Ordering::Release);
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let aborted = inflight.len();
        for task in inflight.drain(..) {
            task.abort();
        }
        debug!(aborted, "transfers cancelled");
    }

    pub fn rearm(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    fn gate(&self, operation: &'static str) -> std::result::Result<CompletionGate, TransferError> {
        if self.is_cancelled() {
            return Err(TransferError::NotRearmed { operation });
        }
        Ok(CompletionGate {
            epoch: Arc::clone(&self.epoch),
            issued_at: self.epoch.load(Ordering::Acquire),
            operation,
        })
    }

    fn track<Fut>(&self, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.retain(|task| !task.is_finished());
        inflight.push(handle);
    }
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        let inflight = self.inflight.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in inflight.drain(..) {
            task.abort();
        }
    }
}

// Upper bound on preallocation; the advertised count is not trusted.
const CATALOG_PREALLOC: usize = 64;

async fn fetch_catalog_items(
    api: &dyn SwapApi,
    registry: &ImageRegistry,
) -> Result<Vec<ImageHandle>> {
    let count = api
        .images_count()
        .await
        .context("failed to fetch catalog size")?;
    let mut items = Vec::with_capacity((count as usize).min(CATALOG_PREALLOC));
    for index in 1..=count {
        let bytes = api
            .image(CatalogIndex(index))
            .await
            .with_context(|| format!("failed to fetch catalog image {index}"))?;
        items.push(registry.register(bytes));
    }
    Ok(items)
}

fn classify_payload(payload: Result<ApiPayload>, registry: &ImageRegistry) -> SubmitOutcome {
    match payload {
        Ok(ApiPayload::Image(bytes)) => Ok(registry.register(bytes)),
        Ok(ApiPayload::Text(message)) => Err(TransferFailure::RemoteError(message)),
        Err(err) => Err(TransferFailure::TransportFailure(format!("{err:#}"))),
    }
}

fn log_outcome(operation: &'static str, outcome: &SubmitOutcome) {
    match outcome {
        Ok(handle) => info!(operation, image_id = %handle.id(), "swap result received"),
        Err(failure) => warn!(operation, "swap failed: {failure}"),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
