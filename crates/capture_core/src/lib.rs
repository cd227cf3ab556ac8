use async_trait::async_trait;
use shared::domain::{BoundingBox, Frame};
use thiserror::Error;

mod capture_loop;
pub mod classifier;

pub use capture_loop::{CaptureConfig, CaptureLoop, CapturePhase};
pub use classifier::{ClassifierCache, HttpClassifierSource};

/// One way of acquiring the capture device.
///
/// Hosts register the standard API first and vendor-prefixed equivalents
/// after it; the first backend that reports itself supported is used.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &str;
    fn is_supported(&self) -> bool;
    async fn acquire(&self) -> anyhow::Result<Box<dyn CaptureDevice>>;
}

/// An acquired device stream.
pub trait CaptureDevice: Send {
    fn frame_size(&self) -> (u32, u32);
    fn read_frame(&mut self, into: &mut Frame) -> anyhow::Result<()>;
    fn pause(&mut self) {}
    fn resume(&mut self) {}
    /// Stops every underlying track; the stream is unusable afterwards.
    fn stop(&mut self);
}

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<BoundingBox>>;
    fn release(&mut self) {}
}

pub trait DetectorFactory: Send + Sync {
    fn load(&self, classifier: &[u8]) -> anyhow::Result<Box<dyn Detector>>;
}

/// Binary fetch primitive for the classifier definition.
#[async_trait]
pub trait ClassifierSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture device acquired")]
    NoDevice,
    #[error("capture session was released")]
    Released,
    #[error("no detector loaded")]
    NoDetector,
    #[error("failed to read frame: {0:#}")]
    Read(anyhow::Error),
    #[error("detection failed: {0:#}")]
    Detect(anyhow::Error),
}
