//! Generated camera and detector for running the capture path without
//! hardware.

use async_trait::async_trait;
use capture_core::{CaptureDevice, ClassifierSource, Detector, DetectorFactory, DeviceBackend};
use shared::domain::{BoundingBox, Frame};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

#[derive(Debug, Default)]
pub struct SyntheticBackend;

#[async_trait]
impl DeviceBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_supported(&self) -> bool {
        true
    }

    async fn acquire(&self) -> anyhow::Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(SyntheticCamera { tick: 0 }))
    }
}

struct SyntheticCamera {
    tick: u8,
}

impl CaptureDevice for SyntheticCamera {
    fn frame_size(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    fn read_frame(&mut self, into: &mut Frame) -> anyhow::Result<()> {
        self.tick = self.tick.wrapping_add(1);
        for (i, pixel) in into.rgba.chunks_exact_mut(4).enumerate() {
            let x = (i as u32 % WIDTH) as u8;
            let y = (i as u32 / WIDTH) as u8;
            pixel.copy_from_slice(&[x.wrapping_mul(4), y.wrapping_mul(5), self.tick, 255]);
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

pub struct SyntheticDetectors;

impl DetectorFactory for SyntheticDetectors {
    fn load(&self, classifier: &[u8]) -> anyhow::Result<Box<dyn Detector>> {
        anyhow::ensure!(!classifier.is_empty(), "empty classifier definition");
        Ok(Box::new(CenteredFace))
    }
}

/// Always reports a single face in the middle of the frame.
struct CenteredFace;

impl Detector for CenteredFace {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<BoundingBox>> {
        Ok(vec![BoundingBox {
            x: frame.width / 4,
            y: frame.height / 4,
            width: frame.width / 2,
            height: frame.height / 2,
        }])
    }
}

pub struct EmbeddedClassifier;

#[async_trait]
impl ClassifierSource for EmbeddedClassifier {
    async fn fetch(&self) -> anyhow::Result<Vec<u8>> {
        Ok(b"synthetic-frontal-face".to_vec())
    }
}
