//! Device lifecycle and the fixed-rate capture/detect cycle.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::domain::Frame;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    CaptureDevice, CaptureError, ClassifierCache, ClassifierSource, DetectorFactory,
    DeviceBackend, Detector,
};

pub const DEFAULT_FPS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { fps: DEFAULT_FPS }
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Detecting,
    Available,
    Unavailable,
    Streaming,
    Paused,
    Stopped,
    Released,
}

type FrameCallback = Arc<dyn Fn(usize) + Send + Sync>;

struct CaptureSession {
    phase: CapturePhase,
    device: Option<Box<dyn CaptureDevice>>,
    detector: Option<Box<dyn Detector>>,
    scratch: Option<Frame>,
    paused: bool,
    faces: usize,
    on_frame: Option<FrameCallback>,
    // Bumped by stop and release; a detection started under an older
    // generation must not install its device.
    generation: u64,
}

struct Shared {
    session: Mutex<CaptureSession>,
    cycle: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delay before the next cycle so that cycles start one interval apart.
pub(crate) fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

impl Shared {
    fn spawn_cycle(self: &Arc<Self>) {
        let mut cycle = lock(&self.cycle);
        if cycle.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *cycle = Some(tokio::spawn(run_cycles(Arc::clone(self))));
    }

    fn abort_cycle(&self) {
        if let Some(task) = lock(&self.cycle).take() {
            task.abort();
        }
    }

    fn is_cycling(&self) -> bool {
        lock(&self.cycle)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Runs one capture+detect pass. `Ok(None)` means the loop should stop
    /// quietly because the session is paused or no longer streaming.
    fn run_one_cycle(&self) -> Result<Option<(usize, FrameCallback)>, CaptureError> {
        let mut session = lock(&self.session);
        if session.paused || session.phase != CapturePhase::Streaming {
            return Ok(None);
        }
        let CaptureSession {
            device,
            detector,
            scratch,
            faces,
            on_frame,
            ..
        } = &mut *session;
        let device = device.as_mut().ok_or(CaptureError::NoDevice)?;
        let detector = detector.as_mut().ok_or(CaptureError::NoDetector)?;
        let scratch = scratch.as_mut().ok_or(CaptureError::NoDetector)?;

        device.read_frame(scratch).map_err(CaptureError::Read)?;
        let detected = detector.detect(scratch).map_err(CaptureError::Detect)?;
        *faces = detected.len();

        Ok(on_frame.as_ref().map(|callback| (*faces, Arc::clone(callback))))
    }
}

async fn run_cycles(shared: Arc<Shared>) {
    loop {
        let started = Instant::now();
        match shared.run_one_cycle() {
            Ok(Some((count, on_frame))) => on_frame(count),
            Ok(None) => return,
            Err(err) => {
                warn!("capture cycle halted: {err}");
                return;
            }
        }
        tokio::time::sleep(next_delay(shared.interval, started.elapsed())).await;
    }
}

/// Owns the capture device and cycles frame capture plus detection at a
/// fixed rate on a background task.
///
/// Every operation is non-blocking and failures are logged instead of being
/// returned; callers learn about progress only through the callbacks they
/// pass in. Must be used from within a tokio runtime.
pub struct CaptureLoop {
    shared: Arc<Shared>,
    backends: Vec<Arc<dyn DeviceBackend>>,
    detectors: Arc<dyn DetectorFactory>,
    classifier_source: Arc<dyn ClassifierSource>,
    classifier_cache: Arc<ClassifierCache>,
}

impl CaptureLoop {
    pub fn new(
        config: CaptureConfig,
        backends: Vec<Arc<dyn DeviceBackend>>,
        detectors: Arc<dyn DetectorFactory>,
        classifier_source: Arc<dyn ClassifierSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(CaptureSession {
                    phase: CapturePhase::Idle,
                    device: None,
                    detector: None,
                    scratch: None,
                    paused: false,
                    faces: 0,
                    on_frame: None,
                    generation: 0,
                }),
                cycle: Mutex::new(None),
                interval: config.frame_interval(),
            }),
            backends,
            detectors,
            classifier_source,
            classifier_cache: ClassifierCache::shared(),
        }
    }

    pub fn with_classifier_cache(mut self, cache: Arc<ClassifierCache>) -> Self {
        self.classifier_cache = cache;
        self
    }

    pub fn phase(&self) -> CapturePhase {
        lock(&self.shared.session).phase
    }

    pub fn faces_on_camera(&self) -> usize {
        lock(&self.shared.session).faces
    }

    pub fn is_cycling(&self) -> bool {
        self.shared.is_cycling()
    }

    /// Tries to acquire the device and always resolves `on_done`. A device
    /// acquired after `stop` or `release` is stopped at once and reported as
    /// unavailable.
    pub fn detect_device<F>(&self, on_done: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let generation = {
            let mut session = lock(&self.shared.session);
            session.phase = CapturePhase::Detecting;
            session.generation
        };
        let shared = Arc::clone(&self.shared);
        let backend = self
            .backends
            .iter()
            .find(|backend| backend.is_supported())
            .cloned();

        tokio::spawn(async move {
            let acquired = match backend {
                None => {
                    warn!("no device acquisition api is available on this host");
                    None
                }
                Some(backend) => match backend.acquire().await {
                    Ok(device) => {
                        info!(backend = backend.name(), "capture device acquired");
                        Some(device)
                    }
                    Err(err) => {
                        warn!(backend = backend.name(), "capture device unavailable: {err:#}");
                        None
                    }
                },
            };

            let available = {
                let mut session = lock(&shared.session);
                if session.generation != generation {
                    if let Some(mut device) = acquired {
                        device.stop();
                        info!("capture device acquired after teardown; stopped");
                    }
                    false
                } else {
                    let available = acquired.is_some();
                    session.device = acquired;
                    session.phase = if available {
                        CapturePhase::Available
                    } else {
                        CapturePhase::Unavailable
                    };
                    available
                }
            };
            on_done(available);
        });
    }

    /// Loads the detector, reports readiness, then starts cycling unless the
    /// loop was paused in the meantime.
    pub fn start<R, F>(&self, on_ready: R, on_frame_processed: F)
    where
        R: FnOnce() + Send + 'static,
        F: Fn(usize) + Send + Sync + 'static,
    {
        lock(&self.shared.session).paused = false;
        let shared = Arc::clone(&self.shared);
        let cache = Arc::clone(&self.classifier_cache);
        let source = Arc::clone(&self.classifier_source);
        let detectors = Arc::clone(&self.detectors);

        tokio::spawn(async move {
            let classifier = match cache.get_or_fetch(source.as_ref()).await {
                Ok(classifier) => classifier,
                Err(err) => {
                    error!("capture loop cannot start: {err:#}");
                    return;
                }
            };
            let mut detector = match detectors.load(&classifier) {
                Ok(detector) => detector,
                Err(err) => {
                    error!("failed to load detector: {err:#}");
                    return;
                }
            };

            let cycling = {
                let mut session = lock(&shared.session);
                let size = match (&session.device, session.phase) {
                    (_, CapturePhase::Released) => Err(CaptureError::Released),
                    (Some(device), _) => Ok(device.frame_size()),
                    (None, _) => Err(CaptureError::NoDevice),
                };
                let (width, height) = match size {
                    Ok(size) => size,
                    Err(err) => {
                        warn!("capture loop start abandoned: {err}");
                        detector.release();
                        return;
                    }
                };
                session.detector = Some(detector);
                session.scratch = Some(Frame::blank(width, height));
                session.on_frame = Some(Arc::new(on_frame_processed));
                session.phase = if session.paused {
                    CapturePhase::Paused
                } else {
                    CapturePhase::Streaming
                };
                !session.paused
            };

            on_ready();
            if cycling {
                shared.spawn_cycle();
            }
        });
    }

    /// Drops every scheduled cycle. Idempotent; releases nothing.
    pub fn pause(&self) {
        {
            let mut session = lock(&self.shared.session);
            if !session.paused {
                debug!("capture loop paused");
            }
            session.paused = true;
            if session.phase == CapturePhase::Streaming {
                session.phase = CapturePhase::Paused;
            }
            if let Some(device) = session.device.as_mut() {
                device.pause();
            }
        }
        self.shared.abort_cycle();
    }

    /// Resumes cycling; also restarts a loop that halted on a failed cycle.
    pub fn play(&self) {
        let ready = {
            let mut session = lock(&self.shared.session);
            if session.phase == CapturePhase::Released {
                warn!("play ignored: capture session was released");
                return;
            }
            let Some(device) = session.device.as_mut() else {
                warn!("play ignored: no capture device acquired");
                return;
            };
            device.resume();
            session.paused = false;
            let ready = session.detector.is_some();
            if ready {
                session.phase = CapturePhase::Streaming;
            }
            ready
        };
        if ready {
            self.shared.spawn_cycle();
        }
    }

    /// Halts cycling and stops the device stream. Safe to call at any time.
    pub fn stop(&self) {
        self.shared.abort_cycle();
        let mut session = lock(&self.shared.session);
        session.paused = true;
        session.generation += 1;
        if let Some(mut device) = session.device.take() {
            device.stop();
            info!("capture device stopped");
        }
        if session.phase != CapturePhase::Released {
            session.phase = CapturePhase::Stopped;
        }
    }

    /// Grabs one frame into a fresh buffer, independent of the cycle.
    pub fn capture(&self) -> Option<Frame> {
        let mut session = lock(&self.shared.session);
        let Some(device) = session.device.as_mut() else {
            warn!("capture failed: {}", CaptureError::NoDevice);
            return None;
        };
        let (width, height) = device.frame_size();
        let mut frame = Frame::blank(width, height);
        match device.read_frame(&mut frame) {
            Ok(()) => Some(frame),
            Err(err) => {
                warn!("capture failed: {}", CaptureError::Read(err));
                None
            }
        }
    }

    /// Releases the detector and scratch buffers. The device stream is left
    /// to [`CaptureLoop::stop`].
    pub fn release(&self) {
        self.shared.abort_cycle();
        let mut session = lock(&self.shared.session);
        session.generation += 1;
        if let Some(mut detector) = session.detector.take() {
            detector.release();
        }
        session.scratch = None;
        session.on_frame = None;
        session.phase = CapturePhase::Released;
    }
}

#[cfg(test)]
#[path = "tests/capture_loop_tests.rs"]
mod tests;
