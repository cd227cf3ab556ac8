//! Event loop that owns the machine and executes its effects against the
//! capture loop, the transfer manager and tokio timers.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use capture_core::CaptureLoop;
use shared::domain::CatalogIndex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use transfer_core::{TransferError, TransferManager};

use crate::{
    config::WorkflowConfig,
    events::{Effect, Event, Intent},
    machine::Machine,
    state::WorkflowSnapshot,
};

/// Intent entry points and the snapshot feed for the presentation layer.
#[derive(Clone)]
pub struct WorkflowHandle {
    events: mpsc::UnboundedSender<Event>,
    snapshots: watch::Receiver<WorkflowSnapshot>,
}

impl WorkflowHandle {
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn pick_image(&self, index: CatalogIndex) -> bool {
        self.dispatch(Intent::PickImage(index))
    }

    pub fn unpick(&self, position: usize) -> bool {
        self.dispatch(Intent::Unpick { position })
    }

    pub fn capture_frame(&self) -> bool {
        self.dispatch(Intent::CaptureFrame)
    }

    pub fn confirm_capture(&self) -> bool {
        self.dispatch(Intent::ConfirmCapture)
    }

    pub fn discard_capture(&self) -> bool {
        self.dispatch(Intent::DiscardCapture)
    }

    pub fn acknowledge_error(&self) -> bool {
        self.dispatch(Intent::AcknowledgeError)
    }

    pub fn restart(&self) -> bool {
        self.dispatch(Intent::Restart)
    }

    /// Asks the runtime to tear down and leave its event loop.
    pub fn shutdown(&self) -> bool {
        self.events.send(Event::Shutdown).is_ok()
    }

    fn dispatch(&self, intent: Intent) -> bool {
        match self.events.send(Event::Intent(intent)) {
            Ok(()) => {
                debug!(intent = intent.name(), "queued workflow intent");
                true
            }
            Err(_) => {
                warn!(intent = intent.name(), "workflow runtime has stopped; intent dropped");
                false
            }
        }
    }
}

// Forces the next detection count through to the machine.
const NO_FACE_COUNT: usize = usize::MAX;

pub struct WorkflowRuntime {
    machine: Machine,
    transfers: TransferManager,
    capture: CaptureLoop,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    snapshots: watch::Sender<WorkflowSnapshot>,
    last_face_count: Arc<AtomicUsize>,
    torn_down: bool,
}

impl WorkflowRuntime {
    pub fn new(
        config: WorkflowConfig,
        transfers: TransferManager,
        capture: CaptureLoop,
    ) -> (Self, WorkflowHandle) {
        let machine = Machine::new(config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(machine.snapshot());
        let handle = WorkflowHandle {
            events: events_tx.clone(),
            snapshots: snapshot_rx,
        };
        let runtime = Self {
            machine,
            transfers,
            capture,
            events_tx,
            events_rx,
            snapshots,
            last_face_count: Arc::new(AtomicUsize::new(NO_FACE_COUNT)),
            torn_down: false,
        };
        (runtime, handle)
    }

    /// Drives the workflow until shutdown. Teardown always runs before
    /// returning; the only error is a transfer issued without rearming.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let result = self.drive().await;
        self.teardown();
        result.map_err(anyhow::Error::from)
    }

    async fn drive(&mut self) -> Result<(), TransferError> {
        let effects = self.machine.start();
        self.apply(effects)?;
        self.publish();

        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, Event::Shutdown) {
                info!("workflow shutdown requested");
                break;
            }
            let name = event.name();
            let before = self.machine.state();
            let effects = self.machine.dispatch(event);
            if self.machine.state() != before {
                let to = self.machine.state();
                info!(event = name, from = ?before, ?to, "workflow transition");
            }
            self.apply(effects)?;
            self.publish();
        }
        Ok(())
    }

    fn publish(&self) {
        let next = self.machine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn apply(&mut self, effects: Vec<Effect>) -> Result<(), TransferError> {
        for effect in effects {
            self.apply_one(effect)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, effect: Effect) -> Result<(), TransferError> {
        let tx = self.events_tx.clone();
        match effect {
            Effect::DetectDevice => self.capture.detect_device(move |available| {
                let _ = tx.send(Event::DeviceDetected { available });
            }),
            Effect::ScheduleTimer {
                timer,
                epoch,
                delay,
            } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::TimerFired { timer, epoch });
                });
            }
            Effect::FetchCatalog => self.transfers.fetch_catalog(move |items| {
                let _ = tx.send(Event::CatalogLoaded(items));
            })?,
            Effect::StartCapture => {
                let frame_tx = tx.clone();
                let last_count = Arc::clone(&self.last_face_count);
                last_count.store(NO_FACE_COUNT, Ordering::Relaxed);
                self.capture.start(
                    move || {
                        let _ = tx.send(Event::CameraReady);
                    },
                    move |count| {
                        if last_count.swap(count, Ordering::Relaxed) != count {
                            let _ = frame_tx.send(Event::FacesDetected(count));
                        }
                    },
                );
            }
            Effect::ResumeCapture => {
                self.last_face_count.store(NO_FACE_COUNT, Ordering::Relaxed);
                self.capture.play();
            }
            Effect::PauseCapture => self.capture.pause(),
            Effect::CaptureFrame => {
                let frame = self.capture.capture();
                let _ = tx.send(Event::FrameGrabbed(frame));
            }
            Effect::SubmitFrame {
                submission,
                frame,
                partner,
            } => self.transfers.submit_by_frame(frame, partner, move |outcome| {
                let _ = tx.send(Event::SubmissionCompleted {
                    submission,
                    outcome,
                });
            })?,
            Effect::SubmitIndexPair {
                submission,
                first,
                second,
            } => self.transfers.submit_by_index_pair(first, second, move |outcome| {
                let _ = tx.send(Event::SubmissionCompleted {
                    submission,
                    outcome,
                });
            })?,
            Effect::CancelTransfers => {
                self.transfers.cancel();
                self.transfers.rearm();
            }
        }
        Ok(())
    }

    /// Cancels transfers, stops and releases the capture loop and every
    /// image handle. Runs at most once.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.transfers.cancel();
        self.capture.stop();
        self.capture.release();
        self.machine.teardown();
        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            debug!(event = event.name(), "event dropped during teardown");
        }
        self.publish();
        info!(
            live_images = self.transfers.registry().live_count(),
            "workflow torn down"
        );
    }
}

impl Drop for WorkflowRuntime {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
