//! Events fed into the workflow machine, effects it asks the runtime to run,
//! and user-facing failure messages.

use std::time::Duration;

use shared::{
    domain::{CatalogIndex, Frame, ImageHandle},
    error::TransferFailure,
};
use transfer_core::SubmitOutcome;

pub const DEVICE_FOUND: &str = "Camera detected.";
pub const DEVICE_MISSING: &str = "No camera detected, switching to image swapping.";
pub const FIRST_DETECTION_FAILURE: &str = "Your face was not detected by the server, please wait.";
pub const REPEATED_DETECTION_FAILURE: &str =
    "Face still not detected, try again facing the camera with more light.";
pub const TOO_MANY_DETECTION_FAILURES: &str =
    "Too many detection errors, please wait while we switch to image swapping.";
pub const GENERIC_FAILURE: &str = "An error occurred, please wait.";
pub const CATALOG_UNAVAILABLE: &str = "The image catalog could not be loaded.";
pub const API_UNREACHABLE: &str =
    "The swap service is unreachable, the application cannot continue.";

pub fn detection_result_message(device_available: bool) -> &'static str {
    if device_available {
        DEVICE_FOUND
    } else {
        DEVICE_MISSING
    }
}

pub fn selection_prompt(device_available: bool) -> &'static str {
    if device_available {
        "Choose one image to put your face on."
    } else {
        "Choose two images to swap their faces."
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    DetectionDelay,
    DetectionResult,
    ErrorDisplay,
}

/// Requests coming from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    PickImage(CatalogIndex),
    /// Zero-based position in the current selection.
    Unpick { position: usize },
    CaptureFrame,
    ConfirmCapture,
    DiscardCapture,
    AcknowledgeError,
    Restart,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::PickImage(_) => "pick_image",
            Intent::Unpick { .. } => "unpick",
            Intent::CaptureFrame => "capture_frame",
            Intent::ConfirmCapture => "confirm_capture",
            Intent::DiscardCapture => "discard_capture",
            Intent::AcknowledgeError => "acknowledge_error",
            Intent::Restart => "restart",
        }
    }
}

#[derive(Debug)]
pub enum Event {
    TimerFired { timer: TimerKind, epoch: u64 },
    DeviceDetected { available: bool },
    CatalogLoaded(Option<Vec<ImageHandle>>),
    CameraReady,
    FacesDetected(usize),
    FrameGrabbed(Option<Frame>),
    /// `submission` echoes the id carried by the submit effect.
    SubmissionCompleted {
        submission: u64,
        outcome: SubmitOutcome,
    },
    Intent(Intent),
    Shutdown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::TimerFired { .. } => "timer_fired",
            Event::DeviceDetected { .. } => "device_detected",
            Event::CatalogLoaded(_) => "catalog_loaded",
            Event::CameraReady => "camera_ready",
            Event::FacesDetected(_) => "faces_detected",
            Event::FrameGrabbed(_) => "frame_grabbed",
            Event::SubmissionCompleted { .. } => "submission_completed",
            Event::Intent(intent) => intent.name(),
            Event::Shutdown => "shutdown",
        }
    }
}

/// Side effects requested by a transition, executed in order by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    DetectDevice,
    ScheduleTimer {
        timer: TimerKind,
        epoch: u64,
        delay: Duration,
    },
    FetchCatalog,
    StartCapture,
    ResumeCapture,
    PauseCapture,
    CaptureFrame,
    SubmitFrame {
        submission: u64,
        frame: Frame,
        partner: CatalogIndex,
    },
    SubmitIndexPair {
        submission: u64,
        first: CatalogIndex,
        second: CatalogIndex,
    },
    CancelTransfers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    FaceNotDetected,
    Transport,
}

/// Splits submission failures into the server's "no face" answer and
/// everything else. Any other remote text counts as a transport failure.
pub fn classify_submission_failure(
    failure: &TransferFailure,
    detection_message: &str,
) -> FailureKind {
    match failure.remote_message() {
        Some(message) if message.trim().eq_ignore_ascii_case(detection_message.trim()) => {
            FailureKind::FaceNotDetected
        }
        _ => FailureKind::Transport,
    }
}
