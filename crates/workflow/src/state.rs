use shared::domain::{CatalogIndex, Frame, ImageHandle, ImageView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    DetectingDevice,
    ShowingDetectionResult,
    LoadingCatalog,
    AwaitingSelection,
    ShowingCapturePreview,
    ShowingCapturedFrame,
    Submitting,
    ShowingResult,
    ShowingError,
    Terminated,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        self == WorkflowState::Terminated
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounts {
    pub transport_errors: u32,
    pub detection_errors: u32,
}

/// Everything the machine tracks besides its current state.
#[derive(Debug)]
pub struct OrchestratorContext {
    pub(crate) device_available: bool,
    pub(crate) api_healthy: bool,
    pub(crate) error_counts: ErrorCounts,
    pub(crate) catalog_items: Vec<ImageHandle>,
    pub(crate) selected_indexes: Vec<CatalogIndex>,
    pub(crate) result_handle: Option<ImageHandle>,
    pub(crate) error_message: Option<String>,
    pub(crate) captured_frame: Option<Frame>,
    pub(crate) faces_on_camera: usize,
    pub(crate) camera_ready: bool,
    pub(crate) capture_started: bool,
    pub(crate) timer_epoch: u64,
    pub(crate) submission: u64,
}

impl Default for OrchestratorContext {
    fn default() -> Self {
        Self {
            device_available: false,
            api_healthy: true,
            error_counts: ErrorCounts::default(),
            catalog_items: Vec::new(),
            selected_indexes: Vec::new(),
            result_handle: None,
            error_message: None,
            captured_frame: None,
            faces_on_camera: 0,
            camera_ready: false,
            capture_started: false,
            timer_epoch: 0,
            submission: 0,
        }
    }
}

impl OrchestratorContext {
    pub fn device_available(&self) -> bool {
        self.device_available
    }

    pub fn api_healthy(&self) -> bool {
        self.api_healthy
    }

    pub fn error_counts(&self) -> ErrorCounts {
        self.error_counts
    }

    pub fn catalog_len(&self) -> usize {
        self.catalog_items.len()
    }

    pub fn selected_indexes(&self) -> &[CatalogIndex] {
        &self.selected_indexes
    }

    pub fn result(&self) -> Option<&ImageHandle> {
        self.result_handle.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn captured_frame(&self) -> Option<&Frame> {
        self.captured_frame.as_ref()
    }

    pub fn capture_started(&self) -> bool {
        self.capture_started
    }

    /// Id of the most recently issued submission.
    pub fn submission(&self) -> u64 {
        self.submission
    }

    /// Picks allowed before the workflow moves on.
    pub fn selection_capacity(&self) -> usize {
        if self.device_available {
            1
        } else {
            2
        }
    }

    pub(crate) fn release_result(&mut self) {
        if let Some(handle) = self.result_handle.take() {
            handle.release();
        }
    }

    /// Back to an empty selection: picks, grabbed frame and result go together.
    pub(crate) fn reset_selection(&mut self) {
        self.selected_indexes.clear();
        self.captured_frame = None;
        self.release_result();
    }

    pub(crate) fn release_all(&mut self) {
        self.reset_selection();
        for handle in self.catalog_items.drain(..) {
            handle.release();
        }
    }
}

/// Immutable view published to the presentation layer after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub device_available: bool,
    pub api_healthy: bool,
    pub catalog: Vec<ImageView>,
    pub selected_indexes: Vec<CatalogIndex>,
    pub result: Option<ImageView>,
    pub error_message: Option<String>,
    pub error_counts: ErrorCounts,
    pub faces_on_camera: usize,
    pub camera_ready: bool,
    pub has_captured_frame: bool,
}

impl WorkflowSnapshot {
    pub(crate) fn capture(state: WorkflowState, ctx: &OrchestratorContext) -> Self {
        Self {
            state,
            device_available: ctx.device_available,
            api_healthy: ctx.api_healthy,
            catalog: ctx.catalog_items.iter().map(ImageHandle::view).collect(),
            selected_indexes: ctx.selected_indexes.clone(),
            result: ctx.result_handle.as_ref().map(ImageHandle::view),
            error_message: ctx.error_message.clone(),
            error_counts: ctx.error_counts,
            faces_on_camera: ctx.faces_on_camera,
            camera_ready: ctx.camera_ready,
            has_captured_frame: ctx.captured_frame.is_some(),
        }
    }
}
