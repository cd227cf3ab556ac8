use std::fmt::Write as _;

use workflow::{events, WorkflowSnapshot, WorkflowState};

/// One human-readable block per published snapshot.
pub fn describe(snapshot: &WorkflowSnapshot) -> String {
    let mut out = format!("[{:?}]", snapshot.state);
    match snapshot.state {
        WorkflowState::DetectingDevice => out.push_str(" looking for a camera..."),
        WorkflowState::ShowingDetectionResult => {
            let _ = write!(out, " {}", events::detection_result_message(snapshot.device_available));
        }
        WorkflowState::LoadingCatalog => out.push_str(" loading images..."),
        WorkflowState::AwaitingSelection => {
            let _ = write!(
                out,
                " {} catalog: 1..={}",
                events::selection_prompt(snapshot.device_available),
                snapshot.catalog.len()
            );
        }
        WorkflowState::ShowingCapturePreview => {
            let camera = if snapshot.camera_ready { "ready" } else { "starting" };
            let _ = write!(
                out,
                " camera {camera}, faces: {}; type `capture`",
                snapshot.faces_on_camera
            );
        }
        WorkflowState::ShowingCapturedFrame => {
            let grabbed = if snapshot.has_captured_frame { "grabbed" } else { "grabbing" };
            let _ = write!(out, " frame {grabbed}; `confirm` or `discard`");
        }
        WorkflowState::Submitting => out.push_str(" swapping..."),
        WorkflowState::ShowingResult => {
            if let Some(result) = &snapshot.result {
                let _ = write!(
                    out,
                    " result image #{} ({} bytes); type `restart`",
                    result.id,
                    result.bytes.len()
                );
            }
        }
        WorkflowState::ShowingError | WorkflowState::Terminated => {}
    }

    if !snapshot.selected_indexes.is_empty() {
        let picks: Vec<String> = snapshot
            .selected_indexes
            .iter()
            .map(ToString::to_string)
            .collect();
        let _ = write!(out, " selected: [{}]", picks.join(", "));
    }
    if let Some(message) = &snapshot.error_message {
        let _ = write!(out, " {message}");
    }
    out
}
