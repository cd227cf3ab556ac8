use super::*;

use shared::domain::{Frame, ImageRegistry};
use transfer_core::SubmitOutcome;

use crate::config::DEFAULT_DETECTION_ERROR_MESSAGE;

fn catalog(registry: &ImageRegistry, count: u8) -> Vec<ImageHandle> {
    (1..=count).map(|n| registry.register(vec![n; 3])).collect()
}

fn timer_of(effects: &[Effect]) -> (TimerKind, u64) {
    match effects {
        [Effect::ScheduleTimer { timer, epoch, .. }] => (*timer, *epoch),
        other => panic!("expected a single timer, got {other:?}"),
    }
}

fn fire(machine: &mut Machine, effects: &[Effect]) -> Vec<Effect> {
    let (timer, epoch) = timer_of(effects);
    machine.dispatch(Event::TimerFired { timer, epoch })
}

fn intent(machine: &mut Machine, intent: Intent) -> Vec<Effect> {
    machine.dispatch(Event::Intent(intent))
}

fn pick(machine: &mut Machine, index: u32) -> Vec<Effect> {
    intent(machine, Intent::PickImage(CatalogIndex(index)))
}

fn complete(machine: &mut Machine, outcome: SubmitOutcome) -> Vec<Effect> {
    let submission = machine.context().submission();
    machine.dispatch(Event::SubmissionCompleted {
        submission,
        outcome,
    })
}

fn at_selection(
    config: WorkflowConfig,
    device: bool,
    registry: &ImageRegistry,
    items: u8,
) -> Machine {
    let mut machine = Machine::new(config);
    assert_eq!(machine.state(), WorkflowState::DetectingDevice);

    let effects = machine.start();
    assert_eq!(fire(&mut machine, &effects), vec![Effect::DetectDevice]);

    let effects = machine.dispatch(Event::DeviceDetected { available: device });
    assert_eq!(machine.state(), WorkflowState::ShowingDetectionResult);
    assert_eq!(fire(&mut machine, &effects), vec![Effect::FetchCatalog]);
    assert_eq!(machine.state(), WorkflowState::LoadingCatalog);

    assert!(machine
        .dispatch(Event::CatalogLoaded(Some(catalog(registry, items))))
        .is_empty());
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    machine
}

fn detection_failure() -> SubmitOutcome {
    Err(TransferFailure::remote(DEFAULT_DETECTION_ERROR_MESSAGE))
}

/// Drives the device path from selection to `Submitting`.
fn submit_frame(machine: &mut Machine, index: u32) {
    let effects = pick(machine, index);
    assert!(matches!(
        &effects[..],
        [Effect::StartCapture] | [Effect::ResumeCapture]
    ));
    machine.dispatch(Event::FacesDetected(1));
    assert_eq!(intent(machine, Intent::CaptureFrame), vec![Effect::CaptureFrame]);
    machine.dispatch(Event::FrameGrabbed(Some(Frame::blank(4, 3))));
    let effects = intent(machine, Intent::ConfirmCapture);
    assert_eq!(
        effects,
        vec![
            Effect::SubmitFrame {
                submission: machine.context().submission(),
                frame: Frame::blank(4, 3),
                partner: CatalogIndex(index),
            },
            Effect::PauseCapture,
        ]
    );
    assert_eq!(machine.state(), WorkflowState::Submitting);
}

#[test]
fn device_path_captures_confirms_and_shows_result() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 6);
    assert_eq!(machine.context().catalog_len(), 6);

    assert_eq!(pick(&mut machine, 3), vec![Effect::StartCapture]);
    assert_eq!(machine.state(), WorkflowState::ShowingCapturePreview);
    machine.dispatch(Event::CameraReady);
    machine.dispatch(Event::FacesDetected(1));

    assert_eq!(intent(&mut machine, Intent::CaptureFrame), vec![Effect::CaptureFrame]);
    assert_eq!(machine.state(), WorkflowState::ShowingCapturedFrame);
    machine.dispatch(Event::FrameGrabbed(Some(Frame::blank(4, 3))));
    assert!(machine.snapshot().has_captured_frame);

    let effects = intent(&mut machine, Intent::ConfirmCapture);
    assert!(matches!(
        &effects[..],
        [Effect::SubmitFrame { partner: CatalogIndex(3), .. }, Effect::PauseCapture]
    ));

    let result = registry.register(vec![42]);
    let result_id = result.id();
    complete(&mut machine, Ok(result));
    assert_eq!(machine.state(), WorkflowState::ShowingResult);
    let snapshot = machine.snapshot();
    assert_eq!(snapshot.result.map(|view| view.id), Some(result_id));
    assert!(snapshot.camera_ready);
    assert_eq!(registry.live_count(), 7);
}

#[test]
fn no_device_path_submits_second_pick_first() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 4);

    assert!(pick(&mut machine, 2).is_empty());
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    assert_eq!(
        pick(&mut machine, 4),
        vec![Effect::SubmitIndexPair {
            submission: machine.context().submission(),
            first: CatalogIndex(4),
            second: CatalogIndex(2),
        }]
    );
    assert_eq!(machine.state(), WorkflowState::Submitting);

    complete(&mut machine, Ok(registry.register(vec![1])));
    assert_eq!(machine.state(), WorkflowState::ShowingResult);

    intent(&mut machine, Intent::Restart);
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    assert!(machine.context().selected_indexes().is_empty());
    assert!(machine.context().result().is_none());
    assert_eq!(registry.live_count(), 4);
}

#[test]
fn third_detection_failure_switches_to_image_swapping() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 3);

    let expected = [FIRST_DETECTION_FAILURE, REPEATED_DETECTION_FAILURE];
    for (attempt, message) in expected.iter().enumerate() {
        submit_frame(&mut machine, 1);
        let effects = complete(&mut machine, detection_failure());
        assert_eq!(machine.state(), WorkflowState::ShowingError);
        assert_eq!(machine.context().error_message(), Some(*message));
        assert_eq!(
            machine.context().error_counts().detection_errors,
            attempt as u32 + 1
        );
        assert!(machine.context().device_available());
        fire(&mut machine, &effects);
        assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    }

    submit_frame(&mut machine, 1);
    let effects = complete(&mut machine, detection_failure());
    assert_eq!(
        machine.context().error_message(),
        Some(TOO_MANY_DETECTION_FAILURES)
    );
    assert!(!machine.context().device_available());
    assert_eq!(machine.context().error_counts().detection_errors, 0);

    fire(&mut machine, &effects);
    assert!(pick(&mut machine, 1).is_empty());
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    assert_eq!(
        pick(&mut machine, 3),
        vec![Effect::SubmitIndexPair {
            submission: machine.context().submission(),
            first: CatalogIndex(3),
            second: CatalogIndex(1),
        }]
    );
}

#[test]
fn detection_message_match_ignores_case_and_whitespace() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 1);
    submit_frame(&mut machine, 1);
    let answer = TransferFailure::remote("  Face Not Detected In Submitted Photo\n");
    complete(&mut machine, Err(answer));
    assert_eq!(machine.context().error_counts().detection_errors, 1);
    assert_eq!(machine.context().error_counts().transport_errors, 0);
}

#[test]
fn catalog_failure_terminates_without_selection() {
    let mut machine = Machine::new(WorkflowConfig::default());
    let effects = machine.start();
    fire(&mut machine, &effects);
    let effects = machine.dispatch(Event::DeviceDetected { available: false });
    fire(&mut machine, &effects);

    assert!(machine.dispatch(Event::CatalogLoaded(None)).is_empty());
    assert_eq!(machine.state(), WorkflowState::Terminated);
    assert!(!machine.context().api_healthy());
    assert_eq!(machine.context().error_message(), Some(CATALOG_UNAVAILABLE));
}

#[test]
fn unpick_while_submitting_cancels_and_ignores_late_completion() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 4);
    pick(&mut machine, 1);
    pick(&mut machine, 2);
    assert_eq!(machine.state(), WorkflowState::Submitting);

    assert_eq!(
        intent(&mut machine, Intent::Unpick { position: 0 }),
        vec![Effect::CancelTransfers]
    );
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    assert_eq!(machine.context().selected_indexes(), &[CatalogIndex(2)]);

    let before = machine.snapshot();
    assert!(complete(&mut machine, Ok(registry.register(vec![9]))).is_empty());
    assert_eq!(machine.snapshot(), before);
    assert_eq!(registry.live_count(), 4);
}

#[test]
fn completion_of_superseded_submission_is_ignored_after_repick() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 4);
    pick(&mut machine, 1);
    pick(&mut machine, 2);
    let cancelled = machine.context().submission();
    intent(&mut machine, Intent::Unpick { position: 0 });

    pick(&mut machine, 3);
    assert_eq!(machine.state(), WorkflowState::Submitting);
    assert_ne!(machine.context().submission(), cancelled);

    let late = machine.dispatch(Event::SubmissionCompleted {
        submission: cancelled,
        outcome: Ok(registry.register(vec![9])),
    });
    assert!(late.is_empty());
    assert_eq!(machine.state(), WorkflowState::Submitting);
    assert!(machine.context().result().is_none());
    assert_eq!(registry.live_count(), 4);

    complete(&mut machine, Ok(registry.register(vec![7])));
    assert_eq!(machine.state(), WorkflowState::ShowingResult);
    assert_eq!(registry.live_count(), 5);
}

#[test]
fn unpick_while_submitting_frame_also_pauses_capture() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 2);
    submit_frame(&mut machine, 2);

    assert_eq!(
        intent(&mut machine, Intent::Unpick { position: 0 }),
        vec![Effect::CancelTransfers, Effect::PauseCapture]
    );
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    assert!(machine.context().selected_indexes().is_empty());

    assert_eq!(pick(&mut machine, 1), vec![Effect::ResumeCapture]);
}

#[test]
fn unpick_from_preview_discards_frame_and_pauses() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 2);
    pick(&mut machine, 1);
    machine.dispatch(Event::FacesDetected(1));
    intent(&mut machine, Intent::CaptureFrame);
    machine.dispatch(Event::FrameGrabbed(Some(Frame::blank(4, 3))));

    assert_eq!(
        intent(&mut machine, Intent::Unpick { position: 0 }),
        vec![Effect::PauseCapture]
    );
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
    assert!(machine.context().captured_frame().is_none());
}

#[test]
fn discard_returns_to_preview_and_confirm_requires_a_frame() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 2);
    pick(&mut machine, 1);
    machine.dispatch(Event::FacesDetected(1));
    intent(&mut machine, Intent::CaptureFrame);

    machine.dispatch(Event::FrameGrabbed(None));
    assert!(intent(&mut machine, Intent::ConfirmCapture).is_empty());
    assert_eq!(machine.state(), WorkflowState::ShowingCapturedFrame);

    assert!(intent(&mut machine, Intent::DiscardCapture).is_empty());
    assert_eq!(machine.state(), WorkflowState::ShowingCapturePreview);
}

#[test]
fn capture_requires_exactly_one_face_when_configured() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), true, &registry, 1);
    pick(&mut machine, 1);

    machine.dispatch(Event::FacesDetected(0));
    assert!(intent(&mut machine, Intent::CaptureFrame).is_empty());
    machine.dispatch(Event::FacesDetected(2));
    assert!(intent(&mut machine, Intent::CaptureFrame).is_empty());
    assert_eq!(machine.state(), WorkflowState::ShowingCapturePreview);

    let relaxed = WorkflowConfig {
        require_single_face: false,
        ..WorkflowConfig::default()
    };
    let mut machine = at_selection(relaxed, true, &registry, 1);
    pick(&mut machine, 1);
    assert_eq!(intent(&mut machine, Intent::CaptureFrame), vec![Effect::CaptureFrame]);
}

#[test]
fn transport_ceiling_terminates_for_good() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 3);

    pick(&mut machine, 1);
    pick(&mut machine, 2);
    let refused = TransferFailure::transport("connection refused");
    let effects = complete(&mut machine, Err(refused));
    assert_eq!(machine.state(), WorkflowState::ShowingError);
    assert_eq!(machine.context().error_message(), Some(GENERIC_FAILURE));
    fire(&mut machine, &effects);

    pick(&mut machine, 1);
    pick(&mut machine, 3);
    let effects = complete(&mut machine, Err(TransferFailure::remote("internal server error")));
    assert!(effects.is_empty());
    assert_eq!(machine.state(), WorkflowState::Terminated);
    assert!(!machine.context().api_healthy());
    assert_eq!(machine.context().error_message(), Some(API_UNREACHABLE));

    assert!(pick(&mut machine, 1).is_empty());
    assert!(intent(&mut machine, Intent::AcknowledgeError).is_empty());
    assert!(intent(&mut machine, Intent::Restart).is_empty());
    assert_eq!(machine.state(), WorkflowState::Terminated);
}

#[test]
fn success_resets_transport_errors() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 3);

    pick(&mut machine, 1);
    pick(&mut machine, 2);
    complete(&mut machine, Err(TransferFailure::transport("reset")));
    assert_eq!(machine.context().error_counts().transport_errors, 1);
    intent(&mut machine, Intent::AcknowledgeError);

    pick(&mut machine, 1);
    pick(&mut machine, 2);
    complete(&mut machine, Ok(registry.register(vec![1])));
    assert_eq!(machine.context().error_counts().transport_errors, 0);
}

#[test]
fn selection_never_exceeds_capacity() {
    let registry = ImageRegistry::new();
    for device in [true, false] {
        let mut machine = at_selection(WorkflowConfig::default(), device, &registry, 5);
        let capacity = machine.context().selection_capacity();
        for index in [0, 1, 1, 6, 2, 3, 4, 5] {
            pick(&mut machine, index);
            intent(&mut machine, Intent::Unpick { position: 7 });
            assert!(machine.context().selected_indexes().len() <= capacity);
        }
    }
}

#[test]
fn invalid_picks_are_ignored() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 3);

    assert!(pick(&mut machine, 0).is_empty());
    assert!(pick(&mut machine, 4).is_empty());
    pick(&mut machine, 2);
    assert!(pick(&mut machine, 2).is_empty());
    assert_eq!(machine.context().selected_indexes(), &[CatalogIndex(2)]);
    assert!(intent(&mut machine, Intent::Unpick { position: 1 }).is_empty());
    assert_eq!(machine.context().selected_indexes().len(), 1);
}

#[test]
fn error_acknowledgement_clears_selection_atomically() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 3);
    pick(&mut machine, 1);
    pick(&mut machine, 2);
    let effects = complete(&mut machine, Err(TransferFailure::transport("x")));

    intent(&mut machine, Intent::AcknowledgeError);
    let snapshot = machine.snapshot();
    assert_eq!(snapshot.state, WorkflowState::AwaitingSelection);
    assert!(snapshot.selected_indexes.is_empty());
    assert!(snapshot.error_message.is_none());

    // The display timer scheduled before the acknowledgement has nothing left to do.
    assert!(fire(&mut machine, &effects).is_empty());
    assert_eq!(machine.state(), WorkflowState::AwaitingSelection);
}

#[test]
fn stale_timer_is_ignored() {
    let mut machine = Machine::new(WorkflowConfig::default());
    let first = machine.start();
    let (timer, epoch) = timer_of(&first);

    machine.dispatch(Event::TimerFired { timer, epoch });
    machine.dispatch(Event::DeviceDetected { available: true });
    assert_eq!(machine.state(), WorkflowState::ShowingDetectionResult);

    assert!(machine
        .dispatch(Event::TimerFired {
            timer: TimerKind::DetectionResult,
            epoch,
        })
        .is_empty());
    assert_eq!(machine.state(), WorkflowState::ShowingDetectionResult);
}

#[test]
fn teardown_releases_every_handle() {
    let registry = ImageRegistry::new();
    let mut machine = at_selection(WorkflowConfig::default(), false, &registry, 4);
    pick(&mut machine, 1);
    pick(&mut machine, 2);
    complete(&mut machine, Ok(registry.register(vec![1])));
    assert_eq!(registry.live_count(), 5);

    machine.teardown();
    machine.teardown();
    assert_eq!(registry.live_count(), 0);
    assert!(machine.snapshot().catalog.is_empty());
}
