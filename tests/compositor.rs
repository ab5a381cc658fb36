mod common;

use std::sync::Arc;

use common::*;
use hwcomposer::{
    composition::{CompositionState, DrmComposition},
    display::DisplayError,
    importer::Importer,
    CompositorError, DrmCompositor, MAX_DISPLAYS,
};

fn compositor(log: &CallLog) -> DrmCompositor<RecordingDisplay> {
    init_logging();
    let mut compositor = DrmCompositor::with_slots(resources(), recording_slots(log));
    compositor.init().unwrap();
    compositor
}

fn importer() -> (Arc<CountingImporter>, Arc<dyn Importer>) {
    let counting = Arc::new(CountingImporter::default());
    let importer: Arc<dyn Importer> = counting.clone();
    (counting, importer)
}

#[test]
fn init_touches_every_slot_in_order() {
    let log = CallLog::default();
    let compositor = compositor(&log);

    assert!(compositor.is_initialized());
    assert_eq!(
        log.calls(),
        (0..MAX_DISPLAYS).map(|d| (d, Call::Init(d))).collect::<Vec<_>>()
    );
}

#[test]
fn init_fails_fast() {
    init_logging();
    let log = CallLog::default();
    let [first, second, third] = recording_slots::<3>(&log);
    let mut compositor = DrmCompositor::with_slots(resources(), [first, second.failing_init(), third]);

    let err = compositor.init().unwrap_err();
    assert!(matches!(
        err,
        CompositorError::DisplayInit {
            display: 1,
            source: DisplayError::NotInitialized,
        }
    ));
    assert_eq!(log.calls(), vec![(0, Call::Init(0)), (1, Call::Init(1))]);

    let (_, importer) = importer();
    assert!(matches!(
        compositor.create_composition(importer, 1),
        Err(CompositorError::NotInitialized)
    ));
}

#[test]
fn create_before_init() {
    init_logging();
    let log = CallLog::default();
    let mut compositor = DrmCompositor::with_slots(resources(), recording_slots::<3>(&log));
    let (_, importer) = importer();

    assert!(matches!(
        compositor.create_composition(importer, 11),
        Err(CompositorError::NotInitialized)
    ));
    assert_eq!(compositor.frame_number(), 11);
    assert!(log.calls().is_empty());
}

#[test]
fn missing_composition_has_no_side_effects() {
    let log = CallLog::default();
    let mut compositor = compositor(&log);
    let before = log.calls();

    for display in 0..MAX_DISPLAYS {
        let err = compositor
            .queue_composition(None::<&mut DrmComposition>, display)
            .unwrap_err();
        assert!(matches!(err, CompositorError::InvalidArgument(_)));
        assert_eq!(err.code(), -libc::EINVAL);
    }
    assert_eq!(log.calls(), before);
}

#[test]
fn display_out_of_range_is_checked_first() {
    let log = CallLog::default();
    let mut compositor = compositor(&log);
    let (counting, importer) = importer();

    let mut composition = compositor.create_composition(importer, 1).unwrap();
    composition.set_layers(0, vec![layer(0)]).unwrap();

    for display in [MAX_DISPLAYS, MAX_DISPLAYS + 1, usize::MAX] {
        assert!(matches!(
            compositor.queue_composition(&mut composition, display),
            Err(CompositorError::InvalidArgument(_))
        ));
    }
    assert_eq!(composition.state(0), Some(CompositionState::Created));
    assert_eq!(counting.outstanding(), 1);
    assert_eq!(log.count(|call| matches!(call, Call::Queue { .. })), 0);
}

#[test]
fn one_submission_per_success() {
    let log = CallLog::default();
    let mut compositor = compositor(&log);
    let (counting, importer) = importer();

    let mut composition = compositor.create_composition(importer, 42).unwrap();
    composition.set_layers(0, vec![layer(0), layer(1)]).unwrap();
    composition.set_layers(2, vec![layer(2)]).unwrap();

    compositor.queue_composition(&mut composition, 0).unwrap();
    compositor.queue_composition(&mut composition, 2).unwrap();

    let queued = log
        .calls()
        .into_iter()
        .filter(|(_, call)| matches!(call, Call::Queue { .. }))
        .collect::<Vec<_>>();
    assert_eq!(
        queued,
        vec![
            (
                0,
                Call::Queue {
                    display: 0,
                    frame: 42,
                    planes: 2
                }
            ),
            (
                2,
                Call::Queue {
                    display: 2,
                    frame: 42,
                    planes: 1
                }
            ),
        ]
    );
    assert_eq!(composition.state(1), Some(CompositionState::Created));

    // buffers now belong to the display compositors
    drop(composition);
    assert_eq!(counting.outstanding(), 3);
    assert_eq!(compositor.pool().get(0).unwrap().queued().len(), 1);
}

#[test]
fn failed_plan_never_reaches_the_display() {
    let log = CallLog::default();
    let mut compositor = compositor(&log);
    let (counting, importer) = importer();

    // one plane is reserved for precomposition, leaving a single plane for two protected layers
    let mut composition = compositor.create_composition(importer, 3).unwrap();
    composition
        .set_layers(1, vec![layer(0).protected(), layer(1).protected(), layer(2)])
        .unwrap();

    let err = compositor.queue_composition(&mut composition, 1).unwrap_err();
    assert!(matches!(err, CompositorError::Plan { display: 1, .. }));
    assert_eq!(err.code(), -libc::ENOSPC);
    assert_eq!(composition.state(1), Some(CompositionState::Failed));
    assert_eq!(log.count(|call| matches!(call, Call::Queue { .. })), 0);
    assert_eq!(counting.outstanding(), 0);

    // a spent display stays spent
    assert!(matches!(
        compositor.queue_composition(&mut composition, 1),
        Err(CompositorError::Plan { display: 1, .. })
    ));
}

#[test]
fn rejected_queue_is_reported() {
    init_logging();
    let log = CallLog::default();
    let [first, second, third] = recording_slots::<3>(&log);
    let mut compositor = DrmCompositor::with_slots(resources(), [first, second.rejecting(), third]);
    compositor.init().unwrap();
    let (counting, importer) = importer();

    let mut composition = compositor.create_composition(importer, 8).unwrap();
    composition.set_layers(1, vec![layer(0)]).unwrap();
    let err = compositor.queue_composition(&mut composition, 1).unwrap_err();

    assert!(matches!(
        err,
        CompositorError::Queue {
            display: 1,
            source: DisplayError::QueueFull { .. },
        }
    ));
    assert_eq!(err.code(), -libc::EBUSY);
    assert_eq!(log.count(|call| matches!(call, Call::Queue { .. })), 1);
    assert_eq!(counting.outstanding(), 0);
}

#[test]
fn composite_always_fails() {
    let log = CallLog::default();
    let compositor = compositor(&log);
    for _ in 0..3 {
        let err = compositor.composite().unwrap_err();
        assert_eq!(err.code(), -libc::EINVAL);
    }
}

#[test]
fn clear_display_is_forwarded() {
    let log = CallLog::default();
    let mut compositor = compositor(&log);
    let (_, importer) = importer();

    let mut composition = compositor.create_composition(importer, 4).unwrap();
    compositor.queue_composition(&mut composition, 2).unwrap();
    let fence = composition.release_fence(2).unwrap();
    assert!(!fence.is_reached());

    compositor.clear_display(2).unwrap();
    assert!(fence.is_reached());
    assert_eq!(log.count(|call| *call == Call::Clear), 1);
    assert!(compositor.clear_display(MAX_DISPLAYS).is_err());
    assert_eq!(log.count(|call| *call == Call::Clear), 1);
}

#[test]
fn dump_lists_every_slot() {
    let log = CallLog::default();
    let mut compositor = compositor(&log);
    let (_, importer) = importer();
    let mut composition = compositor.create_composition(importer, 1).unwrap();
    compositor.queue_composition(&mut composition, 0).unwrap();

    let mut first = String::new();
    compositor.dump(&mut first).unwrap();
    let mut second = String::new();
    compositor.dump(&mut second).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        first,
        "DrmCompositor stats:\nRecording 0: 1 queued\nRecording 1: 0 queued\nRecording 2: 0 queued\n"
    );
}
