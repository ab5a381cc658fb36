#![allow(dead_code)]

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use drm::control::{crtc, framebuffer, plane, PlaneType};
use drm_fourcc::DrmFourcc;
use smallvec::SmallVec;

use hwcomposer::{
    composition::DisplayComposition,
    display::{DisplayCompositor, DisplayError},
    importer::{BufferDescriptor, ImportError, Importer},
    layer::{Layer, Rectangle},
    resources::{DisplayMask, DrmResources},
    sync::Timeline,
};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn crtc(id: u32) -> crtc::Handle {
    drm::control::from_u32(id).unwrap()
}

pub fn plane(id: u32) -> plane::Handle {
    drm::control::from_u32(id).unwrap()
}

/// Three displays with a primary and an overlay plane each
pub fn resources() -> Arc<DrmResources> {
    let mut builder = DrmResources::builder();
    for display in 0..3u32 {
        builder = builder.display(Some(crtc(display + 1)), None);
    }
    for display in 0..3u32 {
        let mask = DisplayMask::single(display as usize);
        builder = builder
            .plane(plane(10 * (display + 1)), PlaneType::Primary, mask)
            .plane(plane(10 * (display + 1) + 1), PlaneType::Overlay, mask);
    }
    Arc::new(builder.build().unwrap())
}

pub fn layer(id: u64) -> Layer {
    Layer::new(
        BufferDescriptor::new(id, 64, 64, DrmFourcc::Argb8888),
        Rectangle::new(0, 0, 64, 64),
    )
}

/// Importer counting outstanding framebuffers
#[derive(Debug, Default)]
pub struct CountingImporter {
    next: AtomicU32,
    outstanding: AtomicU32,
}

impl CountingImporter {
    pub fn outstanding(&self) -> u32 {
        self.outstanding.load(Ordering::SeqCst)
    }
}

impl Importer for CountingImporter {
    fn import_buffer(&self, buffer: &BufferDescriptor) -> Result<framebuffer::Handle, ImportError> {
        if buffer.width == 0 || buffer.height == 0 {
            return Err(ImportError::InvalidBuffer(buffer.id));
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(drm::control::from_u32(self.next.fetch_add(1, Ordering::SeqCst) + 1000).unwrap())
    }

    fn release_buffer(&self, _fb: framebuffer::Handle) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Calls observed by a [`RecordingDisplay`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init(usize),
    Queue { display: usize, frame: u32, planes: usize },
    Clear,
}

/// Shared log of every call made to the displays of a pool
#[derive(Debug, Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<(usize, Call)>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<(usize, Call)> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|(_, call)| f(call)).count()
    }

    fn push(&self, slot: usize, call: Call) {
        self.0.lock().unwrap().push((slot, call));
    }
}

/// Display compositor recording every call, optionally failing
#[derive(Debug)]
pub struct RecordingDisplay {
    slot: usize,
    log: CallLog,
    fail_init: bool,
    reject_queue: bool,
    queued: Vec<Box<DisplayComposition>>,
    timeline: Timeline,
}

impl RecordingDisplay {
    pub fn new(slot: usize, log: &CallLog) -> Self {
        RecordingDisplay {
            slot,
            log: log.clone(),
            fail_init: false,
            reject_queue: false,
            queued: Vec::new(),
            timeline: Timeline::new(),
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject_queue = true;
        self
    }

    pub fn queued(&self) -> &[Box<DisplayComposition>] {
        &self.queued
    }
}

impl DisplayCompositor for RecordingDisplay {
    fn init(&mut self, _resources: &Arc<DrmResources>, display: usize) -> Result<(), DisplayError> {
        self.log.push(self.slot, Call::Init(display));
        if self.fail_init {
            return Err(DisplayError::NotInitialized);
        }
        Ok(())
    }

    fn queue_composition(&mut self, composition: Box<DisplayComposition>) -> Result<(), DisplayError> {
        self.log.push(
            self.slot,
            Call::Queue {
                display: composition.display(),
                frame: composition.frame_no(),
                planes: composition.used_planes().count(),
            },
        );
        if self.reject_queue {
            return Err(DisplayError::QueueFull {
                display: self.slot,
                depth: 0,
            });
        }
        self.queued.push(composition);
        Ok(())
    }

    fn clear_display(&mut self) {
        self.log.push(self.slot, Call::Clear);
        self.queued.clear();
        self.timeline.signal_all();
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Recording {}: {} queued", self.slot, self.queued.len())
    }

    fn planes_in_use(&self) -> SmallVec<[plane::Handle; 4]> {
        self.queued
            .iter()
            .flat_map(|comp| comp.composition_planes().iter().map(|p| p.plane))
            .collect()
    }

    fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}

pub fn recording_slots<const N: usize>(log: &CallLog) -> [RecordingDisplay; N] {
    std::array::from_fn(|slot| RecordingDisplay::new(slot, log))
}
