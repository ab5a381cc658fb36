//! Per-display compositors
//!
//! A [`DisplayCompositor`] is the backend of a single display slot. It receives planned
//! [`DisplayComposition`]s, queues them and eventually commits them to the hardware. Once a
//! composition is replaced on screen its release fence gets signaled.
//!
//! [`QueuedDisplayCompositor`] is a software implementation with a bounded commit queue. It keeps
//! track of which planes are in use, but leaves the actual programming of the display controller
//! to whoever drives [`QueuedDisplayCompositor::commit_next`].

use std::{collections::VecDeque, fmt, sync::Arc};

use drm::control::plane;
use smallvec::SmallVec;
use tracing::{debug, info, info_span, trace, warn};

use crate::{
    composition::{DisplayComposition, DisplayCompositionType, DpmsMode},
    resources::DrmResources,
    sync::Timeline,
};

/// Default amount of compositions a [`QueuedDisplayCompositor`] holds before rejecting new ones
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 2;

/// Errors thrown by a [`DisplayCompositor`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// `init` was called on an initialized display compositor
    #[error("Display compositor for display {display} is already initialized")]
    AlreadyInitialized {
        /// Display the compositor was initialized for
        display: usize,
    },
    /// The display compositor was used before `init`
    #[error("Display compositor is not initialized")]
    NotInitialized,
    /// The composition was planned for a different display
    #[error("Composition for display {got} was queued on display {expected}")]
    DisplayMismatch {
        /// Display of the compositor
        expected: usize,
        /// Display of the composition
        got: usize,
    },
    /// The commit queue is full
    #[error("Commit queue of display {display} is full ({depth} compositions pending)")]
    QueueFull {
        /// Display
        display: usize,
        /// Current queue depth
        depth: usize,
    },
}

impl DisplayError {
    /// Negative errno equivalent of this error
    pub fn code(&self) -> i32 {
        match self {
            DisplayError::AlreadyInitialized { .. } => -libc::EALREADY,
            DisplayError::NotInitialized => -libc::ENODEV,
            DisplayError::DisplayMismatch { .. } => -libc::EINVAL,
            DisplayError::QueueFull { .. } => -libc::EBUSY,
        }
    }
}

/// Backend of a single display slot
pub trait DisplayCompositor {
    /// Initialize the compositor for `display`
    ///
    /// Called exactly once per slot, before anything is queued.
    fn init(&mut self, resources: &Arc<DrmResources>, display: usize) -> Result<(), DisplayError>;

    /// Take ownership of a planned composition and schedule it for commit
    ///
    /// A rejected composition is dropped by the compositor. Its release fence is not signaled
    /// directly, but together with the next point reached on the display's timeline.
    fn queue_composition(&mut self, composition: Box<DisplayComposition>) -> Result<(), DisplayError>;

    /// Drop everything queued or shown and blank the display
    fn clear_display(&mut self);

    /// Append diagnostics about this display
    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Planes this display shows or will touch once its queue is committed
    ///
    /// Queued compositions claim every plane they name, including the ones they disable.
    fn planes_in_use(&self) -> SmallVec<[plane::Handle; 4]>;

    /// Timeline release fences of this display are allocated from
    fn timeline(&self) -> &Timeline;
}

/// Counters reported by [`QueuedDisplayCompositor::dump`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStats {
    /// Compositions accepted into the queue
    pub queued: u64,
    /// Compositions committed
    pub committed: u64,
    /// Compositions rejected by `queue_composition`
    pub rejected: u64,
    /// Calls to `clear_display`
    pub cleared: u64,
}

/// Software display compositor with a bounded commit queue
#[derive(Debug)]
pub struct QueuedDisplayCompositor {
    display: Option<usize>,
    resources: Option<Arc<DrmResources>>,
    max_queue_depth: usize,
    queue: VecDeque<Box<DisplayComposition>>,
    active: Option<Box<DisplayComposition>>,
    dpms_mode: DpmsMode,
    timeline: Timeline,
    stats: DisplayStats,
    span: tracing::Span,
}

impl Default for QueuedDisplayCompositor {
    fn default() -> Self {
        Self::with_max_queue_depth(DEFAULT_MAX_QUEUE_DEPTH)
    }
}

impl QueuedDisplayCompositor {
    /// Create an uninitialized display compositor with the default queue depth
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an uninitialized display compositor holding at most `depth` queued compositions
    pub fn with_max_queue_depth(depth: usize) -> Self {
        QueuedDisplayCompositor {
            display: None,
            resources: None,
            max_queue_depth: depth,
            queue: VecDeque::with_capacity(depth),
            active: None,
            dpms_mode: DpmsMode::On,
            timeline: Timeline::new(),
            stats: DisplayStats::default(),
            span: tracing::Span::none(),
        }
    }

    /// Display this compositor was initialized for
    pub fn display(&self) -> Option<usize> {
        self.display
    }

    /// Resources this compositor was initialized with
    pub fn resources(&self) -> Option<&Arc<DrmResources>> {
        self.resources.as_ref()
    }

    /// Amount of compositions waiting for commit
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Composition currently on screen
    pub fn active_composition(&self) -> Option<&DisplayComposition> {
        self.active.as_deref()
    }

    /// Current power state
    pub fn dpms_mode(&self) -> DpmsMode {
        self.dpms_mode
    }

    /// Counters of this display
    pub fn stats(&self) -> DisplayStats {
        self.stats
    }

    /// Commit the oldest queued composition
    ///
    /// The composition it replaces on screen is released. Returns the frame number of the
    /// committed composition, or `None` if nothing was queued or the acquire fences of the
    /// oldest composition are still pending.
    #[profiling::function]
    pub fn commit_next(&mut self) -> Result<Option<u32>, DisplayError> {
        let _guard = self.span.enter();
        if self.display.is_none() {
            return Err(DisplayError::NotInitialized);
        }

        match self.queue.front() {
            Some(head) if !head.is_ready() => {
                trace!(frame = head.frame_no(), "waiting for acquire fences");
                return Ok(None);
            }
            Some(_) => {}
            None => return Ok(None),
        }
        let Some(next) = self.queue.pop_front() else {
            return Ok(None);
        };

        if let DisplayCompositionType::Dpms(mode) = next.type_() {
            if mode != self.dpms_mode {
                info!(?mode, "changing dpms mode");
            }
            self.dpms_mode = mode;
        }

        let frame_no = next.frame_no();
        if let Some(previous) = self.active.replace(next) {
            previous.signal_release();
        }
        self.stats.committed += 1;
        trace!(frame = frame_no, "composition committed");

        Ok(Some(frame_no))
    }
}

impl DisplayCompositor for QueuedDisplayCompositor {
    fn init(&mut self, resources: &Arc<DrmResources>, index: usize) -> Result<(), DisplayError> {
        if let Some(display) = self.display {
            return Err(DisplayError::AlreadyInitialized { display });
        }

        self.span = info_span!("display_compositor", display = index);
        let _guard = self.span.enter();
        if resources.crtc_for_display(index).is_none() {
            debug!("display has no crtc yet");
        }
        self.display = Some(index);
        self.resources = Some(resources.clone());
        Ok(())
    }

    #[profiling::function]
    fn queue_composition(&mut self, composition: Box<DisplayComposition>) -> Result<(), DisplayError> {
        let _guard = self.span.enter();
        let Some(display) = self.display else {
            return Err(DisplayError::NotInitialized);
        };

        let rejection = if composition.display() != display {
            Some(DisplayError::DisplayMismatch {
                expected: display,
                got: composition.display(),
            })
        } else if self.queue.len() >= self.max_queue_depth {
            Some(DisplayError::QueueFull {
                display,
                depth: self.queue.len(),
            })
        } else {
            None
        };

        if let Some(err) = rejection {
            warn!(frame = composition.frame_no(), "rejecting composition: {}", err);
            self.stats.rejected += 1;
            return Err(err);
        }

        trace!(frame = composition.frame_no(), depth = self.queue.len() + 1, "composition queued");
        self.queue.push_back(composition);
        self.stats.queued += 1;
        Ok(())
    }

    fn clear_display(&mut self) {
        let _guard = self.span.enter();
        let dropped = self.queue.len() + usize::from(self.active.is_some());
        self.queue.clear();
        self.active = None;
        self.timeline.signal_all();
        self.stats.cleared += 1;
        debug!(dropped, "display cleared");
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match self.display {
            Some(display) => writeln!(out, "Display {}:", display)?,
            None => return writeln!(out, "Display -: uninitialized"),
        }
        writeln!(out, "  dpms: {:?}", self.dpms_mode)?;
        writeln!(out, "  queue: {}/{}", self.queue.len(), self.max_queue_depth)?;
        writeln!(
            out,
            "  frames: queued={} committed={} rejected={} cleared={}",
            self.stats.queued, self.stats.committed, self.stats.rejected, self.stats.cleared
        )?;
        match self.active.as_deref() {
            Some(active) => {
                write!(out, "  active: frame {} planes [", active.frame_no())?;
                for (i, plane) in active.used_planes().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{}", u32::from(plane))?;
                }
                writeln!(out, "]")
            }
            None => writeln!(out, "  active: none"),
        }
    }

    fn planes_in_use(&self) -> SmallVec<[plane::Handle; 4]> {
        let mut planes = SmallVec::<[plane::Handle; 4]>::new();
        let queued = self
            .queue
            .iter()
            .flat_map(|comp| comp.composition_planes().iter().map(|p| p.plane));
        for plane in self
            .active
            .iter()
            .flat_map(|comp| comp.used_planes())
            .chain(queued)
        {
            if !planes.contains(&plane) {
                planes.push(plane);
            }
        }
        planes
    }

    fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}
