//! Per-frame compositions
//!
//! A [`DrmComposition`] is the unit of work for one frame. It holds one
//! [`DisplayComposition`] per connected display, each of which moves through
//!
//! ```text
//! Created -> Planned -> PlanesCleaned -> Taken
//!    \           \
//!     `-----------`--> Failed
//! ```
//!
//! Steps can not be skipped or repeated. [`DrmComposition::take_display_composition`] moves the
//! plan out of the composition, after which only its release fence remains accessible.

use std::{fmt, sync::Arc};

use drm::control::plane;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::{
    display::DisplayCompositor,
    importer::{ImportError, ImportedBuffer, Importer},
    layer::Layer,
    planner::{PlanError, Planner},
    pool::DisplayPool,
    resources::{DrmResources, PlaneInfo},
    sync::SyncPoint,
};

mod display;

pub use self::display::{DisplayComposition, DisplayCompositionType, DpmsMode};

/// Observable state of a display within a [`DrmComposition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositionState {
    /// The display has no crtc, nothing can be composed for it
    Unavailable,
    /// Waiting for a description and planning
    Created,
    /// Planes were assigned
    Planned,
    /// Unused planes were marked for disabling
    PlanesCleaned,
    /// The plan was moved out of the composition
    Taken,
    /// Planning failed, the display composition is spent
    Failed,
}

/// Errors thrown by a [`DrmComposition`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    /// `init` was called twice
    #[error("The composition is already initialized")]
    AlreadyInitialized,
    /// The composition was used before `init`
    #[error("The composition is not initialized")]
    NotInitialized,
    /// None of the displays has a crtc
    #[error("No display can be composed for")]
    NoDisplays,
    /// Display index is outside of the known displays
    #[error("Display {0} is out of range")]
    DisplayOutOfRange(usize),
    /// Display has no crtc
    #[error("Display {0} is not available")]
    DisplayUnavailable(usize),
    /// The operation is not allowed in the current state
    #[error("Can not {operation} display {display} in state {state:?}")]
    InvalidState {
        /// Display
        display: usize,
        /// Current state
        state: CompositionState,
        /// Attempted operation
        operation: &'static str,
    },
    /// The display composition was already taken
    #[error("Composition for display {0} was already taken")]
    AlreadyTaken(usize),
    /// The planner failed
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Importing a layer buffer failed
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl CompositionError {
    /// Negative errno equivalent of this error
    pub fn code(&self) -> i32 {
        match self {
            CompositionError::AlreadyTaken(_) => -libc::EALREADY,
            CompositionError::NoDisplays | CompositionError::DisplayUnavailable(_) => -libc::ENODEV,
            CompositionError::Plan(err) => err.code(),
            CompositionError::Import(err) => err.code(),
            CompositionError::AlreadyInitialized
            | CompositionError::NotInitialized
            | CompositionError::DisplayOutOfRange(_)
            | CompositionError::InvalidState { .. } => -libc::EINVAL,
        }
    }
}

enum DisplayState {
    Unavailable,
    Created(Box<DisplayComposition>),
    Planned(Box<DisplayComposition>),
    PlanesCleaned(Box<DisplayComposition>),
    Taken { release_fence: SyncPoint },
    Failed,
}

impl DisplayState {
    fn state(&self) -> CompositionState {
        match self {
            DisplayState::Unavailable => CompositionState::Unavailable,
            DisplayState::Created(_) => CompositionState::Created,
            DisplayState::Planned(_) => CompositionState::Planned,
            DisplayState::PlanesCleaned(_) => CompositionState::PlanesCleaned,
            DisplayState::Taken { .. } => CompositionState::Taken,
            DisplayState::Failed => CompositionState::Failed,
        }
    }
}

/// One frame worth of work, potentially spanning several displays
pub struct DrmComposition {
    resources: Arc<DrmResources>,
    importer: Arc<dyn Importer>,
    planner: Arc<Planner>,
    frame_no: Option<u32>,
    displays: Vec<DisplayState>,
}

impl fmt::Debug for DrmComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmComposition")
            .field("frame_no", &self.frame_no)
            .field(
                "displays",
                &self.displays.iter().map(DisplayState::state).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl DrmComposition {
    /// Create a new, uninitialized composition
    pub fn new(resources: Arc<DrmResources>, importer: Arc<dyn Importer>, planner: Arc<Planner>) -> Self {
        DrmComposition {
            resources,
            importer,
            planner,
            frame_no: None,
            displays: Vec::new(),
        }
    }

    /// Initialize the composition for `frame_no`
    ///
    /// Creates an empty display composition for every display with a crtc.
    pub fn init(&mut self, frame_no: u32) -> Result<(), CompositionError> {
        if self.frame_no.is_some() {
            return Err(CompositionError::AlreadyInitialized);
        }

        let displays = (0..self.resources.display_count())
            .map(|display| match self.resources.crtc_for_display(display) {
                Some(crtc) => DisplayState::Created(Box::new(DisplayComposition::new(display, crtc, frame_no))),
                None => DisplayState::Unavailable,
            })
            .collect::<Vec<_>>();

        if !displays.iter().any(|state| matches!(state, DisplayState::Created(_))) {
            return Err(CompositionError::NoDisplays);
        }

        self.displays = displays;
        self.frame_no = Some(frame_no);
        Ok(())
    }

    /// Frame number this composition was initialized for
    pub fn frame_no(&self) -> Option<u32> {
        self.frame_no
    }

    /// Current state of `display`, `None` if the display is unknown
    pub fn state(&self, display: usize) -> Option<CompositionState> {
        self.displays.get(display).map(DisplayState::state)
    }

    /// Release fence for `display`
    ///
    /// Available once the display was planned, and stays available after the
    /// display composition was taken.
    pub fn release_fence(&self, display: usize) -> Option<SyncPoint> {
        match self.displays.get(display)? {
            DisplayState::Planned(comp) | DisplayState::PlanesCleaned(comp) => Some(comp.release_fence()),
            DisplayState::Taken { release_fence } => Some(release_fence.clone()),
            _ => None,
        }
    }

    /// Describe the layers to show on `display`
    ///
    /// Every buffer is imported right away. Layers are appended to already described ones.
    pub fn set_layers(&mut self, display: usize, layers: Vec<Layer>) -> Result<(), CompositionError> {
        let importer = self.importer.clone();
        let comp = self.created_mut(display, "set layers on")?;
        if !matches!(comp.type_, DisplayCompositionType::Empty | DisplayCompositionType::Frame) {
            return Err(CompositionError::InvalidState {
                display,
                state: CompositionState::Created,
                operation: "set layers on",
            });
        }

        // import everything before touching the composition, so a failure leaves it untouched
        let buffers = layers
            .iter()
            .map(|layer| ImportedBuffer::import(&importer, layer.buffer))
            .collect::<Result<Vec<_>, _>>()?;

        trace!(display = comp.display, layers = layers.len(), "layers set");
        comp.type_ = DisplayCompositionType::Frame;
        comp.layers.extend(layers);
        comp.buffers.extend(buffers);
        Ok(())
    }

    /// Turn the composition for `display` into a power state change
    pub fn set_dpms_mode(&mut self, display: usize, mode: DpmsMode) -> Result<(), CompositionError> {
        let comp = self.created_mut(display, "set dpms mode on")?;
        if !matches!(comp.type_, DisplayCompositionType::Empty | DisplayCompositionType::Dpms(_)) {
            return Err(CompositionError::InvalidState {
                display,
                state: CompositionState::Created,
                operation: "set dpms mode on",
            });
        }
        comp.type_ = DisplayCompositionType::Dpms(mode);
        Ok(())
    }

    /// Assign planes for `display`
    ///
    /// Planes in use by any other display of `pool` are not considered. On success the
    /// display composition holds a release fence on the timeline of its pool slot.
    /// On failure the display composition is spent.
    #[profiling::function]
    pub fn plan<D: DisplayCompositor, const N: usize>(
        &mut self,
        pool: &DisplayPool<D, N>,
        display: usize,
    ) -> Result<(), CompositionError> {
        let slot = pool.get(display).ok_or(CompositionError::DisplayOutOfRange(display))?;
        let state = self.display_state_mut(display)?;

        let mut comp = match std::mem::replace(state, DisplayState::Failed) {
            DisplayState::Created(comp) => comp,
            other => {
                let err = Self::transition_error(display, &other, "plan");
                *state = other;
                return Err(err);
            }
        };

        let in_use = pool
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != display)
            .flat_map(|(_, other)| other.planes_in_use())
            .collect::<SmallVec<[plane::Handle; 8]>>();
        let candidates = self
            .resources
            .planes_for_display(display)
            .filter(|plane| !in_use.contains(&plane.handle))
            .cloned()
            .collect::<Vec<PlaneInfo>>();

        let planes = match comp.type_ {
            DisplayCompositionType::Frame => self.planner.provision(display, &comp.layers, &candidates)?,
            DisplayCompositionType::Empty | DisplayCompositionType::Dpms(_) => Vec::new(),
        };

        debug!(
            display = comp.display,
            frame = comp.frame_no,
            candidates = candidates.len(),
            planes = planes.len(),
            "composition planned"
        );
        comp.candidate_planes = candidates.iter().map(|plane| plane.handle).collect();
        comp.plan(planes, slot.timeline().create_point());
        *self.display_state_mut(display)? = DisplayState::Planned(comp);
        Ok(())
    }

    /// Turn off every candidate plane of `display` the plan does not use
    pub fn disable_unused_planes(&mut self, display: usize) -> Result<(), CompositionError> {
        let state = self.display_state_mut(display)?;
        match std::mem::replace(state, DisplayState::Failed) {
            DisplayState::Planned(mut comp) => {
                let disabled = comp.disable_unused_planes();
                trace!(display = comp.display, disabled, "unused planes disabled");
                *state = DisplayState::PlanesCleaned(comp);
                Ok(())
            }
            other => {
                let err = Self::transition_error(display, &other, "disable unused planes of");
                *state = other;
                Err(err)
            }
        }
    }

    /// Move the plan for `display` out of this composition
    ///
    /// This can only succeed once per display.
    pub fn take_display_composition(
        &mut self,
        display: usize,
    ) -> Result<Box<DisplayComposition>, CompositionError> {
        let state = self.display_state_mut(display)?;
        match std::mem::replace(state, DisplayState::Failed) {
            DisplayState::PlanesCleaned(comp) => {
                *state = DisplayState::Taken {
                    release_fence: comp.release_fence(),
                };
                Ok(comp)
            }
            other => {
                let err = Self::transition_error(display, &other, "take");
                *state = other;
                Err(err)
            }
        }
    }

    fn display_state_mut(&mut self, display: usize) -> Result<&mut DisplayState, CompositionError> {
        if self.frame_no.is_none() {
            return Err(CompositionError::NotInitialized);
        }
        self.displays
            .get_mut(display)
            .ok_or(CompositionError::DisplayOutOfRange(display))
    }

    fn created_mut(
        &mut self,
        display: usize,
        operation: &'static str,
    ) -> Result<&mut DisplayComposition, CompositionError> {
        match self.display_state_mut(display)? {
            DisplayState::Created(comp) => Ok(&mut **comp),
            other => Err(Self::transition_error(display, other, operation)),
        }
    }

    fn transition_error(display: usize, state: &DisplayState, operation: &'static str) -> CompositionError {
        match state {
            DisplayState::Unavailable => CompositionError::DisplayUnavailable(display),
            DisplayState::Taken { .. } => CompositionError::AlreadyTaken(display),
            other => CompositionError::InvalidState {
                display,
                state: other.state(),
                operation,
            },
        }
    }
}
