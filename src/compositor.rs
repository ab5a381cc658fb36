//! Multi-display composition orchestrator
//!
//! The [`DrmCompositor`] owns one [`DisplayCompositor`] per display slot and the
//! [`Planner`] shared by all compositions it creates. It does not program any hardware
//! itself. Every frame goes through the same protocol:
//!
//! 1. [`DrmCompositor::create_composition`] hands out an initialized [`DrmComposition`]
//! 2. the caller describes the frame for one or more displays
//! 3. [`DrmCompositor::queue_composition`] plans the display, disables the planes the plan
//!    does not use and moves the result into the display compositor of that slot
//!
//! A failing step stops the protocol for that display and is logged together with the
//! display it targeted.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use hwcomposer::{importer::Importer, resources::DrmResources};
//! use hwcomposer::{compositor::DrmCompositor, display::QueuedDisplayCompositor};
//!
//! # let resources: DrmResources = todo!();
//! # let importer: Arc<dyn Importer> = todo!();
//! let mut compositor = DrmCompositor::<QueuedDisplayCompositor>::new(Arc::new(resources));
//! compositor.init()?;
//!
//! let mut composition = compositor.create_composition(importer, 1)?;
//! compositor.queue_composition(&mut composition, 0)?;
//!
//! let mut stats = String::new();
//! compositor.dump(&mut stats)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fmt, sync::Arc};

use tracing::{debug, error, info, info_span, trace};

use crate::{
    composition::DrmComposition,
    display::DisplayCompositor,
    error::CompositorError,
    importer::Importer,
    planner::Planner,
    pool::DisplayPool,
    resources::DrmResources,
};

/// Default amount of display slots of a [`DrmCompositor`]
pub const MAX_DISPLAYS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    Ready,
    Failed,
}

/// Orchestrates compositions over a fixed pool of `N` display compositors
pub struct DrmCompositor<D, const N: usize = MAX_DISPLAYS> {
    resources: Arc<DrmResources>,
    pool: DisplayPool<D, N>,
    planner: Option<Arc<Planner>>,
    frame_no: u32,
    state: InitState,
    span: tracing::Span,
}

impl<D: fmt::Debug, const N: usize> fmt::Debug for DrmCompositor<D, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmCompositor")
            .field("pool", &self.pool)
            .field("planner", &self.planner)
            .field("frame_no", &self.frame_no)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<D: DisplayCompositor + Default, const N: usize> DrmCompositor<D, N> {
    /// Create a new compositor with default constructed display compositors
    ///
    /// The compositor needs to be [initialized](DrmCompositor::init) before use.
    pub fn new(resources: Arc<DrmResources>) -> Self {
        Self::with_slots(resources, std::array::from_fn(|_| D::default()))
    }
}

impl<D: DisplayCompositor, const N: usize> DrmCompositor<D, N> {
    /// Create a new compositor from already constructed display compositors
    ///
    /// Slot `i` of `slots` drives display `i`.
    pub fn with_slots(resources: Arc<DrmResources>, slots: [D; N]) -> Self {
        DrmCompositor {
            resources,
            pool: DisplayPool::new(slots),
            planner: None,
            frame_no: 0,
            state: InitState::Uninitialized,
            span: info_span!("drm_compositor", displays = N),
        }
    }

    /// Initialize every display compositor and create the planner
    ///
    /// Slots are initialized in display order and the first failure aborts. Slots
    /// initialized before the failure stay initialized. Any failure leaves the compositor
    /// unusable.
    #[profiling::function]
    pub fn init(&mut self) -> Result<(), CompositorError> {
        let _guard = self.span.enter();

        if self.state != InitState::Uninitialized {
            return Err(CompositorError::InvalidOperation("compositor is already initialized"));
        }

        for (index, slot) in self.pool.iter_mut().enumerate() {
            if let Err(source) = slot.init(&self.resources, index) {
                error!(display = index, "Failed to initialize display compositor: {}", source);
                self.state = InitState::Failed;
                return Err(CompositorError::DisplayInit { display: index, source });
            }
        }

        match Planner::create_instance(&self.resources) {
            Ok(planner) => self.planner = Some(Arc::new(planner)),
            Err(err) => {
                error!("Failed to create planner instance for composition: {}", err);
                self.state = InitState::Failed;
                return Err(CompositorError::PlannerInit);
            }
        }

        self.state = InitState::Ready;
        info!("compositor initialized");
        Ok(())
    }

    /// Returns `true` once [`init`](DrmCompositor::init) succeeded
    pub fn is_initialized(&self) -> bool {
        self.state == InitState::Ready
    }

    /// Create a new composition for `frame_no`
    ///
    /// `frame_no` becomes the compositor's current frame number even if creating
    /// the composition fails.
    pub fn create_composition(
        &mut self,
        importer: Arc<dyn Importer>,
        frame_no: u32,
    ) -> Result<DrmComposition, CompositorError> {
        let _guard = self.span.enter();
        self.frame_no = frame_no;

        let planner = match (self.state, self.planner.as_ref()) {
            (InitState::Ready, Some(planner)) => planner.clone(),
            _ => return Err(CompositorError::NotInitialized),
        };

        let mut composition = DrmComposition::new(self.resources.clone(), importer, planner);
        if let Err(err) = composition.init(frame_no) {
            error!(frame = frame_no, "Failed to initialize drm composition: {}", err);
            return Err(CompositorError::CreateComposition(err));
        }

        trace!(frame = frame_no, "composition created");
        Ok(composition)
    }

    /// Plan display `index` of `composition` and hand it over to the display compositor of that slot
    ///
    /// Passing `None` or an `index` outside of the pool fails with
    /// [`CompositorError::InvalidArgument`] before anything is touched. Otherwise the steps
    /// run in order (plan, disable unused planes, queue) and the first failing one aborts.
    /// Each success hands exactly one display composition to the slot.
    #[profiling::function]
    pub fn queue_composition<'a>(
        &mut self,
        composition: impl Into<Option<&'a mut DrmComposition>>,
        index: usize,
    ) -> Result<(), CompositorError> {
        let _guard = self.span.enter();

        let Some(composition) = composition.into() else {
            error!(display = index, "No composition to queue");
            return Err(CompositorError::InvalidArgument("missing composition"));
        };
        if index >= N {
            error!(display = index, slots = N, "Display index out of range");
            return Err(CompositorError::InvalidArgument("display index out of range"));
        }
        if self.state != InitState::Ready {
            return Err(CompositorError::NotInitialized);
        }

        if let Err(source) = composition.plan(&self.pool, index) {
            error!(display = index, "Failed to plan composition: {}", source);
            return Err(CompositorError::Plan { display: index, source });
        }

        if let Err(source) = composition.disable_unused_planes(index) {
            error!(display = index, "Failed to disable unused planes: {}", source);
            return Err(CompositorError::DisableUnusedPlanes { display: index, source });
        }

        let display_composition = match composition.take_display_composition(index) {
            Ok(display_composition) => display_composition,
            Err(source) => {
                error!(display = index, "Failed to take display composition: {}", source);
                return Err(CompositorError::Take { display: index, source });
            }
        };
        let frame = display_composition.frame_no();

        let slot = self
            .pool
            .get_mut(index)
            .ok_or(CompositorError::InvalidArgument("display index out of range"))?;
        if let Err(source) = slot.queue_composition(display_composition) {
            error!(display = index, frame, "Failed to queue composition: {}", source);
            return Err(CompositorError::Queue { display: index, source });
        }

        debug!(display = index, frame, "composition queued");
        Ok(())
    }

    /// Synchronous compositing is not supported
    ///
    /// Frames are composited by the display compositors once queued, this always fails.
    pub fn composite(&self) -> Result<(), CompositorError> {
        let _guard = self.span.enter();
        error!("Synchronous composite is not supported");
        Err(CompositorError::InvalidOperation("synchronous composite is not supported"))
    }

    /// Clear everything the display compositor of display `index` has queued or shows
    pub fn clear_display(&mut self, index: usize) -> Result<(), CompositorError> {
        let _guard = self.span.enter();
        let slot = self.pool.get_mut(index).ok_or_else(|| {
            error!(display = index, slots = N, "Display index out of range");
            CompositorError::InvalidArgument("display index out of range")
        })?;
        slot.clear_display();
        debug!(display = index, "display cleared");
        Ok(())
    }

    /// Write human readable statistics of every display slot to `out`
    pub fn dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        out.write_str("DrmCompositor stats:\n")?;
        self.pool.dump(out)
    }

    /// Frame number passed to the last [`create_composition`](DrmCompositor::create_composition) call
    pub fn frame_number(&self) -> u32 {
        self.frame_no
    }

    /// Hardware description of the managed displays
    pub fn resources(&self) -> &Arc<DrmResources> {
        &self.resources
    }

    /// Planner shared by all compositions, available after initialization
    pub fn planner(&self) -> Option<&Arc<Planner>> {
        self.planner.as_ref()
    }

    /// Display compositor pool
    pub fn pool(&self) -> &DisplayPool<D, N> {
        &self.pool
    }

    /// Mutable access to the display compositor pool
    ///
    /// Used by the backend to commit queued compositions.
    pub fn pool_mut(&mut self) -> &mut DisplayPool<D, N> {
        &mut self.pool
    }
}
