use std::fmt;

use drm::control::{crtc, framebuffer, plane};
use smallvec::SmallVec;

use crate::{
    importer::ImportedBuffer,
    layer::Layer,
    planner::{CompositionPlane, CompositionPlaneKind},
    sync::{SyncPoint, TimelinePoint},
};

/// Power state of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DpmsMode {
    /// Display is on
    On,
    /// Display is in standby
    Standby,
    /// Display is suspended
    Suspend,
    /// Display is off
    Off,
}

impl DpmsMode {
    /// Returns whether the display shows anything in this mode
    pub fn is_on(&self) -> bool {
        *self == DpmsMode::On
    }
}

/// What a [`DisplayComposition`] does once committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayCompositionType {
    /// Nothing was described, all planes get disabled
    Empty,
    /// A frame made of layers
    Frame,
    /// A power state change
    Dpms(DpmsMode),
}

/// The per-display part of a [`DrmComposition`](super::DrmComposition)
///
/// Once taken out of its composition, this is what a
/// [`DisplayCompositor`](crate::display::DisplayCompositor) queues and eventually commits.
/// Dropping it releases all imported buffers.
pub struct DisplayComposition {
    pub(super) display: usize,
    pub(super) crtc: crtc::Handle,
    pub(super) frame_no: u32,
    pub(super) type_: DisplayCompositionType,
    pub(super) layers: Vec<Layer>,
    pub(super) buffers: Vec<ImportedBuffer>,
    pub(super) candidate_planes: SmallVec<[plane::Handle; 4]>,
    pub(super) planes: Vec<CompositionPlane>,
    pub(super) release_point: Option<TimelinePoint>,
}

impl DisplayComposition {
    pub(super) fn new(display: usize, crtc: crtc::Handle, frame_no: u32) -> Self {
        DisplayComposition {
            display,
            crtc,
            frame_no,
            type_: DisplayCompositionType::Empty,
            layers: Vec::new(),
            buffers: Vec::new(),
            candidate_planes: SmallVec::new(),
            planes: Vec::new(),
            release_point: None,
        }
    }

    /// Display slot this composition targets
    pub fn display(&self) -> usize {
        self.display
    }

    /// Crtc of the targeted display
    pub fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    /// Frame number the composition was created for
    pub fn frame_no(&self) -> u32 {
        self.frame_no
    }

    /// Type of the composition
    pub fn type_(&self) -> DisplayCompositionType {
        self.type_
    }

    /// Layers of the composition, bottom to top
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns whether the producer finished writing every layer's buffer
    pub fn is_ready(&self) -> bool {
        self.layers.iter().all(|layer| layer.acquire_fence.is_reached())
    }

    /// Framebuffer of the layer at `index`
    pub fn framebuffer(&self, index: usize) -> Option<framebuffer::Handle> {
        self.buffers.get(index).map(ImportedBuffer::framebuffer)
    }

    /// Plane assignments, including planes to disable
    pub fn composition_planes(&self) -> &[CompositionPlane] {
        &self.planes
    }

    /// Planes showing something after this composition is committed
    pub fn used_planes(&self) -> impl Iterator<Item = plane::Handle> + '_ {
        self.planes
            .iter()
            .filter(|p| p.kind != CompositionPlaneKind::Disable)
            .map(|p| p.plane)
    }

    /// Planes turned off by this composition
    pub fn disabled_planes(&self) -> impl Iterator<Item = plane::Handle> + '_ {
        self.planes
            .iter()
            .filter(|p| p.kind == CompositionPlaneKind::Disable)
            .map(|p| p.plane)
    }

    /// Planes that were considered when planning
    pub fn candidate_planes(&self) -> &[plane::Handle] {
        &self.candidate_planes
    }

    /// Release fence of the composition
    ///
    /// Signaled once the buffers of this composition are no longer scanned out.
    /// Already signaled if the composition was not planned.
    pub fn release_fence(&self) -> SyncPoint {
        self.release_point
            .clone()
            .map(SyncPoint::from)
            .unwrap_or_else(SyncPoint::signaled)
    }

    /// Signal the release fence of this composition
    pub fn signal_release(&self) {
        if let Some(point) = self.release_point.as_ref() {
            point.signal();
        }
    }

    pub(super) fn plan(&mut self, planes: Vec<CompositionPlane>, release_point: TimelinePoint) {
        self.planes = planes;
        self.release_point = Some(release_point);
    }

    pub(super) fn disable_unused_planes(&mut self) -> usize {
        let unused = self
            .candidate_planes
            .iter()
            .copied()
            .filter(|candidate| !self.planes.iter().any(|p| p.plane == *candidate))
            .collect::<SmallVec<[_; 4]>>();
        let count = unused.len();
        self.planes.extend(unused.into_iter().map(CompositionPlane::disable));
        count
    }
}

impl fmt::Debug for DisplayComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayComposition")
            .field("display", &self.display)
            .field("crtc", &self.crtc)
            .field("frame_no", &self.frame_no)
            .field("type_", &self.type_)
            .field("layers", &self.layers.len())
            .field("planes", &self.planes)
            .field("release_point", &self.release_point.as_ref().map(TimelinePoint::point))
            .finish()
    }
}
