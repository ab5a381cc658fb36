//! Description of the displays and planes of a drm device
//!
//! [`DrmResources`] is a read-only snapshot that is shared by the pool slots, the planner and
//! every composition. Discovery of the hardware is left to the embedder, who describes what it
//! found through [`DrmResources::builder`].

use drm::control::{connector, crtc, plane, PlaneType};
use indexmap::IndexMap;

bitflags::bitflags! {
    /// Set of display indices a plane can be attached to
    ///
    /// Mirrors the `possible_crtcs` mask of a drm plane, but is indexed by display slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DisplayMask: u32 {
        /// First display slot
        const DISPLAY_0 = 1 << 0;
        /// Second display slot
        const DISPLAY_1 = 1 << 1;
        /// Third display slot
        const DISPLAY_2 = 1 << 2;
    }
}

impl DisplayMask {
    /// Mask containing just `display`
    ///
    /// Returns an empty mask for indices that do not fit into the mask.
    pub fn single(display: usize) -> Self {
        if display >= u32::BITS as usize {
            return DisplayMask::empty();
        }
        DisplayMask::from_bits_retain(1 << display)
    }

    /// Returns whether `display` is part of this mask
    pub fn contains_display(&self, display: usize) -> bool {
        !DisplayMask::single(display).is_empty() && self.contains(DisplayMask::single(display))
    }
}

/// A physical display known to the resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    /// Crtc driving this display, `None` if the display is currently disconnected
    pub crtc: Option<crtc::Handle>,
    /// Connector of this display
    pub connector: Option<connector::Handle>,
}

/// A hardware plane known to the resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Handle of the plane
    pub handle: plane::Handle,
    /// Type of the plane
    pub type_: PlaneType,
    /// Displays this plane can be used on
    pub possible_displays: DisplayMask,
}

/// Errors thrown while building [`DrmResources`]
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResourcesError {
    /// More displays were described than a [`DisplayMask`] can address
    #[error("Too many displays, at most {max} are supported")]
    TooManyDisplays {
        /// Maximum amount of displays
        max: usize,
    },
    /// The same plane was registered twice
    #[error("Plane `{0:?}` was registered twice")]
    DuplicatePlane(plane::Handle),
    /// A plane references a display that was never described
    #[error("Plane `{plane:?}` references unknown displays {mask:?}")]
    UnknownDisplay {
        /// Plane
        plane: plane::Handle,
        /// Offending mask
        mask: DisplayMask,
    },
}

/// Displays and planes of a drm device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrmResources {
    displays: Vec<DisplayInfo>,
    planes: IndexMap<plane::Handle, PlaneInfo>,
}

impl DrmResources {
    /// Start describing a new set of resources
    pub fn builder() -> DrmResourcesBuilder {
        DrmResourcesBuilder::default()
    }

    /// Amount of described displays
    pub fn display_count(&self) -> usize {
        self.displays.len()
    }

    /// Information about the display at `index`
    pub fn display(&self, index: usize) -> Option<&DisplayInfo> {
        self.displays.get(index)
    }

    /// Crtc of the display at `index`, if it is described and connected
    pub fn crtc_for_display(&self, index: usize) -> Option<crtc::Handle> {
        self.displays.get(index).and_then(|display| display.crtc)
    }

    /// All planes in registration order
    pub fn planes(&self) -> impl Iterator<Item = &PlaneInfo> {
        self.planes.values()
    }

    /// Information about a single plane
    pub fn plane(&self, handle: plane::Handle) -> Option<&PlaneInfo> {
        self.planes.get(&handle)
    }

    /// Planes usable on `display`, primary planes first
    ///
    /// Within a type the registration order is kept.
    pub fn planes_for_display(&self, display: usize) -> impl Iterator<Item = &PlaneInfo> {
        let primary = self
            .planes
            .values()
            .filter(move |p| p.type_ == PlaneType::Primary && p.possible_displays.contains_display(display));
        let others = self
            .planes
            .values()
            .filter(move |p| p.type_ != PlaneType::Primary && p.possible_displays.contains_display(display));
        primary.chain(others)
    }
}

/// Builder for [`DrmResources`]
#[derive(Debug, Default)]
pub struct DrmResourcesBuilder {
    resources: DrmResources,
    error: Option<ResourcesError>,
}

impl DrmResourcesBuilder {
    /// Describe the next display slot
    ///
    /// Slots are indexed in the order they are described.
    pub fn display(mut self, crtc: Option<crtc::Handle>, connector: Option<connector::Handle>) -> Self {
        if self.error.is_none() && self.resources.displays.len() >= u32::BITS as usize {
            self.error = Some(ResourcesError::TooManyDisplays {
                max: u32::BITS as usize,
            });
        }
        self.resources.displays.push(DisplayInfo { crtc, connector });
        self
    }

    /// Register a plane
    pub fn plane(mut self, handle: plane::Handle, type_: PlaneType, possible_displays: DisplayMask) -> Self {
        let info = PlaneInfo {
            handle,
            type_,
            possible_displays,
        };
        if self.resources.planes.insert(handle, info).is_some() && self.error.is_none() {
            self.error = Some(ResourcesError::DuplicatePlane(handle));
        }
        self
    }

    /// Finish the description
    pub fn build(self) -> Result<DrmResources, ResourcesError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let known = (0..self.resources.displays.len())
            .fold(DisplayMask::empty(), |mask, display| mask | DisplayMask::single(display));
        if let Some(plane) = self
            .resources
            .planes
            .values()
            .find(|plane| !known.contains(plane.possible_displays))
        {
            return Err(ResourcesError::UnknownDisplay {
                plane: plane.handle,
                mask: plane.possible_displays.difference(known),
            });
        }

        Ok(self.resources)
    }
}
