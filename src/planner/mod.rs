//! Assignment of layers to hardware planes
//!
//! The [`Planner`] walks the layers of a display from bottom to top and tries to put every
//! layer on a plane of its own. The decision is split into [`PlanStage`]s which run in order,
//! each claiming some of the remaining layers and planes.
//!
//! If a display has more layers than usable planes, the top most candidate plane is reserved
//! up front as *precomposition* plane. Whatever layers no stage managed to place get squashed
//! onto that plane by the display compositor. If nothing is left for it, the reserved plane simply
//! stays unused.
//!
//! Cursor planes are never handed out by the planner.

use std::{collections::VecDeque, fmt};

use drm::control::{plane, PlaneType};
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use crate::{
    layer::Layer,
    resources::{DrmResources, PlaneInfo},
};

mod stages;

pub use self::stages::{GreedyStage, ProtectedStage};

/// Errors thrown by the [`Planner`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The resources do not expose a single plane
    #[error("No hardware planes available")]
    NoHardwarePlanes,
    /// There are layers to show, but no plane is usable on the display
    #[error("No planes usable on display {display}")]
    NoPlanes {
        /// Display
        display: usize,
    },
    /// Layers were left over, but no plane was reserved for precomposition
    #[error("{layers} layer(s) on display {display} could not be placed on any plane")]
    NoPrecompPlane {
        /// Display
        display: usize,
        /// Amount of unplaced layers
        layers: usize,
    },
    /// A protected layer could not be given a plane of its own
    #[error("Protected layer {layer} on display {display} could not be placed on a plane")]
    ProtectedLayerUnplaced {
        /// Display
        display: usize,
        /// Index of the layer
        layer: usize,
    },
}

impl PlanError {
    /// Negative errno equivalent of this error
    pub fn code(&self) -> i32 {
        match self {
            PlanError::NoHardwarePlanes | PlanError::NoPlanes { .. } => -libc::ENODEV,
            PlanError::NoPrecompPlane { .. } | PlanError::ProtectedLayerUnplaced { .. } => -libc::ENOSPC,
        }
    }
}

/// What a planned plane is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositionPlaneKind {
    /// The plane scans out a single layer directly
    Layer,
    /// The plane shows several layers squashed together
    Precomp,
    /// The plane is turned off
    Disable,
}

/// Assignment of one hardware plane in a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionPlane {
    /// Usage of the plane
    pub kind: CompositionPlaneKind,
    /// Plane handle
    pub plane: plane::Handle,
    /// Indices of the layers shown on the plane, bottom to top
    pub source_layers: SmallVec<[usize; 4]>,
}

impl CompositionPlane {
    /// Scan out `layer` on `plane`
    pub fn layer(plane: plane::Handle, layer: usize) -> Self {
        CompositionPlane {
            kind: CompositionPlaneKind::Layer,
            plane,
            source_layers: smallvec![layer],
        }
    }

    /// Squash `layers` onto `plane`
    pub fn precomp(plane: plane::Handle, layers: impl IntoIterator<Item = usize>) -> Self {
        CompositionPlane {
            kind: CompositionPlaneKind::Precomp,
            plane,
            source_layers: layers.into_iter().collect(),
        }
    }

    /// Turn `plane` off
    pub fn disable(plane: plane::Handle) -> Self {
        CompositionPlane {
            kind: CompositionPlaneKind::Disable,
            plane,
            source_layers: SmallVec::new(),
        }
    }
}

/// Working state handed to every [`PlanStage`]
#[derive(Debug)]
pub struct PlanState<'a> {
    display: usize,
    layers: &'a [Layer],
    unplaced: Vec<usize>,
    free_planes: VecDeque<&'a PlaneInfo>,
    planes: Vec<CompositionPlane>,
}

impl<'a> PlanState<'a> {
    /// Display being planned
    pub fn display(&self) -> usize {
        self.display
    }

    /// All layers of the display, bottom to top
    pub fn layers(&self) -> &'a [Layer] {
        self.layers
    }

    /// Indices of the layers that have not been placed yet, bottom to top
    pub fn unplaced_layers(&self) -> &[usize] {
        &self.unplaced
    }

    /// Amount of planes that are still free
    pub fn free_plane_count(&self) -> usize {
        self.free_planes.len()
    }

    /// Place `layer` on the next free plane
    ///
    /// Returns the used plane, or `None` if no plane is left or the layer was already placed.
    pub fn place_on_next_plane(&mut self, layer: usize) -> Option<plane::Handle> {
        let position = self.unplaced.iter().position(|l| *l == layer)?;
        let plane = self.free_planes.pop_front()?;
        self.unplaced.remove(position);
        self.planes.push(CompositionPlane::layer(plane.handle, layer));
        trace!(display = self.display, layer, plane = ?plane.handle, "layer placed");
        Some(plane.handle)
    }
}

/// A single step of the plane assignment
pub trait PlanStage: fmt::Debug + Send + Sync {
    /// Place some of the unplaced layers of `state` on free planes
    fn provision(&self, state: &mut PlanState<'_>) -> Result<(), PlanError>;
}

/// Decides which layer is scanned out on which plane
///
/// A planner is created once and shared by every composition.
#[derive(Debug)]
pub struct Planner {
    stages: Vec<Box<dyn PlanStage>>,
}

impl Planner {
    /// Create a planner running the given stages in order
    pub fn new(stages: Vec<Box<dyn PlanStage>>) -> Self {
        Planner { stages }
    }

    /// Create the default planner for the given resources
    ///
    /// Protected layers are placed first, then everything else greedily.
    pub fn create_instance(resources: &DrmResources) -> Result<Self, PlanError> {
        if resources.planes().next().is_none() {
            return Err(PlanError::NoHardwarePlanes);
        }

        Ok(Planner::new(vec![Box::new(ProtectedStage), Box::new(GreedyStage)]))
    }

    /// Number of stages of this planner
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Assign `layers` of `display` to the `candidates` planes
    ///
    /// `candidates` should be ordered primary plane first. Planes that are not used by
    /// the returned plan are not part of it.
    #[profiling::function]
    pub fn provision(
        &self,
        display: usize,
        layers: &[Layer],
        candidates: &[PlaneInfo],
    ) -> Result<Vec<CompositionPlane>, PlanError> {
        if layers.is_empty() {
            return Ok(Vec::new());
        }

        let mut free_planes = candidates
            .iter()
            .filter(|plane| plane.type_ != PlaneType::Cursor)
            .collect::<VecDeque<_>>();
        if free_planes.is_empty() {
            return Err(PlanError::NoPlanes { display });
        }

        let precomp = if layers.len() > free_planes.len() {
            free_planes.pop_back()
        } else {
            None
        };

        let mut state = PlanState {
            display,
            layers,
            unplaced: (0..layers.len()).collect(),
            free_planes,
            planes: Vec::with_capacity(layers.len()),
        };

        for stage in &self.stages {
            stage.provision(&mut state)?;
            if state.unplaced.is_empty() {
                break;
            }
        }

        if !state.unplaced.is_empty() {
            let Some(precomp) = precomp else {
                return Err(PlanError::NoPrecompPlane {
                    display,
                    layers: state.unplaced.len(),
                });
            };
            trace!(display = state.display, plane = ?precomp.handle, layers = ?state.unplaced, "squashing layers");
            state
                .planes
                .push(CompositionPlane::precomp(precomp.handle, state.unplaced.drain(..)));
        }

        Ok(state.planes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resources::DisplayMask,
        test::{crtc, layer, plane},
    };

    fn candidates(overlays: u32) -> Vec<PlaneInfo> {
        let mut planes = vec![PlaneInfo {
            handle: plane(10),
            type_: PlaneType::Primary,
            possible_displays: DisplayMask::DISPLAY_0,
        }];
        for i in 0..overlays {
            planes.push(PlaneInfo {
                handle: plane(11 + i),
                type_: PlaneType::Overlay,
                possible_displays: DisplayMask::DISPLAY_0,
            });
        }
        planes
    }

    fn default_planner() -> Planner {
        Planner::new(vec![Box::new(ProtectedStage), Box::new(GreedyStage)])
    }

    #[test]
    fn create_instance_needs_planes() {
        let resources = DrmResources::builder().display(Some(crtc(1)), None).build().unwrap();
        assert_eq!(
            Planner::create_instance(&resources).unwrap_err(),
            PlanError::NoHardwarePlanes
        );

        let planner = Planner::create_instance(&crate::test::three_displays()).unwrap();
        assert_eq!(planner.stage_count(), 2);
    }

    #[test]
    fn one_layer_per_plane() {
        let layers = vec![layer(1), layer(2)];
        let plan = default_planner().provision(0, &layers, &candidates(2)).unwrap();
        assert_eq!(
            plan,
            vec![CompositionPlane::layer(plane(10), 0), CompositionPlane::layer(plane(11), 1)]
        );
    }

    #[test]
    fn excess_layers_are_squashed_on_top() {
        let layers = vec![layer(1), layer(2), layer(3), layer(4)];
        let plan = default_planner().provision(0, &layers, &candidates(1)).unwrap();
        assert_eq!(
            plan,
            vec![
                CompositionPlane::layer(plane(10), 0),
                CompositionPlane::precomp(plane(11), [1, 2, 3]),
            ]
        );
    }

    #[test]
    fn single_plane_precomposes_everything() {
        let layers = vec![layer(1), layer(2)];
        let plan = default_planner().provision(0, &layers, &candidates(0)).unwrap();
        assert_eq!(plan, vec![CompositionPlane::precomp(plane(10), [0, 1])]);
    }

    #[test]
    fn protected_layers_go_first() {
        let layers = vec![layer(1), layer(2).protected()];
        let plan = default_planner().provision(0, &layers, &candidates(1)).unwrap();
        assert_eq!(
            plan,
            vec![CompositionPlane::layer(plane(10), 1), CompositionPlane::layer(plane(11), 0)]
        );
    }

    #[test]
    fn protected_layer_without_plane_fails() {
        let layers = vec![layer(1).protected(), layer(2).protected()];
        let err = default_planner().provision(0, &layers, &candidates(0)).unwrap_err();
        assert_eq!(err, PlanError::ProtectedLayerUnplaced { display: 0, layer: 0 });
    }

    #[test]
    fn no_planes() {
        let layers = vec![layer(1)];
        let err = default_planner().provision(2, &layers, &[]).unwrap_err();
        assert_eq!(err, PlanError::NoPlanes { display: 2 });

        // nothing to show needs no planes
        assert!(default_planner().provision(2, &[], &[]).unwrap().is_empty());
    }

    #[test]
    fn cursor_planes_are_skipped() {
        let cursor = PlaneInfo {
            handle: plane(50),
            type_: PlaneType::Cursor,
            possible_displays: DisplayMask::DISPLAY_0,
        };
        let layers = vec![layer(1)];
        let err = default_planner().provision(0, &layers, &[cursor]).unwrap_err();
        assert_eq!(err, PlanError::NoPlanes { display: 0 });
    }

    #[test]
    fn leftovers_without_precomp_plane() {
        // a planner without stages places nothing
        let layers = vec![layer(1)];
        let err = Planner::new(Vec::new())
            .provision(0, &layers, &candidates(1))
            .unwrap_err();
        assert_eq!(err, PlanError::NoPrecompPlane { display: 0, layers: 1 });
    }
}
