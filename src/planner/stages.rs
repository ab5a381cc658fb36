use tracing::debug;

use super::{PlanError, PlanStage, PlanState};

/// Gives every protected layer a plane of its own
///
/// Protected content can not be precomposed, so failing to find a plane is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtectedStage;

impl PlanStage for ProtectedStage {
    fn provision(&self, state: &mut PlanState<'_>) -> Result<(), PlanError> {
        let protected = state
            .unplaced_layers()
            .iter()
            .copied()
            .filter(|layer| state.layers()[*layer].protected)
            .collect::<Vec<_>>();

        for layer in protected {
            if state.place_on_next_plane(layer).is_none() {
                debug!(display = state.display(), layer, "no plane left for protected layer");
                return Err(PlanError::ProtectedLayerUnplaced {
                    display: state.display(),
                    layer,
                });
            }
        }

        Ok(())
    }
}

/// Places the remaining layers bottom to top until the planes run out
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyStage;

impl PlanStage for GreedyStage {
    fn provision(&self, state: &mut PlanState<'_>) -> Result<(), PlanError> {
        let remaining = state.unplaced_layers().to_vec();
        for layer in remaining {
            if state.place_on_next_plane(layer).is_none() {
                break;
            }
        }
        Ok(())
    }
}
