//! Errors surfaced by the [`DrmCompositor`](crate::compositor::DrmCompositor)

use crate::{composition::CompositionError, display::DisplayError};

/// Errors thrown by the [`DrmCompositor`](crate::compositor::DrmCompositor)
///
/// Every variant maps to the negative errno returned by [`CompositorError::code`],
/// for callers that need to forward an integer status.
#[derive(thiserror::Error, Debug)]
pub enum CompositorError {
    /// No composition was provided or the display index is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation is not supported on this compositor
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
    /// The compositor was not (successfully) initialized
    #[error("The compositor is not initialized")]
    NotInitialized,
    /// A display compositor of the pool failed to initialize
    #[error("Failed to initialize display compositor for display {display}: {source}")]
    DisplayInit {
        /// Index of the failing pool slot
        display: usize,
        /// Underlying display error
        #[source]
        source: DisplayError,
    },
    /// The planner could not be created
    #[error("Failed to create planner instance for composition")]
    PlannerInit,
    /// A newly created composition failed to initialize
    #[error("Failed to initialize drm composition: {0}")]
    CreateComposition(#[source] CompositionError),
    /// Planning the composition failed
    #[error("Plan failed for display {display}: {source}")]
    Plan {
        /// Targeted display
        display: usize,
        /// Underlying composition error
        #[source]
        source: CompositionError,
    },
    /// Disabling the planes unused by the plan failed
    #[error("Disabling unused planes failed for display {display}: {source}")]
    DisableUnusedPlanes {
        /// Targeted display
        display: usize,
        /// Underlying composition error
        #[source]
        source: CompositionError,
    },
    /// The plan could not be moved out of the composition
    #[error("Failed to take composition for display {display}: {source}")]
    Take {
        /// Targeted display
        display: usize,
        /// Underlying composition error
        #[source]
        source: CompositionError,
    },
    /// Handing the plan over to the display compositor failed
    #[error("Failed to queue composition for display {display}: {source}")]
    Queue {
        /// Targeted display
        display: usize,
        /// Underlying display error
        #[source]
        source: DisplayError,
    },
}

impl CompositorError {
    /// Negative errno equivalent of this error
    pub fn code(&self) -> i32 {
        match self {
            CompositorError::InvalidArgument(_) | CompositorError::InvalidOperation(_) => -libc::EINVAL,
            CompositorError::NotInitialized => -libc::ENODEV,
            CompositorError::PlannerInit => -libc::ENOMEM,
            CompositorError::CreateComposition(source)
            | CompositorError::Plan { source, .. }
            | CompositorError::DisableUnusedPlanes { source, .. }
            | CompositorError::Take { source, .. } => source.code(),
            CompositorError::DisplayInit { source, .. } | CompositorError::Queue { source, .. } => {
                source.code()
            }
        }
    }

    /// Returns `true` if this error is fatal for the whole compositor
    ///
    /// Per-frame failures only affect the composition and display they were raised for.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CompositorError::NotInitialized
                | CompositorError::DisplayInit { .. }
                | CompositorError::PlannerInit
        )
    }
}
