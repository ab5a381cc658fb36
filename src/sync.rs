//! Fences used to synchronize buffers with the display hardware
//!
//! Every successfully planned [`DisplayComposition`](crate::composition::DisplayComposition) carries a
//! release fence. The fence is a point on the [`Timeline`] of the display it targets and gets signaled
//! once the buffers of that composition are no longer scanned out.
//!
//! Layers carry an acquire fence in the other direction: the producer signals it once the buffer
//! is fully written, and the composition is not committed before that.

use std::{
    error::Error,
    fmt,
    sync::{Arc, Condvar, Mutex, PoisonError},
};

use downcast_rs::{impl_downcast, Downcast};

/// A wait on a release or acquire fence returned without an answer
///
/// Raised when the timeline lock was poisoned by a panicking signaler. The fence state is
/// unknown, retry the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Waiting on the fence was interrupted")
    }
}
impl Error for Interrupted {}

impl<T> From<PoisonError<T>> for Interrupted {
    fn from(_: PoisonError<T>) -> Self {
        Interrupted
    }
}

/// Something a buffer handoff can wait on
///
/// Implemented by [`TimelinePoint`]. Embedders can wrap their own hardware fences to use them
/// as layer acquire fences.
pub trait Fence: fmt::Debug + Send + Sync + Downcast {
    /// Returns `true` once the fence was signaled
    fn is_signaled(&self) -> bool;

    /// Block until the fence is signaled
    fn wait(&self) -> Result<(), Interrupted>;
}
impl_downcast!(Fence);

/// Optional, shared fence handed between producer, composition and display
///
/// An empty sync point counts as signaled.
#[derive(Debug, Clone)]
#[must_use = "a release fence that is dropped can no longer tell when the composition's buffers may be written again"]
pub struct SyncPoint {
    fence: Option<Arc<dyn Fence>>,
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self::signaled()
    }
}

impl SyncPoint {
    /// Sync point without a fence
    pub fn signaled() -> Self {
        Self {
            fence: Default::default(),
        }
    }

    /// Fence of type `F` backing this sync point
    pub fn get<F: Fence + 'static>(&self) -> Option<&F> {
        self.fence.as_ref().and_then(|f| f.downcast_ref())
    }

    /// Returns whether the fence was signaled, `true` for an empty sync point
    pub fn is_reached(&self) -> bool {
        self.fence.as_ref().map(|f| f.is_signaled()).unwrap_or(true)
    }

    /// Block until the fence is signaled, returns right away for an empty sync point
    #[profiling::function]
    pub fn wait(&self) -> Result<(), Interrupted> {
        if let Some(fence) = self.fence.as_ref() {
            fence.wait()
        } else {
            Ok(())
        }
    }
}

impl<T: Fence + 'static> From<T> for SyncPoint {
    fn from(value: T) -> Self {
        SyncPoint {
            fence: Some(Arc::new(value)),
        }
    }
}

#[derive(Debug, Default)]
struct TimelineInner {
    // (last created point, last signaled point)
    points: Mutex<(u64, u64)>,
    signaled: Condvar,
}

/// Monotonic software timeline
///
/// Points are created in increasing order and signaling a point signals
/// every point before it as well.
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<TimelineInner>);

impl Timeline {
    /// Create a new timeline with nothing created or signaled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the next point on this timeline
    pub fn create_point(&self) -> TimelinePoint {
        let mut points = self.0.points.lock().unwrap_or_else(PoisonError::into_inner);
        points.0 += 1;
        TimelinePoint {
            timeline: self.clone(),
            point: points.0,
        }
    }

    /// Signal every point up to and including `point`
    ///
    /// Signaling a point that was already reached is a no-op.
    pub fn signal(&self, point: u64) {
        let mut points = self.0.points.lock().unwrap_or_else(PoisonError::into_inner);
        let target = point.min(points.0);
        if target > points.1 {
            points.1 = target;
            self.0.signaled.notify_all();
        }
    }

    /// Signal every point created so far
    pub fn signal_all(&self) {
        let mut points = self.0.points.lock().unwrap_or_else(PoisonError::into_inner);
        if points.1 != points.0 {
            points.1 = points.0;
            self.0.signaled.notify_all();
        }
    }

    /// The last point that has been signaled
    pub fn signaled_point(&self) -> u64 {
        self.0.points.lock().unwrap_or_else(PoisonError::into_inner).1
    }

    /// The last point that has been created
    pub fn last_point(&self) -> u64 {
        self.0.points.lock().unwrap_or_else(PoisonError::into_inner).0
    }
}

impl PartialEq for Timeline {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Point on a [`Timeline`]
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePoint {
    timeline: Timeline,
    point: u64,
}

impl TimelinePoint {
    /// Value of this point on its timeline
    pub fn point(&self) -> u64 {
        self.point
    }

    /// Timeline this point belongs to
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Signal this point (and all points before it)
    pub fn signal(&self) {
        self.timeline.signal(self.point);
    }
}

impl Fence for TimelinePoint {
    fn is_signaled(&self) -> bool {
        self.timeline.signaled_point() >= self.point
    }

    fn wait(&self) -> Result<(), Interrupted> {
        let inner = &self.timeline.0;
        let points = inner.points.lock()?;
        let _points = inner.signaled.wait_while(points, |points| points.1 < self.point)?;
        Ok(())
    }
}
