//! Layers a caller describes for a display
//!
//! A [`Layer`] is one buffer that should end up on screen, either directly on a hardware
//! plane or squashed together with other layers into a precomposition plane.

use crate::{importer::BufferDescriptor, sync::SyncPoint};

/// Rectangle in display or buffer coordinates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// Horizontal position of the top-left corner
    pub x: i32,
    /// Vertical position of the top-left corner
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rectangle {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rectangle { x, y, width, height }
    }

    /// Create a rectangle at the origin
    pub const fn from_size(width: i32, height: i32) -> Self {
        Rectangle::new(0, 0, width, height)
    }

    /// Returns whether the rectangle covers no area
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// A single buffer to be presented on a display
#[derive(Debug, Clone)]
pub struct Layer {
    /// Buffer of this layer
    pub buffer: BufferDescriptor,
    /// Part of the buffer to sample from
    pub src: Rectangle,
    /// Position on the display
    pub dst: Rectangle,
    /// The buffer holds protected content and must be scanned out directly
    pub protected: bool,
    /// Signaled once the producer finished writing the buffer
    ///
    /// A display compositor does not commit a composition before the acquire fences of all its
    /// layers are reached.
    pub acquire_fence: SyncPoint,
}

impl Layer {
    /// Create a layer scanning out the whole `buffer` at `dst`
    pub fn new(buffer: BufferDescriptor, dst: Rectangle) -> Self {
        let src = Rectangle::from_size(
            i32::try_from(buffer.width).unwrap_or(i32::MAX),
            i32::try_from(buffer.height).unwrap_or(i32::MAX),
        );
        Layer {
            buffer,
            src,
            dst,
            protected: false,
            acquire_fence: SyncPoint::signaled(),
        }
    }

    /// Mark this layer as carrying protected content
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Attach the producer's acquire fence
    pub fn with_acquire_fence(mut self, fence: SyncPoint) -> Self {
        self.acquire_fence = fence;
        self
    }
}
