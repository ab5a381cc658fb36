//! Import of client buffers as drm framebuffers
//!
//! The [`Importer`] of a display owns the buffer and framebuffer bookkeeping. A composition
//! imports the buffers of every layer it describes and keeps them as [`ImportedBuffer`]s, which
//! hand the framebuffer back to the importer once the composition is dropped.

use std::{fmt, sync::Arc};

use drm::control::framebuffer;
use drm_fourcc::{DrmFourcc, DrmModifier};

/// Description of a client buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Producer-assigned identifier of the buffer
    pub id: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: DrmFourcc,
    /// Format modifier
    pub modifier: DrmModifier,
}

impl BufferDescriptor {
    /// Describe a linear buffer
    pub fn new(id: u64, width: u32, height: u32, format: DrmFourcc) -> Self {
        BufferDescriptor {
            id,
            width,
            height,
            format,
            modifier: DrmModifier::Linear,
        }
    }
}

/// Errors thrown by an [`Importer`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// The format can not be scanned out
    #[error("Format `{0:?}` is not supported for scan-out")]
    UnsupportedFormat(DrmFourcc),
    /// The buffer is invalid (e.g. zero-sized or already destroyed)
    #[error("Buffer {0} can not be imported")]
    InvalidBuffer(u64),
}

impl ImportError {
    /// Negative errno equivalent of this error
    pub fn code(&self) -> i32 {
        match self {
            ImportError::UnsupportedFormat(_) => -libc::EOPNOTSUPP,
            ImportError::InvalidBuffer(_) => -libc::EINVAL,
        }
    }
}

/// Turns client buffers into drm framebuffers
pub trait Importer: fmt::Debug + Send + Sync {
    /// Import a buffer and create a framebuffer for it
    fn import_buffer(&self, buffer: &BufferDescriptor) -> Result<framebuffer::Handle, ImportError>;

    /// Release a framebuffer previously returned by [`Importer::import_buffer`]
    fn release_buffer(&self, fb: framebuffer::Handle);
}

/// A buffer imported for one composition
///
/// The framebuffer is released through its importer on drop.
pub struct ImportedBuffer {
    importer: Arc<dyn Importer>,
    descriptor: BufferDescriptor,
    fb: framebuffer::Handle,
}

impl ImportedBuffer {
    /// Import `descriptor` through `importer`
    pub fn import(importer: &Arc<dyn Importer>, descriptor: BufferDescriptor) -> Result<Self, ImportError> {
        let fb = importer.import_buffer(&descriptor)?;
        Ok(ImportedBuffer {
            importer: importer.clone(),
            descriptor,
            fb,
        })
    }

    /// Framebuffer handle of the buffer
    pub fn framebuffer(&self) -> framebuffer::Handle {
        self.fb
    }

    /// Description of the buffer
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for ImportedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportedBuffer")
            .field("descriptor", &self.descriptor)
            .field("fb", &self.fb)
            .finish()
    }
}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        self.importer.release_buffer(self.fb);
    }
}
