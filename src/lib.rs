#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # hwcomposer: multi-display drm plane composition
//!
//! This crate sits between a frame producer (a window or surface manager) and the per-display
//! backends that program the display hardware. It owns one [`DisplayCompositor`](display::DisplayCompositor)
//! per physical display, manufactures per-frame [`DrmComposition`](composition::DrmComposition)s and
//! moves them through the plan → disable unused planes → queue protocol.
//!
//! ## Structure of the crate
//!
//! - [`compositor`] contains the [`DrmCompositor`](compositor::DrmCompositor), the orchestrator
//!   that ties everything together.
//! - [`composition`] contains the per-frame unit of work and the per-display plan that gets handed
//!   to a display compositor.
//! - [`planner`] decides which layer ends up on which hardware plane.
//! - [`display`] and [`pool`] contain the per-display backends and the fixed-size pool holding them.
//! - [`resources`], [`importer`], [`layer`] and [`sync`] describe the hardware, the buffers and the
//!   fences flowing through the pipeline.
//!
//! ## Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use hwcomposer::importer::Importer;
//! use hwcomposer::{
//!     compositor::DrmCompositor,
//!     display::QueuedDisplayCompositor,
//!     resources::DrmResources,
//! };
//!
//! # let resources: DrmResources = todo!();
//! # let importer: Arc<dyn Importer> = todo!();
//! # let layers = Vec::new();
//! let mut compositor: DrmCompositor<QueuedDisplayCompositor> = DrmCompositor::new(Arc::new(resources));
//! compositor.init().expect("failed to initialize the compositor");
//!
//! let mut composition = compositor
//!     .create_composition(importer, 42)
//!     .expect("failed to create composition");
//! composition.set_layers(0, layers).expect("failed to describe the frame");
//! compositor
//!     .queue_composition(&mut composition, 0)
//!     .expect("failed to queue composition");
//! ```
//!
//! ### Logging
//!
//! This crate uses [`tracing`] for its internal logging. Every failing step of the queue protocol is
//! reported at the `error` level together with the display it targeted.

pub mod composition;
pub mod compositor;
pub mod display;
pub mod error;
pub mod importer;
pub mod layer;
pub mod planner;
pub mod pool;
pub mod resources;
pub mod sync;


pub use compositor::{DrmCompositor, MAX_DISPLAYS};
pub use error::CompositorError;
