//! # Layer Trait
//!
//! Tower-style composition of the controller chain.
//!
//! ## Overview
//!
//! Each protocol of the kernel lives in its own decorator. A [`Layer`] holds
//! the decorator's configuration and wraps an inner controller:
//!
//! ```text
//! Controller ──▶ Layer::layer() ──▶ Decorated Controller
//! ```
//!
//! The [`Manager`](crate::Manager) builds one chain per mount point, innermost
//! first, and shares it as `Arc<dyn Controller>`:
//!
//! ```rust,ignore
//! let chain = archive
//!     .layer(ResourceLayer::new())
//!     .layer(SyncLayer::new())
//!     .layer(LockLayer::new(config.lock))
//!     .layer(FalsePositiveLayer::new(parent));
//! ```
//!
//! The order matters: the resource check must run inside the sync retry, the
//! sync retry inside the lock, and the false-positive fallback outside the
//! lock so the child lock is released before the parent is consulted.

use crate::Controller;

/// A layer that wraps a controller to add one protocol.
///
/// # Design Notes
///
/// - `layer(self, inner)` consumes both the layer and the inner controller:
///   each decorator exclusively owns the next-inner controller
/// - Composition is static; the finished chain is type-erased once
pub trait Layer<C> {
    /// The resulting controller type after applying this layer.
    type Controller;

    /// Wrap the given controller with this layer's protocol.
    fn layer(self, inner: C) -> Self::Controller;
}

/// Extension trait for fluent layer composition.
///
/// # Example
///
/// ```rust
/// use fedfs_kernel::{Controller, Layer, LayerExt};
///
/// fn compose<C: Controller, L: Layer<C>>(inner: C, layer: L) -> L::Controller {
///     inner.layer(layer)
/// }
/// ```
pub trait LayerExt: Controller + Sized {
    /// Apply a layer to this controller.
    fn layer<L: Layer<Self>>(self, layer: L) -> L::Controller {
        layer.layer(self)
    }
}

impl<C: Controller> LayerExt for C {}
