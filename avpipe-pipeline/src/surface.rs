//! Display surface collaborator for the render path.

use avpipe_core::{BufferAttrs, OwnedBuffer, Result};
use std::time::Duration;

/// A display queue that consumes rendered output buffers.
pub trait Surface: Send + Sync {
    /// Queue output slot `index` for display.
    fn enqueue(&self, index: u32, buffer: &OwnedBuffer, attrs: &BufferAttrs) -> Result<()>;

    /// Wait up to `timeout` for the surface to give slot `index` back.
    ///
    /// Returns `Ok(false)` if it is still in use.
    fn wait_returned(&self, index: u32, timeout: Duration) -> Result<bool>;
}
