//! Client notification interface.

use avpipe_core::{BufferAttrs, ErrorKind, FormatMap};

/// Receives buffer and error notifications from a pipeline.
///
/// Methods run on the pipeline's worker threads and must return quickly.
/// They may call back into the pipeline's data-plane methods.
pub trait Callback: Send + Sync {
    /// Input slot `index` is owned by the client and may be filled.
    fn on_input_buffer_available(&self, index: u32);

    /// Output slot `index` holds a result described by `attrs`.
    fn on_output_buffer_available(&self, index: u32, attrs: BufferAttrs);

    /// The output format changed; later output buffers follow `format`.
    fn on_output_format_changed(&self, format: &FormatMap) {
        let _ = format;
    }

    /// An asynchronous failure moved the pipeline to its error state.
    fn on_error(&self, kind: ErrorKind, code: i32);
}
