//! Optional metrics for buffer flow.
//!
//! With the `metrics` feature enabled the macros below forward to the
//! [`metrics`](https://docs.rs/metrics) facade; without it they evaluate
//! their arguments and do nothing.
//!
//! ```toml
//! [dependencies]
//! avpipe-core = { version = "0.1", features = ["metrics"] }
//! ```
//!
//! # Metric Names
//!
//! - `avpipe.pool.acquire` - slots handed out by a pool
//! - `avpipe.pool.acquire_wait_ms` - time spent waiting for a slot
//! - `avpipe.pool.ready` - ready slots after an acquire
//! - `avpipe.pipeline.input_sent` - input buffers accepted by the engine
//! - `avpipe.pipeline.output_emitted` - output buffers handed to the client
//! - `avpipe.pipeline.errors` - fatal worker errors
//! - `avpipe.engine.call_ns` - duration of engine calls

/// Increment a counter.
#[macro_export]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        $crate::__emit_metric!(counter, increment, $name, $value)
    };
}

/// Record a histogram sample.
#[macro_export]
macro_rules! record_histogram {
    ($name:expr, $value:expr) => {
        $crate::__emit_metric!(histogram, record, $name, $value)
    };
}

/// Set a gauge to an absolute value.
#[macro_export]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        $crate::__emit_metric!(gauge, set, $name, $value)
    };
}

#[doc(hidden)]
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! __emit_metric {
    ($kind:ident, $op:ident, $name:expr, $value:expr) => {
        $crate::__metrics::$kind!($name).$op($value)
    };
}

#[doc(hidden)]
#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! __emit_metric {
    ($kind:ident, $op:ident, $name:expr, $value:expr) => {{
        let _ = ($name, $value);
    }};
}

pub use record_counter;
pub use record_gauge;
pub use record_histogram;

/// Run `f` and record its duration in nanoseconds under `metric_name`.
#[inline]
pub fn timed<F, R>(metric_name: &'static str, f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(feature = "metrics")]
    {
        let start = std::time::Instant::now();
        let result = f();
        record_histogram!(metric_name, start.elapsed().as_nanos() as f64);
        result
    }

    #[cfg(not(feature = "metrics"))]
    {
        let _ = metric_name;
        f()
    }
}
