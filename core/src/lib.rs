//! Core types, error taxonomy and shared runtime pieces for the RPKI path tracer.

pub mod error;
pub mod log;
pub mod model;
pub mod pool;
pub mod ratelimiter;
pub mod traits;

pub use error::{PipelineError, Result};
pub use log::{LogLevel, Logger, NoOpLogger, TracingLogger};
pub use model::*;
pub use pool::WorkerPool;
pub use traits::{AsLookup, RouteValidator, TraceSource};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
