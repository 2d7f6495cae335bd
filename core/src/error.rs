//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

/// Stage names carried in errors and log lines.
pub mod stage {
    pub const TRACE: &str = "trace";
    pub const RESOLVE: &str = "resolve";
    pub const VALIDATE: &str = "validate";
    pub const CLASSIFY: &str = "classify";
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("trace utility failed for {target}: {reason}")]
    ExternalToolFailure { target: String, reason: String },

    #[error("malformed {stage} output: {detail} (raw: {raw:?})")]
    MalformedOutput {
        stage: &'static str,
        detail: String,
        raw: String,
    },

    #[error("unrecognized validation status {status:?} for AS{asn} {prefix} (raw: {raw})")]
    UnrecognizedValidationStatus {
        asn: u32,
        prefix: String,
        status: String,
        raw: String,
    },

    #[error("no AS mapping for hop {address} of target {target}")]
    MissingAsMapping { target: String, address: String },

    #[error("{stage} service call failed ({context}): {source}")]
    Service {
        stage: &'static str,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("work unit {index} failed: {source}")]
    TaskFailed {
        index: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn malformed(stage: &'static str, detail: impl Into<String>, raw: impl Into<String>) -> Self {
        PipelineError::MalformedOutput { stage, detail: detail.into(), raw: raw.into() }
    }

    pub fn service<E>(stage: &'static str, context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        PipelineError::Service { stage, context: context.into(), source: source.into() }
    }

    /// Unwraps pool aggregation to the error that actually stopped the run.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_task_failure() {
        let inner = PipelineError::malformed(stage::TRACE, "no header", "garbage");
        let err = PipelineError::TaskFailed { index: 3, source: Box::new(inner) };
        match err.root() {
            PipelineError::MalformedOutput { stage, .. } => assert_eq!(*stage, "trace"),
            other => panic!("unexpected root: {other:?}"),
        }
        assert!(!err.is_cancelled());
        let msg = err.to_string();
        assert!(msg.contains("work unit 3"));
        assert!(msg.contains("no header"));
    }

    #[test]
    fn cancelled_is_detected_through_aggregation() {
        let err = PipelineError::TaskFailed { index: 0, source: Box::new(PipelineError::Cancelled) };
        assert!(err.is_cancelled());
    }

    #[test]
    fn service_error_keeps_context() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = PipelineError::service(stage::RESOLVE, "whois.cymru.com:43", io);
        assert_eq!(err.to_string(), "resolve service call failed (whois.cymru.com:43): refused");
    }
}
