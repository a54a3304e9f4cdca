use std::time::Duration;

/// Request-scoped failures surfaced by the signal pipeline.
///
/// "No vehicles" is never an error: an empty scene decides to a LOW result
/// with `vehicle_count = 0`. Every variant here means no decision was made.
#[derive(thiserror::Error, Debug)]
pub enum SignalError {
    /// Image missing, empty, or undecodable. Raised before any inference.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// The detector backend failed while running inference.
    #[error("detection failed: {0}")]
    DetectionFailure(String),
    /// The detector backend did not answer within the pipeline timeout.
    #[error("detection timed out after {}ms", .0.as_millis())]
    DetectionTimeout(Duration),
    /// Unknown preset, unserviceable model variant, or malformed tables.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    /// A caller-supplied vehicle count was negative or out of range.
    #[error("invalid vehicle count {0}: counts must lie in 0..=4294967295")]
    InvalidCount(i64),
}

impl SignalError {
    /// Stable machine-readable code used by the HTTP and CLI surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            SignalError::InvalidImage(_) => "invalid_image",
            SignalError::DetectionFailure(_) => "detection_failed",
            SignalError::DetectionTimeout(_) => "detection_timeout",
            SignalError::ConfigurationError(_) => "configuration_error",
            SignalError::InvalidCount(_) => "invalid_count",
        }
    }

    pub(crate) fn detection(err: anyhow::Error) -> Self {
        SignalError::DetectionFailure(format!("{:#}", err))
    }
}

pub type SignalResult<T> = std::result::Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_failure_keeps_context_chain() {
        let err = anyhow::anyhow!("tensor shape mismatch").context("ONNX inference failed");
        let sig = SignalError::detection(err);
        assert_eq!(sig.code(), "detection_failed");
        assert_eq!(
            sig.to_string(),
            "detection failed: ONNX inference failed: tensor shape mismatch"
        );
    }

    #[test]
    fn timeout_renders_milliseconds() {
        let sig = SignalError::DetectionTimeout(Duration::from_millis(1500));
        assert_eq!(sig.to_string(), "detection timed out after 1500ms");
    }
}
