use super::error_fmt::os_status;
use super::types::DeviceId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HwError {
    #[error("can't open device {0}")]
    InvalidDevice(DeviceId),

    #[error("couldn't change sample rate/buffer size (wanted {sample_rate} Hz, {buffer_size} frames)")]
    ConfigurationTimeout { sample_rate: f64, buffer_size: usize },

    #[error("device has no available sample-rates")]
    NoSampleRates,

    #[error("device has no available buffer-sizes")]
    NoBufferSizes,

    #[error("{operation} failed: {}", describe_status(.code))]
    Status { operation: &'static str, code: i32 },

    #[error("input and output buffer sizes differ ({output} vs {input} frames)")]
    BufferSizeMismatch { output: usize, input: usize },

    #[error("device is not open")]
    NotOpen,

    #[error("devices have not been scanned yet")]
    NotScanned,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<HwError>),
}

impl HwError {
    pub fn status(operation: &'static str, code: i32) -> Self {
        HwError::Status { operation, code }
    }

    /// Collapses accumulated errors: none, one, or an aggregate.
    pub fn collect(mut errors: Vec<HwError>) -> Option<HwError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(HwError::Aggregate(errors)),
        }
    }
}

fn describe_status(code: &i32) -> String {
    os_status(*code)
}

fn join_errors(errors: &[HwError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type HwResult<T> = Result<T, HwError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::error_fmt::ILLEGAL_OPERATION;

    #[test]
    fn status_errors_name_the_operation() {
        let err = HwError::status("set sample rate", ILLEGAL_OPERATION);
        assert_eq!(
            err.to_string(),
            "set sample rate failed: kAudioHardwareIllegalOperationError ('nope')"
        );
    }

    #[test]
    fn collect_flattens_single_errors() {
        assert_eq!(HwError::collect(vec![]), None);
        assert_eq!(
            HwError::collect(vec![HwError::NoSampleRates]),
            Some(HwError::NoSampleRates)
        );
        let many = HwError::collect(vec![HwError::NoSampleRates, HwError::NoBufferSizes])
            .expect("aggregate");
        assert_eq!(
            many.to_string(),
            "device has no available sample-rates; device has no available buffer-sizes"
        );
    }
}
