//! SQS core errors

use queuestack_core::{AwsError, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqsError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),
    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),
    #[error("Message not found: {0}")]
    MessageNotFound(String),
    #[error("Receipt handle is invalid or expired: {0}")]
    ReceiptHandleInvalid(String),
    #[error("Invalid attribute value: {0}")]
    InvalidAttributeValue(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SqsError {
    /// Error table entry this failure classifies into
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueNotFound(_) => ErrorCode::QueueNotFound,
            Self::QueueAlreadyExists(_) => ErrorCode::QueueAlreadyExists,
            Self::MessageNotFound(_) => ErrorCode::MessageNotFound,
            Self::ReceiptHandleInvalid(_) => ErrorCode::ReceiptHandleInvalid,
            Self::InvalidAttributeValue(_) => ErrorCode::InvalidAttributeValue,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameterValue,
            Self::MissingParameter(_) => ErrorCode::MissingParameter,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }
}

impl From<SqsError> for AwsError {
    fn from(err: SqsError) -> Self {
        AwsError::new(err.code(), err.to_string())
    }
}
