//! Queue error table and protocol-facing error values

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Internal failure codes recognised by the queue core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    QueueNotFound,
    QueueAlreadyExists,
    MessageNotFound,
    ReceiptHandleInvalid,
    InvalidAttributeValue,
    InvalidParameterValue,
    MissingParameter,
    ConfigurationError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        Self::QueueNotFound,
        Self::QueueAlreadyExists,
        Self::MessageNotFound,
        Self::ReceiptHandleInvalid,
        Self::InvalidAttributeValue,
        Self::InvalidParameterValue,
        Self::MissingParameter,
        Self::ConfigurationError,
    ];

    /// Look up this code in the error registry
    pub fn descriptor(&self) -> &'static ErrorDescriptor {
        ErrorRegistry::global().lookup(*self)
    }

    pub fn as_str(&self) -> &'static str {
        self.descriptor().code
    }

    pub fn http_status(&self) -> u16 {
        self.descriptor().http_status
    }
}

/// Externally documented shape of a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDescriptor {
    pub http_status: u16,
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: &'static str,
}

/// Fixed mapping from [`ErrorCode`] to [`ErrorDescriptor`].
///
/// Built once on first use and never mutated afterwards.
pub struct ErrorRegistry {
    entries: HashMap<ErrorCode, ErrorDescriptor>,
}

static REGISTRY: Lazy<ErrorRegistry> = Lazy::new(ErrorRegistry::build);

impl ErrorRegistry {
    pub fn global() -> &'static ErrorRegistry {
        &REGISTRY
    }

    fn build() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ErrorCode::QueueNotFound,
            ErrorDescriptor {
                http_status: 400,
                error_type: "Not Found",
                code: "AWS.SimpleQueueService.NonExistentQueue",
                message: "The specified queue does not exist for this wsdl version.",
            },
        );
        entries.insert(
            ErrorCode::QueueAlreadyExists,
            ErrorDescriptor {
                http_status: 400,
                error_type: "Duplicate",
                code: "QueueAlreadyExists",
                message: "The specified queue already exists.",
            },
        );
        entries.insert(
            ErrorCode::MessageNotFound,
            ErrorDescriptor {
                http_status: 404,
                error_type: "Not Found",
                code: "AWS.SimpleQueueService.MessageNotInflight",
                message: "The specified queue does not contain the message specified.",
            },
        );
        entries.insert(
            ErrorCode::ReceiptHandleInvalid,
            ErrorDescriptor {
                http_status: 400,
                error_type: "Not Found",
                code: "ReceiptHandleIsInvalid",
                message: "The input receipt handle is invalid or has expired.",
            },
        );
        entries.insert(
            ErrorCode::InvalidAttributeValue,
            ErrorDescriptor {
                http_status: 400,
                error_type: "InvalidAttributeValue",
                code: "InvalidAttributeValue",
                message: "Invalid Value for the parameter MessageAttributes.",
            },
        );
        entries.insert(
            ErrorCode::InvalidParameterValue,
            ErrorDescriptor {
                http_status: 400,
                error_type: "InvalidParameterValue",
                code: "InvalidParameterValue",
                message: "An invalid or out-of-range value was supplied for the input parameter.",
            },
        );
        entries.insert(
            ErrorCode::MissingParameter,
            ErrorDescriptor {
                http_status: 400,
                error_type: "MissingParameter",
                code: "MissingParameter",
                message: "A required parameter for the specified action is not supplied.",
            },
        );
        entries.insert(
            ErrorCode::ConfigurationError,
            ErrorDescriptor {
                http_status: 500,
                error_type: "Receiver",
                code: "InternalFailure",
                message: "The request processing has failed because of a configuration error.",
            },
        );
        Self { entries }
    }

    pub fn lookup(&self, code: ErrorCode) -> &ErrorDescriptor {
        // build() registers every variant of ErrorCode
        &self.entries[&code]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Protocol-facing error: a registry entry plus request-specific detail
#[derive(Debug, Error)]
#[error("{}: {message}", .code.as_str())]
pub struct AwsError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl AwsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn descriptor(&self) -> &'static ErrorDescriptor {
        self.code.descriptor()
    }

    pub fn http_status(&self) -> u16 {
        self.descriptor().http_status
    }

    /// Format as SQS query-protocol XML error
    pub fn to_xml(&self) -> String {
        let descriptor = self.descriptor();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ErrorResponse>
    <Error>
        <Type>{}</Type>
        <Code>{}</Code>
        <Message>{}</Message>
        <Detail>{}</Detail>
    </Error>
    <RequestId>{}</RequestId>
</ErrorResponse>"#,
            descriptor.error_type,
            descriptor.code,
            descriptor.message,
            self.message,
            self.request_id
        )
    }

    /// Format as SQS JSON-protocol error
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: String,
            message: &'a str,
        }

        let error = JsonError {
            error_type: format!("com.amazonaws.sqs#{}", self.code.as_str()),
            message: &self.message,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"__type":"{}","message":"{}"}}"#, self.code.as_str(), self.message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_has_an_entry() {
        let registry = ErrorRegistry::global();
        assert_eq!(registry.len(), ErrorCode::ALL.len());
        for code in ErrorCode::ALL {
            let descriptor = registry.lookup(code);
            assert!(!descriptor.code.is_empty());
            assert!(!descriptor.message.is_empty());
        }
    }

    #[test]
    fn test_registry_is_shared() {
        let a = ErrorCode::QueueNotFound.descriptor() as *const ErrorDescriptor;
        let b = ErrorRegistry::global().lookup(ErrorCode::QueueNotFound) as *const ErrorDescriptor;
        assert_eq!(a, b);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::QueueAlreadyExists.http_status(), 400);
        assert_eq!(ErrorCode::MessageNotFound.http_status(), 404);
        assert_eq!(ErrorCode::ConfigurationError.http_status(), 500);
        assert_eq!(ErrorCode::ReceiptHandleInvalid.as_str(), "ReceiptHandleIsInvalid");
    }

    #[test]
    fn test_error_xml_format() {
        let error = AwsError::new(ErrorCode::QueueNotFound, "orders")
            .with_request_id("test-request-id");

        let xml = error.to_xml();
        assert!(xml.contains("<Code>AWS.SimpleQueueService.NonExistentQueue</Code>"));
        assert!(xml.contains("<Type>Not Found</Type>"));
        assert!(xml.contains("<Detail>orders</Detail>"));
        assert!(xml.contains("<RequestId>test-request-id</RequestId>"));
    }

    #[test]
    fn test_error_json_format() {
        let error = AwsError::new(ErrorCode::ReceiptHandleInvalid, "stale handle");

        let json = error.to_json();
        assert!(json.contains("com.amazonaws.sqs#ReceiptHandleIsInvalid"));
        assert!(json.contains("stale handle"));
    }
}
