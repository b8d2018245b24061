//! Message records and their delivery metadata

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::SqsError;

/// A single message attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributeValue {
    pub name: String,
    /// `String`, `Number` or `Binary`, optionally with a `.custom` suffix
    pub data_type: String,
    /// Base64 text when the data type is `Binary`
    pub value: String,
}

impl MessageAttributeValue {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            value: value.into(),
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, "String", value)
    }

    pub fn number(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, "Number", value)
    }

    fn base_type(&self) -> &str {
        self.data_type.split('.').next().unwrap_or_default()
    }

    fn is_binary(&self) -> bool {
        self.base_type() == "Binary"
    }

    pub fn validate(&self) -> Result<(), SqsError> {
        if self.name.is_empty() {
            return Err(SqsError::InvalidAttributeValue(
                "Attribute name must not be empty".into(),
            ));
        }
        if self.value.is_empty() {
            return Err(SqsError::InvalidAttributeValue(format!(
                "Attribute {} must have a value",
                self.name
            )));
        }
        match self.base_type() {
            "String" => Ok(()),
            "Number" => match self.value.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(()),
                _ => Err(SqsError::InvalidAttributeValue(format!(
                    "Attribute {} is not a valid number: {}",
                    self.name, self.value
                ))),
            },
            "Binary" => self.decoded_binary().map(|_| ()),
            other => Err(SqsError::InvalidAttributeValue(format!(
                "Attribute {} has unsupported data type: {}",
                self.name, other
            ))),
        }
    }

    fn decoded_binary(&self) -> Result<Vec<u8>, SqsError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.value)
            .map_err(|e| {
                SqsError::InvalidAttributeValue(format!(
                    "Attribute {} is not valid base64: {e}",
                    self.name
                ))
            })
    }
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Big-endian 4-byte length used by the attribute digest
fn length_prefix(len: usize) -> Result<[u8; 4], SqsError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| {
            SqsError::InvalidAttributeValue(format!("Attribute field too long: {len} bytes"))
        })
}

fn push_length_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), SqsError> {
    buf.extend_from_slice(&length_prefix(bytes.len())?);
    buf.extend_from_slice(bytes);
    Ok(())
}

/// MD5 over the canonical SQS attribute encoding; `None` for no attributes.
///
/// Attributes must already be validated.
pub fn md5_of_attributes(
    attrs: &HashMap<String, MessageAttributeValue>,
) -> Result<Option<String>, SqsError> {
    if attrs.is_empty() {
        return Ok(None);
    }
    let mut names: Vec<&String> = attrs.keys().collect();
    names.sort();

    let mut buf = Vec::new();
    for name in names {
        let attr = &attrs[name];
        push_length_prefixed(&mut buf, name.as_bytes())?;
        push_length_prefixed(&mut buf, attr.data_type.as_bytes())?;
        if attr.is_binary() {
            buf.push(2);
            push_length_prefixed(&mut buf, &attr.decoded_binary()?)?;
        } else {
            buf.push(1);
            push_length_prefixed(&mut buf, attr.value.as_bytes())?;
        }
    }
    Ok(Some(md5_hex(&buf)))
}

/// A message held by a queue
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub message_id: String,
    pub body: Vec<u8>,
    pub md5_of_body: String,
    pub md5_of_message_attributes: Option<String>,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    /// Current delivery's handle; regenerated on every receive
    pub receipt_handle: Option<String>,
    pub receipt_time: Option<DateTime<Utc>>,
    /// End of the current visibility window
    pub visibility_timeout: Option<DateTime<Utc>>,
    pub receive_count: u32,
    /// Deliveries after the first one
    pub retry: u32,
    /// Empty for standard queues
    pub group_id: String,
    pub sequence_number: Option<String>,
    pub sent_time: DateTime<Utc>,
    /// Simulated propagation delay, fixed at enqueue
    pub latency: Duration,
}

impl MessageRecord {
    pub fn new(
        body: Vec<u8>,
        attributes: Vec<MessageAttributeValue>,
        group_id: impl Into<String>,
        sent_time: DateTime<Utc>,
        latency: Duration,
    ) -> Result<Self, SqsError> {
        let mut message_attributes = HashMap::with_capacity(attributes.len());
        for attr in attributes {
            attr.validate()?;
            if message_attributes.contains_key(&attr.name) {
                return Err(SqsError::InvalidAttributeValue(format!(
                    "Duplicate attribute name: {}",
                    attr.name
                )));
            }
            message_attributes.insert(attr.name.clone(), attr);
        }

        let md5_of_message_attributes = md5_of_attributes(&message_attributes)?;
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            md5_of_body: md5_hex(&body),
            md5_of_message_attributes,
            body,
            message_attributes,
            receipt_handle: None,
            receipt_time: None,
            visibility_timeout: None,
            receive_count: 0,
            retry: 0,
            group_id: group_id.into(),
            sequence_number: None,
            sent_time,
            latency,
        })
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Earliest instant at which the message may be delivered
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.sent_time + self.latency
    }

    /// True while a delivery is outstanding and its window has not lapsed
    pub fn is_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.receipt_handle.is_some()
            && self.visibility_timeout.is_some_and(|expiry| now < expiry)
    }

    /// True once the delivery window has lapsed without a delete
    pub fn delivery_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.receipt_handle.is_some()
            && self.visibility_timeout.map_or(true, |expiry| now >= expiry)
    }

    /// Issue a fresh delivery of this message
    pub(crate) fn begin_delivery(&mut self, now: DateTime<Utc>, timeout: Duration) -> String {
        let handle = Uuid::new_v4().to_string();
        self.receipt_handle = Some(handle.clone());
        self.receipt_time = Some(now);
        self.visibility_timeout = Some(now + timeout);
        self.receive_count += 1;
        if self.receive_count > 1 {
            self.retry += 1;
        }
        handle
    }

    /// Drop the current delivery so the message becomes visible again
    pub(crate) fn release(&mut self) {
        self.receipt_handle = None;
        self.visibility_timeout = None;
    }

    /// Whether this message should move to the dead-letter queue.
    ///
    /// A threshold of zero means no redrive policy.
    pub fn is_dead_letter_eligible(&self, max_receive_count: u32) -> bool {
        max_receive_count > 0 && self.receive_count > max_receive_count
    }

    pub fn is_fifo(&self) -> bool {
        !self.group_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(attrs: Vec<MessageAttributeValue>) -> Result<MessageRecord, SqsError> {
        MessageRecord::new(b"hello".to_vec(), attrs, "", Utc::now(), Duration::zero())
    }

    #[test]
    fn test_body_md5() {
        let msg = record(vec![]).unwrap();
        assert_eq!(msg.md5_of_body, "5d41402abc4b2a76b9719d911017c592");
        assert!(msg.md5_of_message_attributes.is_none());
        assert_eq!(msg.body_str(), "hello");
    }

    #[test]
    fn test_attribute_md5_is_order_independent() {
        let a = MessageAttributeValue::string("a", "1");
        let b = MessageAttributeValue::number("b", "2");
        let first = record(vec![a.clone(), b.clone()]).unwrap();
        let second = record(vec![b, a]).unwrap();
        assert!(first.md5_of_message_attributes.is_some());
        assert_eq!(
            first.md5_of_message_attributes,
            second.md5_of_message_attributes
        );
    }

    #[test]
    fn test_attribute_md5_changes_with_value() {
        let first = record(vec![MessageAttributeValue::string("a", "1")]).unwrap();
        let second = record(vec![MessageAttributeValue::string("a", "2")]).unwrap();
        assert_ne!(
            first.md5_of_message_attributes,
            second.md5_of_message_attributes
        );
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for value in ["NaN", "inf", "-infinity", "1e999"] {
            let attr = MessageAttributeValue::number("n", value);
            assert!(
                matches!(attr.validate(), Err(SqsError::InvalidAttributeValue(_))),
                "{value} accepted"
            );
        }
        assert!(MessageAttributeValue::number("n", "-1.5e3").validate().is_ok());
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        assert_eq!(length_prefix(3).unwrap(), [0, 0, 0, 3]);
        assert_eq!(length_prefix(0x0102).unwrap(), [0, 0, 1, 2]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_length_prefix_overflow_is_an_error() {
        let too_long = usize::try_from(u64::from(u32::MAX) + 1).unwrap();
        assert!(matches!(
            length_prefix(too_long),
            Err(SqsError::InvalidAttributeValue(_))
        ));
    }

    #[test]
    fn test_invalid_attributes_rejected() {
        let bad_number = record(vec![MessageAttributeValue::number("n", "abc")]);
        assert!(matches!(bad_number, Err(SqsError::InvalidAttributeValue(_))));

        let bad_type = record(vec![MessageAttributeValue::new("t", "Date", "x")]);
        assert!(matches!(bad_type, Err(SqsError::InvalidAttributeValue(_))));

        let bad_binary = record(vec![MessageAttributeValue::new("b", "Binary", "!!!")]);
        assert!(matches!(bad_binary, Err(SqsError::InvalidAttributeValue(_))));

        let duplicate = record(vec![
            MessageAttributeValue::string("a", "1"),
            MessageAttributeValue::string("a", "2"),
        ]);
        assert!(matches!(duplicate, Err(SqsError::InvalidAttributeValue(_))));
    }

    #[test]
    fn test_custom_and_binary_types_accepted() {
        let msg = record(vec![
            MessageAttributeValue::new("price", "Number.float", "1.5"),
            MessageAttributeValue::new("blob", "Binary", "aGVsbG8="),
        ])
        .unwrap();
        assert_eq!(msg.message_attributes.len(), 2);
    }

    #[test]
    fn test_delivery_bookkeeping() {
        let mut msg = record(vec![]).unwrap();
        let now = Utc::now();

        let first = msg.begin_delivery(now, Duration::seconds(30));
        assert_eq!(msg.receive_count, 1);
        assert_eq!(msg.retry, 0);
        assert!(msg.is_in_flight(now));
        assert!(!msg.delivery_lapsed(now + Duration::seconds(29)));
        assert!(msg.delivery_lapsed(now + Duration::seconds(30)));

        let second = msg.begin_delivery(now + Duration::seconds(31), Duration::seconds(30));
        assert_ne!(first, second);
        assert_eq!(msg.receive_count, 2);
        assert_eq!(msg.retry, 1);

        msg.release();
        assert!(!msg.is_in_flight(now));
        assert!(msg.receipt_handle.is_none());
    }

    #[test]
    fn test_dead_letter_eligibility() {
        let mut msg = record(vec![]).unwrap();
        let now = Utc::now();
        msg.begin_delivery(now, Duration::seconds(1));
        msg.begin_delivery(now, Duration::seconds(1));
        assert!(!msg.is_dead_letter_eligible(2));
        msg.begin_delivery(now, Duration::seconds(1));
        assert!(msg.is_dead_letter_eligible(2));
        assert!(!msg.is_dead_letter_eligible(0));
    }
}
