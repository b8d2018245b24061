//! Queue state: ordered messages, visibility and FIFO groups

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::config::SqsConfig;
use crate::error::SqsError;
use crate::fifo::FifoGroupLock;
use crate::latency::VisibilityClock;
use crate::message::{MessageAttributeValue, MessageRecord};
use crate::registry::{QueueHandle, SharedQueue};

/// Name suffix reserved for FIFO queues
pub const FIFO_SUFFIX: &str = ".fifo";

pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;
pub const MAX_RECEIVE_WAIT_TIME: u32 = 20;
pub const MAX_RECEIVE_BATCH: usize = 10;

pub fn is_fifo_queue_name(name: &str) -> bool {
    name.ends_with(FIFO_SUFFIX)
}

/// Check a queue name against SQS naming rules
pub fn validate_queue_name(name: &str, fifo: bool) -> Result<(), SqsError> {
    let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(name);
    if name.is_empty() || name.len() > 80 || base.is_empty() {
        return Err(SqsError::InvalidParameter(
            "Queue name must be 1-80 characters".into(),
        ));
    }
    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidParameter(format!(
            "Queue name can only contain alphanumeric characters, hyphens, and underscores: {name}"
        )));
    }
    match (fifo, is_fifo_queue_name(name)) {
        (true, false) => Err(SqsError::InvalidParameter(format!(
            "FIFO queue name must end with {FIFO_SUFFIX}: {name}"
        ))),
        (false, true) => Err(SqsError::InvalidParameter(format!(
            "Non-FIFO queue name must not end with {FIFO_SUFFIX}: {name}"
        ))),
        _ => Ok(()),
    }
}

/// Creation parameters for a queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub fifo: bool,
    /// Default visibility timeout in seconds
    pub visibility_timeout: u32,
    /// Long-poll wait in seconds
    pub receive_wait_time_seconds: u32,
    /// Receives after which a message is dead-letter eligible; 0 disables
    pub max_receive_count: u32,
    pub dead_letter_queue: Option<SharedQueue>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fifo: false,
            visibility_timeout: 30,
            receive_wait_time_seconds: 0,
            max_receive_count: 0,
            dead_letter_queue: None,
        }
    }
}

impl QueueConfig {
    pub fn fifo() -> Self {
        Self {
            fifo: true,
            ..Self::default()
        }
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    pub fn with_receive_wait(mut self, seconds: u32) -> Self {
        self.receive_wait_time_seconds = seconds;
        self
    }

    pub fn with_dead_letter_queue(mut self, dlq: SharedQueue, max_receive_count: u32) -> Self {
        self.dead_letter_queue = Some(dlq);
        self.max_receive_count = max_receive_count;
        self
    }

    pub fn validate(&self) -> Result<(), SqsError> {
        if self.visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(SqsError::InvalidParameter(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        if self.receive_wait_time_seconds > MAX_RECEIVE_WAIT_TIME {
            return Err(SqsError::InvalidParameter(format!(
                "ReceiveMessageWaitTimeSeconds must be between 0 and {MAX_RECEIVE_WAIT_TIME}"
            )));
        }
        if self.dead_letter_queue.is_some() && self.max_receive_count == 0 {
            return Err(SqsError::InvalidParameter(
                "maxReceiveCount must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub url: String,
    pub arn: String,
    pub created_timestamp: i64,
    pub visibility_timeout: u32,
    pub receive_wait_time_seconds: u32,
    pub max_receive_count: u32,
    fifo: bool,
    messages: VecDeque<MessageRecord>,
    dead_letter_queue: Option<Weak<QueueHandle>>,
    groups: FifoGroupLock,
    clock: Arc<VisibilityClock>,
}

impl Queue {
    pub fn new(
        name: impl Into<String>,
        config: QueueConfig,
        clock: Arc<VisibilityClock>,
    ) -> Result<Self, SqsError> {
        let name = name.into();
        validate_queue_name(&name, config.fifo)?;
        config.validate()?;

        let mut queue = Self {
            url: String::new(),
            arn: String::new(),
            created_timestamp: Utc::now().timestamp(),
            visibility_timeout: config.visibility_timeout,
            receive_wait_time_seconds: config.receive_wait_time_seconds,
            max_receive_count: config.max_receive_count,
            fifo: config.fifo,
            messages: VecDeque::new(),
            dead_letter_queue: config.dead_letter_queue.as_ref().map(Arc::downgrade),
            groups: FifoGroupLock::new(),
            clock,
            name,
        };
        queue.locate(&SqsConfig::default());
        Ok(queue)
    }

    /// Derive URL and ARN from the account, region and endpoint
    pub(crate) fn locate(&mut self, settings: &SqsConfig) {
        self.url = format!(
            "{}/{}/{}",
            settings.base_url.trim_end_matches('/'),
            settings.account_id,
            self.name
        );
        self.arn = format!(
            "arn:aws:sqs:{}:{}:{}",
            settings.region, settings.account_id, self.name
        );
    }

    pub fn is_fifo(&self) -> bool {
        self.fifo
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageRecord> {
        self.messages.iter()
    }

    pub fn in_flight_count(&self, now: DateTime<Utc>) -> usize {
        self.messages.iter().filter(|m| m.is_in_flight(now)).count()
    }

    pub fn fifo_groups(&self) -> &FifoGroupLock {
        &self.groups
    }

    pub fn is_group_locked(&self, group_id: &str) -> bool {
        self.groups.is_locked(group_id)
    }

    /// The dead-letter queue, if configured and still alive
    pub fn dead_letter_queue(&self) -> Option<SharedQueue> {
        self.dead_letter_queue.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn has_dead_letter_queue(&self, dlq: &SharedQueue) -> bool {
        self.dead_letter_queue
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(dlq)))
    }

    pub fn enqueue(
        &mut self,
        body: impl Into<Vec<u8>>,
        attributes: Vec<MessageAttributeValue>,
        group_id: &str,
    ) -> Result<MessageRecord, SqsError> {
        self.enqueue_at(body, attributes, group_id, Utc::now())
    }

    /// Append a message to the tail, stamped with `now`
    pub fn enqueue_at(
        &mut self,
        body: impl Into<Vec<u8>>,
        attributes: Vec<MessageAttributeValue>,
        group_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageRecord, SqsError> {
        let body = body.into();
        if body.is_empty() {
            return Err(SqsError::InvalidParameter(
                "Message body must not be empty".into(),
            ));
        }
        if self.fifo && group_id.is_empty() {
            return Err(SqsError::MissingParameter(
                "MessageGroupId is required for FIFO queues".into(),
            ));
        }
        if !self.fifo && !group_id.is_empty() {
            return Err(SqsError::InvalidParameter(
                "MessageGroupId is only supported for FIFO queues".into(),
            ));
        }

        let mut message =
            MessageRecord::new(body, attributes, group_id, now, self.clock.sample())?;
        if self.fifo {
            message.sequence_number = Some(self.groups.next_sequence_number(group_id));
        }

        info!(
            queue = %self.name,
            message_id = %message.message_id,
            sequence_number = ?message.sequence_number,
            "Sent message"
        );
        self.messages.push_back(message.clone());
        Ok(message)
    }

    /// Make lapsed deliveries visible again and unlock their groups
    pub fn release_lapsed(&mut self, now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for message in self.messages.iter_mut().filter(|m| m.delivery_lapsed(now)) {
            message.release();
            if self.fifo {
                self.groups.unlock_group(&message.group_id);
            }
            if message.is_dead_letter_eligible(self.max_receive_count) {
                warn!(
                    queue = %self.name,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "Message exceeded max receive count"
                );
            }
            released += 1;
        }
        if released > 0 {
            debug!(queue = %self.name, count = released, "Visibility timeout lapsed");
        }
        released
    }

    /// Messages that may be delivered at `now`.
    ///
    /// Standard queues yield every ready message not in flight. FIFO queues
    /// yield at most the head of each unlocked group, and only when that
    /// head is ready.
    pub fn poll_ready(&mut self, now: DateTime<Utc>) -> Vec<MessageRecord> {
        self.release_lapsed(now);

        if !self.fifo {
            return self
                .messages
                .iter()
                .filter(|m| !m.is_in_flight(now) && self.clock.is_ready(m, now))
                .cloned()
                .collect();
        }

        let mut seen_groups: HashSet<&str> = HashSet::new();
        let mut ready = Vec::new();
        for message in &self.messages {
            if !seen_groups.insert(message.group_id.as_str()) {
                continue;
            }
            if self.groups.is_locked(&message.group_id) || message.is_in_flight(now) {
                continue;
            }
            if self.clock.is_ready(message, now) {
                ready.push(message.clone());
            }
        }
        ready
    }

    pub fn mark_received(
        &mut self,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageRecord, SqsError> {
        self.mark_received_for(message_id, now, self.visibility_timeout)
    }

    /// Start a delivery with an explicit visibility timeout in seconds
    pub fn mark_received_for(
        &mut self,
        message_id: &str,
        now: DateTime<Utc>,
        visibility_timeout: u32,
    ) -> Result<MessageRecord, SqsError> {
        if visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(SqsError::InvalidParameter(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        self.release_lapsed(now);

        let position = self
            .messages
            .iter()
            .position(|m| m.message_id == message_id)
            .ok_or_else(|| SqsError::MessageNotFound(message_id.to_string()))?;
        self.check_deliverable(position, now)?;

        let message = &mut self.messages[position];
        if self.fifo {
            self.groups.lock_group(&message.group_id);
        }
        message.begin_delivery(now, Duration::seconds(i64::from(visibility_timeout)));
        debug!(
            queue = %self.name,
            message_id = %message.message_id,
            receive_count = message.receive_count,
            "Marked message received"
        );
        Ok(message.clone())
    }

    /// The guards `poll_ready` applies, checked for a single message
    fn check_deliverable(&self, position: usize, now: DateTime<Utc>) -> Result<(), SqsError> {
        let message = &self.messages[position];
        if message.is_in_flight(now) {
            return Err(SqsError::InvalidParameter(format!(
                "Message {} is already in flight",
                message.message_id
            )));
        }
        if !self.clock.is_ready(message, now) {
            return Err(SqsError::InvalidParameter(format!(
                "Message {} is not available until {}",
                message.message_id,
                message.ready_at()
            )));
        }
        if !self.fifo {
            return Ok(());
        }
        if self.groups.is_locked(&message.group_id) {
            return Err(SqsError::InvalidParameter(format!(
                "Message group {} already has a message in flight",
                message.group_id
            )));
        }
        let head = self
            .messages
            .iter()
            .position(|m| m.group_id == message.group_id);
        if head != Some(position) {
            return Err(SqsError::InvalidParameter(format!(
                "Message {} is not the head of group {}",
                message.message_id, message.group_id
            )));
        }
        Ok(())
    }

    /// Poll and deliver up to `max` messages in one step
    pub fn receive(
        &mut self,
        max: usize,
        now: DateTime<Utc>,
        visibility_timeout: Option<u32>,
    ) -> Result<Vec<MessageRecord>, SqsError> {
        let timeout = visibility_timeout.unwrap_or(self.visibility_timeout);
        let max = max.clamp(1, MAX_RECEIVE_BATCH);

        let candidates = self.poll_ready(now);
        let mut delivered = Vec::with_capacity(max.min(candidates.len()));
        for candidate in candidates.into_iter().take(max) {
            delivered.push(self.mark_received_for(&candidate.message_id, now, timeout)?);
        }
        if !delivered.is_empty() {
            info!(queue = %self.name, count = delivered.len(), "Received messages");
        }
        Ok(delivered)
    }

    /// Remove the message holding `receipt_handle`.
    ///
    /// Deliveries that lapsed by `now` are released first, so their handles
    /// are rejected.
    pub fn delete_by_receipt_handle(
        &mut self,
        receipt_handle: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SqsError> {
        self.release_lapsed(now);
        let position = self
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| SqsError::ReceiptHandleInvalid(receipt_handle.to_string()))?;

        if let Some(message) = self.messages.remove(position) {
            if self.fifo {
                self.groups.unlock_group(&message.group_id);
            }
            info!(
                queue = %self.name,
                message_id = %message.message_id,
                "Deleted message"
            );
        }
        Ok(())
    }

    /// Reset the visibility window of an outstanding delivery.
    ///
    /// A timeout of zero makes the message visible again immediately. A
    /// delivery that lapsed by `now` no longer accepts changes.
    pub fn change_visibility(
        &mut self,
        receipt_handle: &str,
        visibility_timeout: u32,
        now: DateTime<Utc>,
    ) -> Result<(), SqsError> {
        if visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(SqsError::InvalidParameter(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        self.release_lapsed(now);
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| SqsError::ReceiptHandleInvalid(receipt_handle.to_string()))?;

        if visibility_timeout == 0 {
            message.release();
            if self.fifo {
                self.groups.unlock_group(&message.group_id);
            }
        } else {
            message.visibility_timeout =
                Some(now + Duration::seconds(i64::from(visibility_timeout)));
        }
        debug!(
            queue = %self.name,
            message_id = %message.message_id,
            visibility_timeout,
            "Changed message visibility"
        );
        Ok(())
    }

    /// Drop every message; sequence counters survive
    pub fn purge(&mut self) {
        let count = self.messages.len();
        self.messages.clear();
        self.groups.unlock_all();
        info!(queue = %self.name, count, "Purged queue");
    }

    /// Messages that have exceeded the max receive count
    pub fn dead_letter_eligible(&self) -> Vec<MessageRecord> {
        self.messages
            .iter()
            .filter(|m| m.is_dead_letter_eligible(self.max_receive_count))
            .cloned()
            .collect()
    }

    /// Queue attributes in their wire names
    pub fn attributes(&self, now: DateTime<Utc>) -> HashMap<String, String> {
        let in_flight = self.in_flight_count(now);
        let delayed = self
            .messages
            .iter()
            .filter(|m| !m.is_in_flight(now) && !self.clock.is_ready(m, now))
            .count();

        let mut attrs = HashMap::new();
        attrs.insert("QueueArn".into(), self.arn.clone());
        attrs.insert("CreatedTimestamp".into(), self.created_timestamp.to_string());
        attrs.insert("VisibilityTimeout".into(), self.visibility_timeout.to_string());
        attrs.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_wait_time_seconds.to_string(),
        );
        attrs.insert(
            "ApproximateNumberOfMessages".into(),
            (self.messages.len() - in_flight - delayed).to_string(),
        );
        attrs.insert(
            "ApproximateNumberOfMessagesNotVisible".into(),
            in_flight.to_string(),
        );
        attrs.insert(
            "ApproximateNumberOfMessagesDelayed".into(),
            delayed.to_string(),
        );
        attrs.insert("FifoQueue".into(), self.fifo.to_string());
        if let Some(dlq) = self.dead_letter_queue() {
            attrs.insert(
                "RedrivePolicy".into(),
                format!(
                    r#"{{"deadLetterTargetArn":"{}","maxReceiveCount":{}}}"#,
                    dlq.arn(),
                    self.max_receive_count
                ),
            );
        }
        attrs
    }
}
