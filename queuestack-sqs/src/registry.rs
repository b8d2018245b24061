//! Queue registry and shared queue handles

use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::SqsConfig;
use crate::error::SqsError;
use crate::latency::VisibilityClock;
use crate::message::{MessageAttributeValue, MessageRecord};
use crate::queue::{Queue, QueueConfig};

/// Re-check interval for long polls; latency and visibility lapses are not signalled
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub type SharedQueue = Arc<QueueHandle>;

/// A queue behind its own reader/writer lock, plus a wake-up signal for
/// long-polling receivers.
#[derive(Debug)]
pub struct QueueHandle {
    name: String,
    url: String,
    arn: String,
    queue: RwLock<Queue>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl QueueHandle {
    fn new(queue: Queue) -> Self {
        Self {
            name: queue.name.clone(),
            url: queue.url.clone(),
            arn: queue.arn.clone(),
            queue: RwLock::new(queue),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Queue> {
        self.queue.read()
    }

    /// Exclusive access; callers that add or release messages should `notify`
    pub fn write(&self) -> RwLockWriteGuard<'_, Queue> {
        self.queue.write()
    }

    /// Wake long-polling receivers
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    pub fn send(
        &self,
        body: impl Into<Vec<u8>>,
        attributes: Vec<MessageAttributeValue>,
        group_id: &str,
    ) -> Result<MessageRecord, SqsError> {
        let message = self.write().enqueue(body, attributes, group_id)?;
        self.notify();
        Ok(message)
    }

    /// Receive up to `max` messages, waiting at most `wait` for one to arrive.
    ///
    /// `wait` defaults to the queue's configured long-poll time. An empty
    /// batch is returned once the wait has elapsed.
    pub fn receive(
        &self,
        max: usize,
        wait: Option<Duration>,
        visibility_timeout: Option<u32>,
    ) -> Result<Vec<MessageRecord>, SqsError> {
        let wait = wait.unwrap_or_else(|| {
            Duration::from_secs(u64::from(self.read().receive_wait_time_seconds))
        });
        let deadline = Instant::now() + wait;

        loop {
            let seen = *self.generation.lock();
            let batch = self.write().receive(max, Utc::now(), visibility_timeout)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(queue = %self.name, "Long poll finished without messages");
                return Ok(batch);
            }

            let mut generation = self.generation.lock();
            if *generation == seen {
                let timeout = (deadline - now).min(POLL_INTERVAL);
                self.changed.wait_for(&mut generation, timeout);
            }
        }
    }

    pub fn delete_message(&self, receipt_handle: &str) -> Result<(), SqsError> {
        let fifo = {
            let mut queue = self.write();
            queue.delete_by_receipt_handle(receipt_handle, Utc::now())?;
            queue.is_fifo()
        };
        // a deleted FIFO head may unblock its group
        if fifo {
            self.notify();
        }
        Ok(())
    }

    pub fn change_visibility(&self, receipt_handle: &str, timeout: u32) -> Result<(), SqsError> {
        self.write()
            .change_visibility(receipt_handle, timeout, Utc::now())?;
        if timeout == 0 {
            self.notify();
        }
        Ok(())
    }
}

/// Process-wide mapping from queue name to queue.
///
/// One reader/writer lock guards the map; each queue carries its own lock.
/// The registry lock is always taken before a queue lock.
#[derive(Debug)]
pub struct QueueRegistry {
    settings: SqsConfig,
    clock: Arc<VisibilityClock>,
    queues: RwLock<HashMap<String, SharedQueue>>,
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new(SqsConfig::default())
    }
}

impl QueueRegistry {
    pub fn new(settings: SqsConfig) -> Self {
        let clock = Arc::new(VisibilityClock::new(&settings.latency()));
        Self::with_clock(settings, clock)
    }

    pub fn with_clock(settings: SqsConfig, clock: Arc<VisibilityClock>) -> Self {
        Self {
            settings,
            clock,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry from `QUEUESTACK_*` environment settings
    pub fn from_env() -> Result<Self, SqsError> {
        Ok(Self::new(SqsConfig::load()?))
    }

    pub fn settings(&self) -> &SqsConfig {
        &self.settings
    }

    pub fn create(&self, name: &str, config: QueueConfig) -> Result<SharedQueue, SqsError> {
        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Err(SqsError::QueueAlreadyExists(name.to_string()));
        }

        let mut queue = Queue::new(name, config, Arc::clone(&self.clock))?;
        queue.locate(&self.settings);
        let handle = Arc::new(QueueHandle::new(queue));

        info!(name = %name, url = %handle.url(), fifo = handle.read().is_fifo(), "Creating queue");
        queues.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Result<SharedQueue, SqsError> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    /// Resolve a queue from its URL (last path segment is the name)
    pub fn lookup_url(&self, url: &str) -> Result<SharedQueue, SqsError> {
        let name = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SqsError::QueueNotFound(url.to_string()))?;
        self.lookup(name)
    }

    pub fn delete(&self, name: &str) -> Result<(), SqsError> {
        let mut queues = self.queues.write();
        if queues.remove(name).is_none() {
            return Err(SqsError::QueueNotFound(name.to_string()));
        }
        info!(name = %name, "Deleting queue");
        Ok(())
    }

    /// All queues, sorted by name
    pub fn list(&self) -> Vec<SharedQueue> {
        self.list_with_prefix("")
    }

    pub fn list_with_prefix(&self, prefix: &str) -> Vec<SharedQueue> {
        let mut queues: Vec<SharedQueue> = self
            .queues
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, queue)| Arc::clone(queue))
            .collect();
        queues.sort_by(|a, b| a.name().cmp(b.name()));
        queues
    }

    /// Queues whose dead-letter queue is `dlq_name`
    pub fn dead_letter_sources(&self, dlq_name: &str) -> Result<Vec<SharedQueue>, SqsError> {
        let queues = self.queues.read();
        let dlq = queues
            .get(dlq_name)
            .ok_or_else(|| SqsError::QueueNotFound(dlq_name.to_string()))?;
        let mut sources: Vec<SharedQueue> = queues
            .values()
            .filter(|queue| !Arc::ptr_eq(*queue, dlq) && queue.read().has_dead_letter_queue(dlq))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(sources)
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }
}
