//! In-memory SQS queue core for QueueStack
//!
//! Provides the queue state machine behind a local SQS emulator:
//! - Visibility-timeout based at-least-once delivery with receive counting
//! - FIFO queues with per-group sequencing and one in-flight message per group
//! - Simulated propagation latency for test realism
//! - A registry of named queues shared between request threads
//!
//! Wire protocol handling lives outside this crate; every failure converts
//! into a [`queuestack_core::AwsError`] for translation.

pub mod config;
pub mod error;
pub mod fifo;
pub mod latency;
pub mod message;
pub mod queue;
pub mod registry;

pub use crate::config::{LatencyConfig, SqsConfig};
pub use error::SqsError;
pub use fifo::FifoGroupLock;
pub use latency::{is_ready, VisibilityClock};
pub use message::{MessageAttributeValue, MessageRecord};
pub use queue::{is_fifo_queue_name, Queue, QueueConfig};
pub use registry::{QueueHandle, QueueRegistry, SharedQueue};
