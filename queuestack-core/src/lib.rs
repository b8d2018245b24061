//! Core types shared by QueueStack crates
//!
//! This crate holds the fixed error table that maps internal failure codes
//! to the descriptors exposed over the wire.

pub mod error;

pub use error::{AwsError, ErrorCode, ErrorDescriptor, ErrorRegistry};
