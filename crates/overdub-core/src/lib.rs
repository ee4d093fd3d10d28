//! Real-time primitives for the overdub looper.
//!
//! Everything in this crate is safe to touch from the audio callback except
//! [`LooperConfig::validate`] and construction of the queues.
//!
//! # Example
//!
//! ```ignore
//! use overdub_core::{MessageQueue, RingBuffer};
//!
//! let (mut producer, mut consumer) = RingBuffer::with_capacity::<f32>(1024);
//! producer.write(&[0.1, 0.2, 0.3]);
//!
//! let mut out = [0.0; 3];
//! assert_eq!(consumer.read(&mut out), 3);
//! ```

pub mod config;
pub mod error;
pub mod lockfree;
pub mod message_queue;
pub mod ring_buffer;

pub use config::{LooperConfig, MAX_LOOPS};
pub use error::{Error, Result};
pub use lockfree::{AtomicFlag, AtomicFloat};
pub use message_queue::{MessageQueue, MessageReceiver, MessageSender};
pub use ring_buffer::{RingBuffer, RingConsumer, RingProducer};
