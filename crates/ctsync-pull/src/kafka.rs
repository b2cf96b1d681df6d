//! Inert stub for a future Kafka publisher. This module documents the hook
//! point without wiring anything into the Sink's commit path.
//!
//! Whoever wires this up next needs to decide whether it becomes a second
//! sink alongside the shard writer, or a replacement for it, and whether
//! publish success participates in `CommitBatch`'s atomicity story.

use crate::cert::LogEntry;

#[allow(dead_code)]
pub struct KafkaPublisher;

#[allow(dead_code)]
impl KafkaPublisher {
    pub fn publish(&self, _entry: &LogEntry) {
        unimplemented!("kafka publishing is not wired up; see module docs")
    }
}
