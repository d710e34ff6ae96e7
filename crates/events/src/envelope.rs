use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A published message as seen by subscribers.
///
/// Notes:
/// - `sequence` is assigned at publish time and is monotonically increasing per
///   dispatcher, so it reflects publish order.
/// - `payload` is shared: every subscriber of the topic receives the same
///   allocation, never a copy.
#[derive(Debug)]
pub struct Envelope<P: ?Sized> {
    sequence: u64,
    topic: String,
    published_at: DateTime<Utc>,
    payload: Arc<P>,
}

impl<P: ?Sized> Envelope<P> {
    pub fn new(sequence: u64, topic: impl Into<String>, payload: Arc<P>) -> Self {
        Self {
            sequence,
            topic: topic.into(),
            published_at: Utc::now(),
            payload,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn shared_payload(&self) -> &Arc<P> {
        &self.payload
    }

    pub fn into_payload(self) -> Arc<P> {
        self.payload
    }
}

impl<P: ?Sized> Clone for Envelope<P> {
    fn clone(&self) -> Self {
        Self {
            sequence: self.sequence,
            topic: self.topic.clone(),
            published_at: self.published_at,
            payload: self.payload.clone(),
        }
    }
}
