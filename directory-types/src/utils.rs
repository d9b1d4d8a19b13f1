use std::time::{SystemTime, UNIX_EPOCH};

use crate::payload::Payload;

/// Get the current unix timestamp in milliseconds
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The payload's own timestamp, or now when the publisher left it out.
pub fn payload_timestamp(payload: &Payload) -> u64 {
    payload.timestamp.unwrap_or_else(timestamp)
}
