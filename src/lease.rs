//! Lease record codec.
//!
//! A lease value is either an 8-byte big-endian count of microseconds since
//! the Unix epoch (UTC), naming the moment the owner last claimed or renewed
//! the item, or the single-byte done marker.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Terminal value: the item was fully processed and is never revisited.
pub const DONE_MARKER: &[u8] = b"d";

/// Width of an encoded timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Decoded value of a lease entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseRecord {
    /// Owned since (or last renewed at) the given instant.
    Claimed(DateTime<Utc>),
    Done,
}

impl LeaseRecord {
    /// Decode a stored value. Returns `None` for bytes this codec never writes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes == DONE_MARKER {
            return Some(Self::Done);
        }
        decode_timestamp(bytes).map(Self::Claimed)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Claimed(at) => encode_timestamp(*at),
            Self::Done => DONE_MARKER.to_vec(),
        }
    }

    /// Whether this record still keeps other workers away at `now`.
    ///
    /// A done record always does; a claim does while its lease is running.
    pub fn is_held(&self, now: DateTime<Utc>, timeout: Option<Duration>) -> bool {
        match self {
            Self::Done => true,
            Self::Claimed(at) => is_live(*at, now, timeout),
        }
    }
}

pub fn encode_timestamp(at: DateTime<Utc>) -> Vec<u8> {
    at.timestamp_micros().to_be_bytes().to_vec()
}

pub fn decode_timestamp(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let raw: [u8; TIMESTAMP_LEN] = bytes.try_into().ok()?;
    DateTime::from_timestamp_micros(i64::from_be_bytes(raw))
}

/// `now < claimed_at + timeout`. A `None` timeout never expires, and so does
/// one too large to represent.
pub fn is_live(claimed_at: DateTime<Utc>, now: DateTime<Utc>, timeout: Option<Duration>) -> bool {
    let Some(timeout) = timeout else {
        return true;
    };
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| claimed_at.checked_add_signed(delta))
        .is_none_or(|expires_at| now < expires_at)
}
