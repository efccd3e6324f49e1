//! Item to store-key encoding.
//!
//! Short strings are used verbatim so stores stay readable. Everything else
//! is reduced to a fixed-width digest of its canonical JSON form, which keeps
//! keys inside the 40-character column the SQL backends declare.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Longest string used as a key without hashing.
pub const MAX_KEY_LEN: usize = 40;

/// Width of a hashed key, in hex characters.
pub const DIGEST_LEN: usize = 32;

/// Store key and log label derived from one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    key: String,
    label: String,
}

impl ItemKey {
    pub fn new<T: Serialize + ?Sized>(item: &T) -> Result<Self> {
        let value = serde_json::to_value(item).map_err(|e| Error::KeyEncoding(e.to_string()))?;

        match value {
            Value::String(s) => {
                let key = if s.chars().count() <= MAX_KEY_LEN {
                    s.clone()
                } else {
                    digest(s.as_bytes())
                };
                Ok(Self { key, label: s })
            }
            // `Value` maps are ordered, so equal items always hash equally.
            other => {
                let json = other.to_string();
                Ok(Self {
                    key: digest(json.as_bytes()),
                    label: json,
                })
            }
        }
    }

    /// The key the lease is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-readable rendering for log lines.
    pub fn label(&self) -> &str {
        &self.label
    }
}

fn digest(bytes: &[u8]) -> String {
    let mut hex = hex::encode(Sha256::digest(bytes));
    hex.truncate(DIGEST_LEN);
    hex
}
