//! Data-submission transactions

use chrono::Utc;
use serde::Serialize;

use crate::hash::ContentHash;

/// An immutable data-submission record.
///
/// Owned by the ledger's pending pool until mined, then shared with the
/// block that includes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Digest of owner, target and timestamp
    pub id: ContentHash,

    /// Submitting address
    pub owner: String,

    /// Target address
    pub target: String,

    /// Raw payload
    #[serde(skip)]
    pub data: Vec<u8>,

    /// Payload size in bytes
    pub data_size: u64,

    /// Reward in the smallest unit
    pub reward: u64,

    /// Creation time, nanoseconds since the Unix epoch
    pub timestamp: i64,
}

impl Transaction {
    /// Create a transaction stamped with the current time.
    pub fn new(owner: &str, target: &str, data: Vec<u8>, reward: u64) -> Self {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::with_timestamp(owner, target, data, reward, timestamp)
    }

    pub fn with_timestamp(
        owner: &str,
        target: &str,
        data: Vec<u8>,
        reward: u64,
        timestamp: i64,
    ) -> Self {
        let id = ContentHash::digest(format!("{owner}{target}{timestamp}"));
        Self {
            id,
            owner: owner.to_string(),
            target: target.to_string(),
            data_size: data.len() as u64,
            data,
            reward,
            timestamp,
        }
    }
}
