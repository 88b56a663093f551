//! Build log history entries.

use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One entry in a repository's log history sorted set.
///
/// The member stored in the sorted set is [`BuildLogRecord::encode`], a
/// base64 text so it can sit next to the numeric score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLogRecord {
    pub id: String,
    pub success: bool,
    pub time: DateTime<Utc>,
}

impl BuildLogRecord {
    pub fn new(success: bool, time: DateTime<Utc>) -> Self {
        Self {
            id: log_id(time),
            success,
            time,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(member: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(member)
            .map_err(|e| Error::Serialization(format!("Invalid log record encoding: {}", e)))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Sorted-set score: creation time in microseconds, so records written
    /// within the same second keep their order.
    pub fn score(&self) -> f64 {
        self.time.timestamp_micros() as f64
    }
}

/// 16 hex characters of SHA-256 over the nanosecond clock reading.
pub fn log_id(time: DateTime<Utc>) -> String {
    let nanos = time
        .timestamp_nanos_opt()
        .unwrap_or_else(|| time.timestamp_micros().saturating_mul(1000));
    let digest = Sha256::digest(nanos.to_string().as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_id_is_sixteen_hex_chars() {
        let record = BuildLogRecord::new(true, Utc::now());
        assert_eq!(record.id.len(), 16);
        assert!(record.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_clock_readings_give_distinct_ids() {
        let a = Utc.timestamp_opt(1_700_000_000, 1).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 2).unwrap();
        assert_ne!(log_id(a), log_id(b));
    }

    #[test]
    fn test_encoded_member_is_printable() {
        let record = BuildLogRecord::new(false, Utc::now());
        let member = record.encode().unwrap();
        assert!(member.chars().all(|c| c.is_ascii_graphic()));
        assert_eq!(BuildLogRecord::decode(&member).unwrap(), record);
    }

    #[test]
    fn test_score_orders_records_within_a_second() {
        let earlier = BuildLogRecord::new(true, Utc.timestamp_opt(1_700_000_000, 100_000).unwrap());
        let later = BuildLogRecord::new(true, Utc.timestamp_opt(1_700_000_000, 900_000_000).unwrap());
        assert!(earlier.score() < later.score());
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        assert!(BuildLogRecord::decode("%%%").is_err());
    }
}
