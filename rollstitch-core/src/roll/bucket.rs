use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width time bucket used to aggregate volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketWidth {
    Hour,
    Day,
}

impl BucketWidth {
    pub fn seconds(self) -> i64 {
        match self {
            BucketWidth::Hour => 3_600,
            BucketWidth::Day => 86_400,
        }
    }

    /// Start of the bucket containing `ts` (UTC, aligned to the epoch).
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.seconds();
        let start = ts.timestamp().div_euclid(width) * width;
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketWidth::Hour => f.write_str("hour"),
            BucketWidth::Day => f.write_str("day"),
        }
    }
}
