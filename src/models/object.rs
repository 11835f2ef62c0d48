//! Represents an uploaded file tracked by the registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persisted metadata table, keyed by short identifier.
///
/// A `BTreeMap` keeps the on-disk JSON layout and "first match" lookups
/// deterministic.
pub type Table = BTreeMap<String, ObjectRecord>;

/// A single uploaded file.
///
/// The record stores metadata only; the payload lives in the upload
/// directory under `stored_name`. Field names on disk follow the
/// `{filename, uploaded_at, downloads}` layout so existing tables stay readable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    /// Collision-resolved filename used on disk.
    #[serde(rename = "filename")]
    pub stored_name: String,

    /// Upload time in seconds since the Unix epoch.
    pub uploaded_at: f64,

    /// Number of successful resolves.
    #[serde(rename = "downloads")]
    pub download_count: u64,
}

impl ObjectRecord {
    pub fn new(stored_name: impl Into<String>, uploaded_at: f64) -> Self {
        Self {
            stored_name: stored_name.into(),
            uploaded_at,
            download_count: 0,
        }
    }

    /// Seconds elapsed since upload at time `now`.
    pub fn age(&self, now: f64) -> f64 {
        now - self.uploaded_at
    }

    /// Whole seconds left before eviction, floored at zero.
    pub fn time_left(&self, now: f64, ttl_seconds: u64) -> u64 {
        let elapsed = self.age(now).max(0.0) as u64;
        ttl_seconds.saturating_sub(elapsed)
    }
}

/// Read-only projection of a record returned by info and listing calls.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ObjectInfo {
    pub short_id: String,

    #[serde(rename = "filename")]
    pub stored_name: String,

    #[serde(rename = "downloads")]
    pub download_count: u64,

    pub uploaded_at: f64,

    #[serde(rename = "time_left_seconds")]
    pub time_left: u64,
}

impl ObjectInfo {
    pub fn from_record(short_id: &str, record: &ObjectRecord, now: f64, ttl_seconds: u64) -> Self {
        Self {
            short_id: short_id.to_string(),
            stored_name: record.stored_name.clone(),
            download_count: record.download_count,
            uploaded_at: record.uploaded_at,
            time_left: record.time_left(now, ttl_seconds),
        }
    }
}

/// Result of a successful upload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatedObject {
    pub short_id: String,
    pub stored_name: String,
}

/// One page of a listing, newest uploads first.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectPage {
    pub records: Vec<ObjectInfo>,

    /// 1-based page number actually served.
    pub page: usize,

    /// Always at least 1, even when nothing matches.
    pub total_pages: usize,

    /// Number of records matching the search term.
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_left_counts_down_and_floors_at_zero() {
        let record = ObjectRecord::new("a.txt", 1_000.0);
        assert_eq!(record.time_left(1_000.0, 300), 300);
        assert_eq!(record.time_left(1_100.5, 300), 200);
        assert_eq!(record.time_left(1_400.0, 300), 0);
        assert_eq!(record.time_left(5_000.0, 300), 0);
    }

    #[test]
    fn record_uses_legacy_field_names() {
        let record = ObjectRecord {
            stored_name: "report.pdf".into(),
            uploaded_at: 12.5,
            download_count: 3,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["filename"], "report.pdf");
        assert_eq!(json["uploaded_at"], 12.5);
        assert_eq!(json["downloads"], 3);

        let parsed: ObjectRecord =
            serde_json::from_str(r#"{"filename":"x.bin","uploaded_at":1700000000.25,"downloads":0}"#)
                .unwrap();
        assert_eq!(parsed.stored_name, "x.bin");
        assert_eq!(parsed.download_count, 0);
    }
}
