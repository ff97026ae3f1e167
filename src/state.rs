use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::Segment;
use crate::error::{SnapshotError, SourceError};

/// Status values as reported by the backend.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

/// Status of a transfer in the view.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

impl From<WireStatus> for TransferStatus {
    fn from(status: WireStatus) -> Self {
        match status {
            WireStatus::Pending => TransferStatus::Pending,
            WireStatus::InProgress => TransferStatus::Active,
            WireStatus::Paused => TransferStatus::Paused,
            WireStatus::Completed => TransferStatus::Completed,
            WireStatus::Failed => TransferStatus::Failed,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferStatus::Pending => "Pending",
            TransferStatus::Active => "Downloading",
            TransferStatus::Paused => "Paused",
            TransferStatus::Completed => "Completed",
            TransferStatus::Failed => "Failed",
        };
        f.pad(label)
    }
}

/// One transfer as read from the backend. Every field is optional on the wire;
/// `sanitize` decides what is usable.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub total_size: Option<i64>,
    #[serde(default)]
    pub downloaded_size: Option<i64>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub thread_count: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub completion_time: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub download_status: Option<WireStatus>,
    #[serde(default)]
    pub parts: Vec<PartSnapshot>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartSnapshot {
    #[serde(default)]
    pub id: Option<i64>,
    pub start_byte: i64,
    pub end_byte: i64,
    #[serde(default)]
    pub downloaded_bytes: i64,
}

/// A snapshot with ids resolved, counters clamped and segments ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedSnapshot {
    pub id: u64,
    pub source_locator: String,
    pub destination_name: String,
    pub total_size: Option<u64>,
    pub reported_downloaded: Option<u64>,
    pub requested_segments: Option<u32>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub status: WireStatus,
    pub segments: Vec<Segment>,
}

impl TransferSnapshot {
    pub fn sanitize(&self) -> Result<SanitizedSnapshot, SnapshotError> {
        let id = match self.id {
            None => return Err(SnapshotError::MissingId),
            Some(id) if id < 0 => return Err(SnapshotError::InvalidId(id)),
            Some(id) => id as u64,
        };

        // Parts without an id are numbered after the highest explicit one.
        let mut next_unassigned = self
            .parts
            .iter()
            .filter_map(|part| part.id)
            .map(clamp_non_negative)
            .max()
            .map_or(0, |max| max.saturating_add(1));

        // Keyed by part id so duplicates collapse to the last occurrence.
        let mut segments = BTreeMap::new();
        for (index, part) in self.parts.iter().enumerate() {
            let start = clamp_non_negative(part.start_byte);
            let end = clamp_non_negative(part.end_byte);
            if end < start {
                debug!(
                    transfer_id = id,
                    part = index,
                    start,
                    end,
                    "dropping inverted segment range"
                );
                continue;
            }
            let segment_id = match part.id {
                Some(part_id) => clamp_non_negative(part_id),
                None => {
                    let assigned = next_unassigned;
                    next_unassigned = next_unassigned.saturating_add(1);
                    assigned
                }
            };
            segments.insert(
                segment_id,
                Segment {
                    id: segment_id,
                    start_byte: start,
                    end_byte: end,
                    downloaded_bytes: clamp_non_negative(part.downloaded_bytes),
                },
            );
        }

        Ok(SanitizedSnapshot {
            id,
            source_locator: self.url.clone().unwrap_or_default(),
            destination_name: self.file_name.clone().unwrap_or_default(),
            total_size: self.total_size.map(clamp_non_negative).filter(|size| *size > 0),
            reported_downloaded: self.downloaded_size.map(clamp_non_negative),
            requested_segments: self
                .thread_count
                .and_then(|count| u32::try_from(count).ok())
                .filter(|count| *count > 0),
            started_at: parse_timestamp(self.start_time.as_deref()),
            completed_at: parse_timestamp(self.completion_time.as_deref()),
            error_message: self.error_message.clone(),
            status: self.download_status.unwrap_or(WireStatus::Pending),
            segments: segments.into_values().collect(),
        })
    }
}

fn clamp_non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

fn parse_timestamp(raw: Option<&str>) -> Option<NaiveDateTime> {
    raw.and_then(|s| s.trim().parse::<NaiveDateTime>().ok())
}

/// Decodes a snapshot array record by record. A record that fails to decode is
/// logged and skipped; only a payload that is not an array at all is an error.
pub fn decode_snapshots(body: &str) -> Result<Vec<TransferSnapshot>, SourceError> {
    let records: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let mut snapshots = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<TransferSnapshot>(record) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => warn!(record = index, error = %e, "skipping malformed snapshot record"),
        }
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"[
        {
            "id": 7,
            "url": "https://example.com/big.iso",
            "fileName": "big.iso",
            "status": null,
            "totalSize": 200,
            "downloadedSize": 150,
            "progress": 75,
            "threadCount": 2,
            "startTime": "2024-05-01T10:00:00.123456",
            "completionTime": null,
            "filePath": "downloads/big.iso",
            "errorMessage": null,
            "downloadStatus": "IN_PROGRESS",
            "parts": [
                {"id": 2, "startByte": 100, "endByte": 199, "downloadedBytes": 100},
                {"id": 1, "startByte": 0, "endByte": 99, "downloadedBytes": 50}
            ]
        },
        {"id": 8, "downloadStatus": "SOMETHING_ELSE"},
        {"id": 9, "downloadStatus": "PAUSED", "parts": []}
    ]"#;

    #[test]
    fn decodes_wire_records_and_skips_malformed_ones() {
        let snapshots = decode_snapshots(PAYLOAD).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].id, Some(7));
        assert_eq!(snapshots[0].download_status, Some(WireStatus::InProgress));
        assert_eq!(snapshots[1].id, Some(9));
    }

    #[test]
    fn payload_that_is_not_an_array_is_an_error() {
        assert!(decode_snapshots(r#"{"error": "boom"}"#).is_err());
    }

    #[test]
    fn sanitize_orders_segments_and_parses_fields() {
        let snapshots = decode_snapshots(PAYLOAD).unwrap();
        let sanitized = snapshots[0].sanitize().unwrap();
        assert_eq!(sanitized.id, 7);
        assert_eq!(sanitized.destination_name, "big.iso");
        assert_eq!(sanitized.total_size, Some(200));
        assert_eq!(sanitized.requested_segments, Some(2));
        assert!(sanitized.started_at.is_some());
        assert!(sanitized.completed_at.is_none());
        let ids: Vec<u64> = sanitized.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn sanitize_rejects_missing_id() {
        let snapshot = TransferSnapshot::default();
        assert_eq!(snapshot.sanitize(), Err(SnapshotError::MissingId));
    }

    #[test]
    fn sanitize_clamps_negative_counters_and_drops_inverted_ranges() {
        let snapshot = TransferSnapshot {
            id: Some(3),
            total_size: Some(-5),
            parts: vec![
                PartSnapshot { id: Some(1), start_byte: 0, end_byte: 9, downloaded_bytes: -4 },
                PartSnapshot { id: Some(2), start_byte: 20, end_byte: 10, downloaded_bytes: 3 },
                PartSnapshot { id: None, start_byte: 10, end_byte: 19, downloaded_bytes: 5 },
            ],
            ..Default::default()
        };
        let sanitized = snapshot.sanitize().unwrap();
        assert_eq!(sanitized.total_size, None);
        assert_eq!(sanitized.status, WireStatus::Pending);
        assert_eq!(sanitized.segments.len(), 2);
        assert_eq!(sanitized.segments[0].downloaded_bytes, 0);
        // Part without an id is numbered after the highest explicit id.
        assert_eq!(sanitized.segments[1].id, 3);
        assert_eq!(sanitized.segments[1].start_byte, 10);
    }

    #[test]
    fn parts_without_id_never_replace_explicit_ones() {
        let snapshot = TransferSnapshot {
            id: Some(4),
            total_size: Some(200),
            parts: vec![
                PartSnapshot { id: None, start_byte: 0, end_byte: 99, downloaded_bytes: 50 },
                PartSnapshot { id: Some(0), start_byte: 100, end_byte: 199, downloaded_bytes: 50 },
                PartSnapshot { id: None, start_byte: 200, end_byte: 209, downloaded_bytes: 10 },
            ],
            ..Default::default()
        };
        let sanitized = snapshot.sanitize().unwrap();
        let ids: Vec<u64> = sanitized.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let total: u64 = sanitized.segments.iter().map(|s| s.downloaded_bytes).sum();
        assert_eq!(total, 110);
        let totals = crate::aggregate::aggregate(&sanitized.segments, Some(200));
        assert_eq!(totals.downloaded_size, 100);
    }
}
