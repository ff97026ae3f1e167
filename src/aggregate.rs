//! Per-transfer progress derived from segment snapshots.

/// One independently fetched byte range. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub id: u64,
    pub start_byte: u64,
    pub end_byte: u64,
    pub downloaded_bytes: u64,
}

impl Segment {
    pub fn width(&self) -> u64 {
        self.end_byte.saturating_sub(self.start_byte).saturating_add(1)
    }

    /// Downloaded bytes, never more than the range can hold.
    pub fn clamped_bytes(&self) -> u64 {
        self.downloaded_bytes.min(self.width())
    }

    pub fn progress_percent(&self) -> u8 {
        percent(self.clamped_bytes(), Some(self.width()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aggregate {
    pub downloaded_size: u64,
    pub progress_percent: u8,
}

/// Sums segment progress for one transfer.
///
/// Racy snapshots can report a segment holding more than its width, or
/// overlapping segments whose sum passes the file size. Both are clamped
/// rather than propagated.
pub fn aggregate(segments: &[Segment], total_size: Option<u64>) -> Aggregate {
    let sum = segments
        .iter()
        .fold(0u64, |acc, segment| acc.saturating_add(segment.clamped_bytes()));
    let downloaded_size = match total_size {
        Some(total) => sum.min(total),
        None => sum,
    };

    Aggregate {
        downloaded_size,
        progress_percent: percent(downloaded_size, total_size),
    }
}

fn percent(done: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => {
            let ratio = (done as f64 / total as f64) * 100.0;
            ratio.round().clamp(0.0, 100.0) as u8
        }
        _ => 0,
    }
}
