//! The authoritative table of derived transfer state.
//!
//! All mutation happens in [`TransferStore::apply_cycle`] and
//! [`TransferStore::issue`], both driven from the poll task. Consumers only
//! ever see a [`StoreView`] copied out after one of those calls returns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, Aggregate, Segment};
use crate::cli::ViewFilter;
use crate::config::EngineConfig;
use crate::error::CommandError;
use crate::reconcile::{CommandReconciler, ControlAction};
use crate::state::{SanitizedSnapshot, TransferSnapshot, TransferStatus, WireStatus};
use crate::throughput::{ScaledRate, ThroughputEstimator};

#[derive(Debug, Clone, PartialEq)]
pub struct TransferView {
    pub id: u64,
    pub source_locator: String,
    pub destination_name: String,
    pub total_size: Option<u64>,
    pub segments: Vec<Segment>,
    /// Status shown to consumers, including any optimistic overlay.
    pub status: TransferStatus,
    /// Status derived from the latest snapshot alone.
    pub confirmed_status: TransferStatus,
    pub failure_reason: Option<String>,
    pub downloaded_size: u64,
    pub progress_percent: u8,
    pub pending_action: Option<ControlAction>,
    pub requested_segments: Option<u32>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    /// The backend's own byte count. Advisory only.
    pub reported_downloaded: Option<u64>,
}

impl TransferView {
    pub fn is_optimistic(&self) -> bool {
        self.pending_action.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub pending: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TransferSummary {
    fn tally<'a>(transfers: impl IntoIterator<Item = &'a TransferView>) -> Self {
        let mut summary = Self::default();
        for transfer in transfers {
            match transfer.status {
                TransferStatus::Pending => summary.pending += 1,
                TransferStatus::Active => summary.active += 1,
                TransferStatus::Paused => summary.paused += 1,
                TransferStatus::Completed => summary.completed += 1,
                TransferStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.pending + self.active + self.paused + self.completed + self.failed
    }
}

/// A complete, immutable copy of the store after one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreView {
    pub cycle: u64,
    pub transfers: Vec<TransferView>,
    /// Bytes per second across active transfers.
    pub rate: f64,
    pub summary: TransferSummary,
}

impl StoreView {
    pub fn get(&self, id: u64) -> Option<&TransferView> {
        self.transfers
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|index| &self.transfers[index])
    }

    pub fn filtered(&self, filter: ViewFilter) -> impl Iterator<Item = &TransferView> {
        self.transfers.iter().filter(move |t| filter.matches(t.status))
    }

    pub fn scaled_rate(&self) -> ScaledRate {
        ScaledRate::from_bytes_per_sec(self.rate)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub merged: usize,
    pub skipped: usize,
    pub ignored_terminal: usize,
    pub expired_commands: usize,
}

#[derive(Debug)]
pub struct TransferStore {
    transfers: BTreeMap<u64, TransferView>,
    reconciler: CommandReconciler,
    throughput: ThroughputEstimator,
    // Per-transfer byte counts at the last sample, for transfers that were active.
    active_bytes: HashMap<u64, u64>,
    // Cumulative bytes gained while active; fed to the estimator.
    active_progress: u64,
    cycle: u64,
}

impl TransferStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            transfers: BTreeMap::new(),
            reconciler: CommandReconciler::new(config.stale_after_cycles),
            throughput: ThroughputEstimator::new(
                config.throughput_window(),
                config.throughput_max_samples,
            ),
            active_bytes: HashMap::new(),
            active_progress: 0,
            cycle: 0,
        }
    }

    /// Applies a user command optimistically. The backend is told separately;
    /// the next snapshots confirm, override or expire the overlay.
    pub fn issue(
        &mut self,
        transfer_id: u64,
        action: ControlAction,
        now: Instant,
    ) -> Result<TransferStatus, CommandError> {
        let view = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or(CommandError::UnknownTransfer(transfer_id))?;
        if view.status.is_terminal() {
            return Err(CommandError::TerminalTransfer(transfer_id));
        }

        let status = self.reconciler.issue(transfer_id, action, now);
        info!(
            transfer_id,
            %action,
            from = %view.status,
            to = %status,
            "applying command optimistically"
        );
        view.status = status;
        view.pending_action = Some(action);
        Ok(status)
    }

    /// Merges one poll's worth of snapshots and takes a throughput sample.
    pub fn apply_cycle(&mut self, snapshots: &[TransferSnapshot], now: Instant) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport::default();
        let mut seen = HashSet::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let sanitized = match snapshot.sanitize() {
                Ok(sanitized) => sanitized,
                Err(e) => {
                    warn!(cycle = self.cycle, error = %e, "skipping snapshot record");
                    report.skipped += 1;
                    continue;
                }
            };
            if !seen.insert(sanitized.id) {
                warn!(
                    transfer_id = sanitized.id,
                    "duplicate snapshot record in one cycle, keeping the first"
                );
                report.skipped += 1;
                continue;
            }
            if self.merge(sanitized) {
                report.merged += 1;
            } else {
                report.ignored_terminal += 1;
            }
        }

        for id in self.reconciler.age_unseen(&seen) {
            if let Some(view) = self.transfers.get_mut(&id) {
                view.status = view.confirmed_status;
                view.pending_action = None;
            }
            report.expired_commands += 1;
        }

        self.sample_throughput(now);
        debug!(cycle = self.cycle, ?report, rate = self.throughput.rate(), "cycle merged");
        report
    }

    fn merge(&mut self, snapshot: SanitizedSnapshot) -> bool {
        let id = snapshot.id;
        let previous = self.transfers.get(&id);
        if let Some(previous) = previous {
            if previous.status.is_terminal() {
                debug!(
                    transfer_id = id,
                    status = %previous.status,
                    "ignoring snapshot for finished transfer"
                );
                return false;
            }
        }

        let total_size = snapshot.total_size.or(previous.and_then(|p| p.total_size));
        let totals = aggregate(&snapshot.segments, total_size);
        let previous_confirmed = previous.map(|p| p.confirmed_status);
        let previous_status = previous.map(|p| p.status);
        let reported = derive_status(&snapshot, total_size, totals, previous_confirmed);
        let status = self.reconciler.reconcile(id, reported);

        if previous_status != Some(status) {
            info!(transfer_id = id, from = ?previous_status, to = %status, "status changed");
        }
        if let Some(advisory) = snapshot.reported_downloaded {
            if advisory != totals.downloaded_size {
                debug!(
                    transfer_id = id,
                    advisory,
                    recomputed = totals.downloaded_size,
                    "backend byte count differs from segment sum"
                );
            }
        }

        let failure_reason = if status == TransferStatus::Failed {
            snapshot.error_message
        } else {
            None
        };
        let view = TransferView {
            id,
            source_locator: snapshot.source_locator,
            destination_name: snapshot.destination_name,
            total_size,
            segments: snapshot.segments,
            status,
            confirmed_status: reported,
            failure_reason,
            downloaded_size: totals.downloaded_size,
            progress_percent: totals.progress_percent,
            pending_action: self.reconciler.pending(id).map(|c| c.action),
            requested_segments: snapshot.requested_segments,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            reported_downloaded: snapshot.reported_downloaded,
        };
        self.transfers.insert(id, view);
        true
    }

    fn sample_throughput(&mut self, now: Instant) {
        let mut current = HashMap::with_capacity(self.active_bytes.len());
        for view in self.transfers.values() {
            if view.status != TransferStatus::Active {
                continue;
            }
            // Only bytes gained while active on both sides of the cycle count,
            // so transfers joining or leaving do not skew the rate.
            if let Some(before) = self.active_bytes.get(&view.id) {
                let gained = view.downloaded_size.saturating_sub(*before);
                self.active_progress = self.active_progress.saturating_add(gained);
            }
            current.insert(view.id, view.downloaded_size);
        }
        self.active_bytes = current;
        self.throughput.observe(now, self.active_progress);
    }

    pub fn get(&self, transfer_id: u64) -> Option<&TransferView> {
        self.transfers.get(&transfer_id)
    }

    pub fn rate(&self) -> f64 {
        self.throughput.rate()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn view(&self) -> StoreView {
        let transfers: Vec<TransferView> = self.transfers.values().cloned().collect();
        StoreView {
            cycle: self.cycle,
            summary: TransferSummary::tally(&transfers),
            rate: self.throughput.rate(),
            transfers,
        }
    }
}

/// Status implied by a snapshot alone, before any pending command.
fn derive_status(
    snapshot: &SanitizedSnapshot,
    total_size: Option<u64>,
    totals: Aggregate,
    previous: Option<TransferStatus>,
) -> TransferStatus {
    let has_activity = totals.downloaded_size > 0;
    let bytes_complete = total_size.is_some_and(|total| totals.downloaded_size == total);

    let status = match snapshot.status {
        WireStatus::Failed => TransferStatus::Failed,
        WireStatus::Completed => TransferStatus::Completed,
        _ if bytes_complete && snapshot.error_message.is_none() => TransferStatus::Completed,
        WireStatus::Pending if has_activity => TransferStatus::Active,
        WireStatus::InProgress
            if !has_activity && matches!(previous, None | Some(TransferStatus::Pending)) =>
        {
            TransferStatus::Pending
        }
        other => other.into(),
    };

    match previous {
        Some(previous)
            if status == TransferStatus::Pending && previous != TransferStatus::Pending =>
        {
            debug!(
                transfer_id = snapshot.id,
                %previous,
                "snapshot would move transfer back to pending, keeping previous"
            );
            previous
        }
        _ => status,
    }
}
