//! Optimistic pause/resume overlay and its reconciliation against snapshots.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::state::TransferStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Pause,
    Resume,
}

impl ControlAction {
    /// Status the transfer should settle in once the backend has acted.
    pub fn target(self) -> TransferStatus {
        match self {
            ControlAction::Pause => TransferStatus::Paused,
            ControlAction::Resume => TransferStatus::Active,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAction::Pause => f.write_str("pause"),
            ControlAction::Resume => f.write_str("resume"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub transfer_id: u64,
    pub action: ControlAction,
    pub issued_at: Instant,
    /// Reconcile passes that have gone by without confirmation.
    pub cycles_waited: u32,
}

/// Holds at most one unconfirmed command per transfer.
#[derive(Debug)]
pub struct CommandReconciler {
    stale_after: u32,
    pending: HashMap<u64, PendingCommand>,
}

impl CommandReconciler {
    pub fn new(stale_after: u32) -> Self {
        Self {
            stale_after: stale_after.max(1),
            pending: HashMap::new(),
        }
    }

    /// Records `action` for `transfer_id`, replacing any earlier pending
    /// command. Returns the status to show until the backend confirms.
    pub fn issue(
        &mut self,
        transfer_id: u64,
        action: ControlAction,
        issued_at: Instant,
    ) -> TransferStatus {
        let command = PendingCommand {
            transfer_id,
            action,
            issued_at,
            cycles_waited: 0,
        };
        if let Some(previous) = self.pending.insert(transfer_id, command) {
            debug!(
                transfer_id,
                replaced = %previous.action,
                with = %action,
                "replacing pending command"
            );
        }
        action.target()
    }

    /// Merges the pending command for `transfer_id` (if any) with the status a
    /// fresh snapshot reports.
    pub fn reconcile(
        &mut self,
        transfer_id: u64,
        snapshot_status: TransferStatus,
    ) -> TransferStatus {
        let Some(command) = self.pending.get_mut(&transfer_id) else {
            return snapshot_status;
        };

        if snapshot_status.is_terminal() {
            info!(
                transfer_id,
                action = %command.action,
                status = %snapshot_status,
                "terminal snapshot supersedes pending command"
            );
            self.pending.remove(&transfer_id);
            return snapshot_status;
        }

        if snapshot_status == command.action.target() {
            debug!(transfer_id, action = %command.action, "pending command confirmed");
            self.pending.remove(&transfer_id);
            return snapshot_status;
        }

        // Snapshot predates the command reaching the backend.
        command.cycles_waited += 1;
        if command.cycles_waited >= self.stale_after {
            warn!(
                transfer_id,
                action = %command.action,
                cycles = command.cycles_waited,
                "pending command never confirmed, restoring reported status"
            );
            self.pending.remove(&transfer_id);
            return snapshot_status;
        }

        command.action.target()
    }

    /// Ages commands whose transfer did not appear in this cycle's snapshot.
    /// Returns the transfers whose command expired.
    pub fn age_unseen(&mut self, seen: &HashSet<u64>) -> Vec<u64> {
        let stale_after = self.stale_after;
        let mut expired = Vec::new();
        self.pending.retain(|id, command| {
            if seen.contains(id) {
                return true;
            }
            command.cycles_waited += 1;
            if command.cycles_waited >= stale_after {
                warn!(
                    transfer_id = *id,
                    action = %command.action,
                    "pending command expired while transfer was missing"
                );
                expired.push(*id);
                false
            } else {
                true
            }
        });
        expired.sort_unstable();
        expired
    }

    pub fn pending(&self, transfer_id: u64) -> Option<&PendingCommand> {
        self.pending.get(&transfer_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
