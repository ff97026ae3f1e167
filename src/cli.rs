use clap::ValueEnum;

use crate::state::TransferStatus;

/// Which transfers a listing shows.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ViewFilter {
    /// Pending, downloading or paused
    Active,
    Completed,
    Failed,
    #[default]
    All,
}

impl ViewFilter {
    pub fn matches(self, status: TransferStatus) -> bool {
        match self {
            ViewFilter::Active => matches!(
                status,
                TransferStatus::Pending | TransferStatus::Active | TransferStatus::Paused
            ),
            ViewFilter::Completed => status == TransferStatus::Completed,
            ViewFilter::Failed => status == TransferStatus::Failed,
            ViewFilter::All => true,
        }
    }
}
