//! Repository modules for ledger access

mod batches;
mod contributions;
mod daily_usage;
mod snapshots;

pub use batches::BatchRepository;
pub use contributions::ContributionRepository;
pub use daily_usage::DailyUsageRepository;
pub use snapshots::SnapshotRepository;
