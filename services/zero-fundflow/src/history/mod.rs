//! Leaderboard history and backtest universe.
//!
//! Each instant-period pass replaces the day's leaderboard snapshot, adds
//! new leaderboard codes to the tracked universe, and writes a detail row
//! for every tracked code present in the day's universe.

pub mod recorder;
pub mod store;

pub use recorder::{HistoryRecorder, RecordReport};
pub use store::{BacktestRow, HistoryStats, HistoryStore, HistoryStoreConfig, SnapshotRow, TrackedStock};
