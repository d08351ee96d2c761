//! Fund-flow screener.
//!
//! Ranks a resolved dataset through the two-phase selection funnel and
//! renders the resulting leaderboard.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SelectionFunnel                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Phase 1: 4-dim score for the whole universe                │
//! │     ↓                                                       │
//! │  Candidate pool (top 500)                                   │
//! │     ↓                                                       │
//! │  Float market cap screen (< 1000亿)                         │
//! │     ↓                                                       │
//! │  Phase 2: volume ratio + 5-dim rescore                      │
//! │     ↓                                                       │
//! │  Leaderboard (top N) → LeaderboardReport                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod funnel;
pub mod report;

pub use config::FunnelConfig;
pub use funnel::{
    FunnelStage, LeaderboardRow, RankedBoard, RankedEntry, SelectionFunnel, StageResult,
    VolumeRatioSource,
};
pub use report::{LeaderboardReport, ReportFormat};
