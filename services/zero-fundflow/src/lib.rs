//! Zero FundFlow Library
//!
//! Screens A-shares by intraday capital-flow signals, ranks them with a
//! composite score, and keeps a leaderboard history plus a growing
//! backtest universe.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    zero-fundflow (Rust Service)                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  Tiered Cache   │─►│  Selection      │─►│  History        │      │
//! │  │  + Enrichment   │  │  Funnel         │  │  Recorder       │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! │    memory/SQLite/       4-dim → 5-dim        snapshots, tracked     │
//! │    eastmoney            composite score      universe, backtest     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Position-build ratio
//! - Primary capital = super-large + large order net inflow
//! - Ratio = primary net / traded amount × 100
//! - Never substituted by the raw net inflow
//!
//! ## Trading date
//! - Weekends roll back to Friday
//! - Partition key for every cached and recorded table

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod scoring;
pub mod screener;

pub use error::FlowError;
pub use pipeline::{FundFlowService, RankingOutcome};
