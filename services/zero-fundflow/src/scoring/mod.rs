//! Composite scoring for fund-flow records.
//!
//! Four mandatory dimensions and one optional dimension, each a step
//! function into [0, 100]:
//!
//! | Dimension    | Input               | Weight (4-dim) | Weight (5-dim) |
//! |--------------|---------------------|----------------|----------------|
//! | Position     | position-build ratio| 50%            | 45%            |
//! | Momentum     | percent change      | 20%            | 18%            |
//! | Activity     | turnover rate       | 15%            | 13.5%          |
//! | Liquidity    | traded amount       | 15%            | 13.5%          |
//! | Volume ratio | volume ratio        | -              | 10%            |
//!
//! Weights are kept in per-mille so both formulas sum to exactly 1000.
//! A missing input scores 0 for its dimension.

mod volume_level;

pub use volume_level::{classify_volume_level, VolumeLevel};

use serde::{Deserialize, Serialize};

use crate::data::normalize::YI;
use crate::data::FundFlowRecord;

// ============================================================================
// Weights
// ============================================================================

/// Per-mille weights for one composite formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weights {
    pub position: u32,
    pub momentum: u32,
    pub activity: u32,
    pub liquidity: u32,
    pub volume_ratio: u32,
}

impl Weights {
    /// Formula without the volume-ratio dimension
    pub const BASE: Weights = Weights {
        position: 500,
        momentum: 200,
        activity: 150,
        liquidity: 150,
        volume_ratio: 0,
    };

    /// Formula with the volume-ratio dimension
    pub const WITH_VOLUME_RATIO: Weights = Weights {
        position: 450,
        momentum: 180,
        activity: 135,
        liquidity: 135,
        volume_ratio: 100,
    };

    pub fn total(&self) -> u32 {
        self.position + self.momentum + self.activity + self.liquidity + self.volume_ratio
    }
}

// ============================================================================
// Score Breakdown
// ============================================================================

/// Per-dimension scores plus the weighted composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub position: f64,
    pub momentum: f64,
    pub activity: f64,
    pub liquidity: f64,
    /// Present only when a volume ratio was available
    pub volume_ratio: Option<f64>,
    /// Weighted composite, one decimal, in [0, 100]
    pub composite: f64,
}

impl ScoreBreakdown {
    /// True if the composite used the 5-dimension weights.
    pub fn uses_volume_ratio(&self) -> bool {
        self.volume_ratio.is_some()
    }
}

// ============================================================================
// Dimension Scores
// ============================================================================

/// Position-build ratio (%) → score.
pub fn position_score(ratio: Option<f64>) -> u32 {
    let Some(r) = ratio else { return 0 };
    match r {
        r if r >= 25.0 => 100,
        r if r >= 20.0 => 90,
        r if r >= 15.0 => 80,
        r if r >= 10.0 => 70,
        r if r >= 5.0 => 55,
        r if r >= 2.0 => 40,
        r if r >= 0.0 => 25,
        r if r >= -5.0 => 10,
        _ => 0,
    }
}

/// Percent change → score.
pub fn momentum_score(change_pct: Option<f64>) -> u32 {
    let Some(c) = change_pct else { return 0 };
    match c {
        c if c >= 9.9 => 100,
        c if c >= 7.0 => 90,
        c if c >= 5.0 => 80,
        c if c >= 3.0 => 70,
        c if c >= 1.0 => 60,
        c if c >= 0.0 => 50,
        c if c >= -2.0 => 35,
        c if c >= -4.0 => 20,
        c if c > -6.0 => 10,
        _ => 0,
    }
}

/// Turnover rate (%) → score. Peaks at 5-10%; both extremes are penalized.
pub fn activity_score(turnover: Option<f64>) -> u32 {
    let Some(t) = turnover else { return 0 };
    match t {
        t if t >= 30.0 => 10,
        t if t >= 20.0 => 35,
        t if t >= 15.0 => 60,
        t if t >= 10.0 => 80,
        t if t >= 5.0 => 100,
        t if t >= 3.0 => 80,
        t if t >= 2.0 => 60,
        t if t >= 1.0 => 40,
        t if t >= 0.0 => 20,
        _ => 0,
    }
}

/// Traded amount → score, increasing with size.
pub fn liquidity_score(amount: Option<f64>) -> u32 {
    let Some(a) = amount else { return 0 };
    let yi = a / YI;
    match yi {
        y if y >= 20.0 => 100,
        y if y >= 10.0 => 85,
        y if y >= 5.0 => 70,
        y if y >= 2.0 => 55,
        y if y >= 1.0 => 40,
        y if y >= 0.5 => 25,
        _ => 10,
    }
}

/// Volume ratio → score. Peaks at 2-3x; extreme spikes taper off.
pub fn volume_ratio_score(ratio: f64) -> u32 {
    match ratio {
        r if r < 0.8 => 20,
        r if r < 1.0 => 40,
        r if r < 1.5 => 60,
        r if r < 2.0 => 80,
        r if r < 3.0 => 100,
        r if r < 5.0 => 85,
        _ => 60,
    }
}

// ============================================================================
// Composite
// ============================================================================

/// Score a record. `volume_ratio` selects the 5-dimension formula.
pub fn score(record: &FundFlowRecord, volume_ratio: Option<f64>) -> ScoreBreakdown {
    let position = position_score(record.position_ratio);
    let momentum = momentum_score(record.change_pct);
    let activity = activity_score(record.turnover_rate);
    let liquidity = liquidity_score(record.amount);
    let vr = volume_ratio.filter(|r| r.is_finite()).map(volume_ratio_score);

    let weights = if vr.is_some() {
        Weights::WITH_VOLUME_RATIO
    } else {
        Weights::BASE
    };

    let weighted = weights.position * position
        + weights.momentum * momentum
        + weights.activity * activity
        + weights.liquidity * liquidity
        + weights.volume_ratio * vr.unwrap_or(0);

    ScoreBreakdown {
        position: f64::from(position),
        momentum: f64::from(momentum),
        activity: f64::from(activity),
        liquidity: f64::from(liquidity),
        volume_ratio: vr.map(f64::from),
        composite: composite_from_weighted(weighted, weights.total()),
    }
}

/// Weighted per-mille sum → composite rounded to one decimal.
fn composite_from_weighted(weighted: u32, total: u32) -> f64 {
    // weighted / total * 100 at 0.1 resolution
    let tenths = (f64::from(weighted) * 1000.0 / f64::from(total) / 100.0).round();
    (tenths / 10.0).clamp(0.0, 100.0)
}
