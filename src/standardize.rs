use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::PlayerSeasonRecord;
use crate::game_log::{COUNTING_STAT_COUNT, COUNTING_STATS};

/// Below this a cohort's spread is treated as zero.
const STD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    pub std_dev: f64,
    pub n: usize,
}

impl ColumnStats {
    /// Mean and sample (n - 1) standard deviation; `std_dev` is NaN below two values.
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: f64::NAN,
                std_dev: f64::NAN,
                n,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
            (ss / (n - 1) as f64).sqrt()
        } else {
            f64::NAN
        };
        Self { mean, std_dev, n }
    }

    pub fn is_degenerate(&self) -> bool {
        !self.std_dev.is_finite() || self.std_dev <= STD_EPSILON
    }

    /// Z-score, or 0 when the cohort has no spread.
    pub fn z(&self, value: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        (value - self.mean) / self.std_dev
    }
}

/// Per-season mean and deviation of every counting-stat rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonStats {
    pub by_season: BTreeMap<i32, [ColumnStats; COUNTING_STAT_COUNT]>,
}

impl SeasonStats {
    pub fn get(&self, season: i32, column: &str) -> Option<ColumnStats> {
        let idx = COUNTING_STATS.iter().position(|c| *c == column)?;
        self.by_season.get(&season).map(|cols| cols[idx])
    }

    pub fn seasons(&self) -> impl Iterator<Item = i32> + '_ {
        self.by_season.keys().copied()
    }
}

pub fn season_stats(rows: &[PlayerSeasonRecord]) -> SeasonStats {
    let mut columns: BTreeMap<i32, Vec<Vec<f64>>> = BTreeMap::new();
    for row in rows {
        let cols = columns
            .entry(row.season)
            .or_insert_with(|| vec![Vec::new(); COUNTING_STAT_COUNT]);
        for (col, v) in cols.iter_mut().zip(row.rates) {
            col.push(v);
        }
    }

    let by_season = columns
        .into_iter()
        .map(|(season, cols)| {
            let stats = std::array::from_fn(|idx| ColumnStats::from_values(&cols[idx]));
            (season, stats)
        })
        .collect();
    SeasonStats { by_season }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardizedRecord {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub season: i32,
    pub games_frac: f64,
    pub minutes_frac: f64,
    pub win_pct: f64,
    /// Within-season z-scores in `COUNTING_STATS` order.
    pub z: [f64; COUNTING_STAT_COUNT],
    pub share: f64,
}

impl StandardizedRecord {
    pub fn has_vote(&self) -> bool {
        self.share > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegenerateStat {
    pub season: i32,
    pub column: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct Standardized {
    pub records: Vec<StandardizedRecord>,
    pub degenerate: Vec<DegenerateStat>,
}

pub fn standardize(rows: &[PlayerSeasonRecord], stats: &SeasonStats) -> Result<Standardized> {
    let mut degenerate = Vec::new();
    for (&season, cols) in &stats.by_season {
        for (col, name) in cols.iter().zip(COUNTING_STATS) {
            if col.is_degenerate() {
                degenerate.push(DegenerateStat {
                    season,
                    column: name,
                });
            }
        }
    }

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let cols = stats
            .by_season
            .get(&row.season)
            .ok_or_else(|| anyhow!("no cohort statistics for season {}", row.season))?;
        let z = std::array::from_fn(|idx| cols[idx].z(row.rates[idx]));
        records.push(StandardizedRecord {
            player_id: row.player_id,
            player_name: row.player_name.clone(),
            team: row.team.clone(),
            season: row.season,
            games_frac: row.games_frac,
            minutes_frac: row.minutes_frac,
            win_pct: row.win_pct,
            z,
            share: row.share,
        });
    }
    Ok(Standardized {
        records,
        degenerate,
    })
}

/// Standardizes `rows` against their own per-season statistics.
///
/// A stat with no spread in a season is zeroed and logged. A season where
/// every stat is degenerate cannot inform a fit and is an error.
pub fn standardize_cohort(
    rows: &[PlayerSeasonRecord],
    cohort: &'static str,
) -> Result<Standardized> {
    let stats = season_stats(rows);
    for (&season, cols) in &stats.by_season {
        if cols.iter().all(ColumnStats::is_degenerate) {
            return Err(PipelineError::DegenerateCohort { season, cohort }.into());
        }
    }

    let out = standardize(rows, &stats)?;
    for d in &out.degenerate {
        tracing::warn!(
            cohort,
            season = d.season,
            column = d.column,
            "zero-variance stat; z-scores set to 0"
        );
    }
    tracing::info!(
        cohort,
        rows = out.records.len(),
        seasons = stats.by_season.len(),
        "standardized cohort"
    );
    Ok(out)
}

/// Vote-getters from every season except the target.
pub fn magnitude_cohort(rows: &[PlayerSeasonRecord], target_season: i32) -> Vec<PlayerSeasonRecord> {
    rows.iter()
        .filter(|r| r.share > 0.0 && r.season != target_season)
        .cloned()
        .collect()
}

/// Every eligible row from every season except the target.
pub fn indicator_cohort(rows: &[PlayerSeasonRecord], target_season: i32) -> Vec<PlayerSeasonRecord> {
    rows.iter()
        .filter(|r| r.season != target_season)
        .cloned()
        .collect()
}
