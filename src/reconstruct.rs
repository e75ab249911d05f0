use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::labels::UnavailableList;
use crate::model::TwoStageModel;
use crate::standardize::StandardizedRecord;

/// Five first-team, five second-team and five third-team slots, weighted
/// so a season's vote shares add up to nine.
pub const LEAGUE_SHARE_TOTAL: f64 = 9.0;
pub const RESCALE_ITERATIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub season: i32,
    pub p_vote: f64,
    pub magnitude: f64,
    pub expected_share: f64,
    pub adjusted_share: f64,
    /// Observed share, 0 for unlabeled rows.
    pub share: f64,
}

/// Runs both stages over every row and combines them into expected shares.
pub fn combine(model: &TwoStageModel, rows: &[StandardizedRecord]) -> Vec<PredictionRow> {
    rows.iter()
        .map(|row| {
            let stage = model.predict(row);
            let expected = stage.expected_share();
            PredictionRow {
                player_id: row.player_id,
                player_name: row.player_name.clone(),
                team: row.team.clone(),
                season: row.season,
                p_vote: stage.p_vote,
                magnitude: stage.magnitude,
                expected_share: expected,
                adjusted_share: expected,
                share: row.share,
            }
        })
        .collect()
}

pub fn season_totals(rows: &[PredictionRow]) -> BTreeMap<i32, f64> {
    let mut totals = BTreeMap::new();
    for row in rows {
        *totals.entry(row.season).or_insert(0.0) += row.adjusted_share;
    }
    totals
}

/// Scales each season toward `target` and clamps rows to at most 1,
/// `iterations` times. Clamping moves the sum off target, so one pass is
/// not enough.
pub fn rescale_to_target(rows: &[PredictionRow], target: f64, iterations: usize) -> Vec<PredictionRow> {
    let mut out = rows
        .iter()
        .map(|r| PredictionRow {
            adjusted_share: r.expected_share,
            ..r.clone()
        })
        .collect::<Vec<_>>();

    for _ in 0..iterations {
        let totals = season_totals(&out);
        for row in &mut out {
            let total = totals.get(&row.season).copied().unwrap_or(0.0);
            if total <= 0.0 {
                continue;
            }
            row.adjusted_share = (row.adjusted_share * target / total).min(1.0);
        }
    }

    for (season, total) in season_totals(&out) {
        tracing::info!(season, total, target, "rescaled season shares");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamShare {
    pub team: String,
    pub expected_share: f64,
}

/// Adjusted share summed per team for one season, largest first.
pub fn team_totals(rows: &[PredictionRow], season: i32, unavailable: &UnavailableList) -> Vec<TeamShare> {
    let mut by_team: HashMap<&str, f64> = HashMap::new();
    let mut skipped = 0usize;
    for row in rows.iter().filter(|r| r.season == season) {
        if unavailable.contains(&row.player_name) {
            skipped += 1;
            continue;
        }
        *by_team.entry(row.team.as_str()).or_insert(0.0) += row.adjusted_share;
    }
    if skipped > 0 {
        tracing::info!(season, skipped, "excluded unavailable players from team totals");
    }

    let mut out = by_team
        .into_iter()
        .map(|(team, expected_share)| TeamShare {
            team: team.to_string(),
            expected_share,
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| {
        b.expected_share
            .total_cmp(&a.expected_share)
            .then_with(|| a.team.cmp(&b.team))
    });
    out
}
