use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::game_log::{COUNTING_STAT_COUNT, GameLogRow, TeamGamesTable};

/// Turnover weight in the team possession estimate.
const TOV_WEIGHT: f64 = 0.44;
const PLAYERS_ON_COURT: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EligibilityThresholds {
    pub min_minutes_frac: f64,
    pub min_games_frac: f64,
}

impl Default for EligibilityThresholds {
    fn default() -> Self {
        Self {
            min_minutes_frac: 0.4,
            min_games_frac: 0.3,
        }
    }
}

/// One row per (player, season) after per-100 normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSeasonRecord {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub season: i32,
    pub games: u32,
    pub games_frac: f64,
    pub minutes_frac: f64,
    pub win_pct: f64,
    pub minutes: f64,
    pub poss: f64,
    /// Per-100-possession rates in `COUNTING_STATS` order.
    pub rates: [f64; COUNTING_STAT_COUNT],
    pub share: f64,
}

/// Per (player, season) sums before per-100 normalization.
#[derive(Debug, Clone)]
pub struct PlayerSeasonTotals {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub season: i32,
    pub games: u32,
    pub wins: u32,
    pub minutes: f64,
    pub available_minutes: f64,
    pub poss: f64,
    pub sums: [f64; COUNTING_STAT_COUNT],
    pub games_frac: f64,
}

impl PlayerSeasonTotals {
    pub fn minutes_frac(&self) -> f64 {
        if self.available_minutes > 0.0 {
            (self.minutes / self.available_minutes).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn win_pct(&self) -> f64 {
        if self.games > 0 {
            self.wins as f64 / self.games as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TeamGameTotals {
    pub poss: f64,
    pub minutes: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureReport {
    pub player_seasons: usize,
    pub zero_possession: Vec<String>,
    pub ineligible: usize,
    pub eligible: usize,
    /// Player-seasons that failed the eligibility filter.
    pub filtered: Vec<PlayerSeasonRecord>,
}

/// Team possessions and minutes for every (team, game) in the logs.
///
/// The possession estimate counts turnovers twice (once in full, once at the
/// 0.44 weight) and leaves free-throw attempts out.
pub fn team_game_totals(logs: &[GameLogRow]) -> HashMap<(String, String), TeamGameTotals> {
    let mut sums: HashMap<(String, String), [f64; 4]> = HashMap::new();
    for row in logs {
        let entry = sums
            .entry((row.team.clone(), row.game_id.clone()))
            .or_insert([0.0; 4]);
        entry[0] += row.fga;
        entry[1] += row.tov;
        entry[2] += row.oreb;
        entry[3] += row.minutes;
    }
    sums.into_iter()
        .map(|(key, [fga, tov, oreb, minutes])| {
            let poss = fga + tov + TOV_WEIGHT * tov - oreb;
            (key, TeamGameTotals { poss, minutes })
        })
        .collect()
}

/// Share of team possessions credited to a player by minutes on court.
pub fn player_possessions(minutes: f64, team: TeamGameTotals) -> f64 {
    let slot_minutes = team.minutes / PLAYERS_ON_COURT;
    if slot_minutes <= 0.0 {
        return 0.0;
    }
    minutes / slot_minutes * team.poss
}

pub fn aggregate_player_seasons(
    logs: &[GameLogRow],
    team_games: &TeamGamesTable,
) -> Result<Vec<PlayerSeasonTotals>> {
    let team_totals = team_game_totals(logs);

    struct Acc<'a> {
        totals: PlayerSeasonTotals,
        latest: (NaiveDate, &'a str),
    }

    let mut by_key: BTreeMap<(i32, u64), Acc<'_>> = BTreeMap::new();
    for row in logs {
        let team = team_totals
            .get(&(row.team.clone(), row.game_id.clone()))
            .copied()
            .unwrap_or_default();
        let acc = by_key.entry((row.season, row.player_id)).or_insert_with(|| Acc {
            totals: PlayerSeasonTotals {
                player_id: row.player_id,
                player_name: row.player_name.clone(),
                team: row.team.clone(),
                season: row.season,
                games: 0,
                wins: 0,
                minutes: 0.0,
                available_minutes: 0.0,
                poss: 0.0,
                sums: [0.0; COUNTING_STAT_COUNT],
                games_frac: 0.0,
            },
            latest: (row.game_date, row.game_id.as_str()),
        });

        let t = &mut acc.totals;
        t.games += 1;
        if row.is_win() {
            t.wins += 1;
        }
        t.minutes += row.minutes;
        t.available_minutes += team.minutes / PLAYERS_ON_COURT;
        t.poss += player_possessions(row.minutes, team);
        for (sum, v) in t.sums.iter_mut().zip(row.counting_stats()) {
            *sum += v;
        }

        // Most recent game wins: date descending, then game id descending.
        let candidate = (row.game_date, row.game_id.as_str());
        if candidate > acc.latest {
            acc.latest = candidate;
            t.team = row.team.clone();
            t.player_name = row.player_name.clone();
        }
    }

    let mut out = Vec::with_capacity(by_key.len());
    for (_, acc) in by_key {
        let mut totals = acc.totals;
        let Some(&team_game_count) = team_games.get(&(totals.team.clone(), totals.season)) else {
            return Err(PipelineError::MissingTeamGames {
                team: totals.team,
                season: totals.season,
            }
            .into());
        };
        totals.games_frac = if team_game_count > 0 {
            (totals.games as f64 / team_game_count as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(totals);
    }
    Ok(out)
}

pub fn per_100(
    totals: Vec<PlayerSeasonTotals>,
    report: &mut FeatureReport,
) -> Vec<PlayerSeasonRecord> {
    let mut out = Vec::with_capacity(totals.len());
    for t in totals {
        if t.poss <= 0.0 || !t.poss.is_finite() {
            tracing::warn!(
                player = %t.player_name,
                season = t.season,
                poss = t.poss,
                "dropping player-season with no possessions"
            );
            report
                .zero_possession
                .push(format!("{} ({})", t.player_name, t.season));
            continue;
        }
        let minutes_frac = t.minutes_frac();
        let win_pct = t.win_pct();
        let rates = t.sums.map(|sum| 100.0 * sum / t.poss);
        out.push(PlayerSeasonRecord {
            player_id: t.player_id,
            player_name: t.player_name,
            team: t.team,
            season: t.season,
            games: t.games,
            games_frac: t.games_frac,
            minutes_frac,
            win_pct,
            minutes: t.minutes,
            poss: t.poss,
            rates,
            share: 0.0,
        });
    }
    out
}

pub fn is_eligible(row: &PlayerSeasonRecord, thresholds: EligibilityThresholds) -> bool {
    row.minutes_frac > thresholds.min_minutes_frac && row.games_frac > thresholds.min_games_frac
}

pub fn build_feature_table(
    logs: &[GameLogRow],
    team_games: &TeamGamesTable,
    thresholds: EligibilityThresholds,
) -> Result<(Vec<PlayerSeasonRecord>, FeatureReport)> {
    let mut report = FeatureReport::default();
    let totals = aggregate_player_seasons(logs, team_games)?;
    report.player_seasons = totals.len();

    let rows = per_100(totals, &mut report);
    let (eligible, dropped): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|r| is_eligible(r, thresholds));
    report.ineligible = dropped.len();
    report.eligible = eligible.len();
    report.filtered = dropped;

    tracing::info!(
        player_seasons = report.player_seasons,
        zero_possession = report.zero_possession.len(),
        ineligible = report.ineligible,
        eligible = report.eligible,
        "built feature table"
    );
    Ok((eligible, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(
        player_id: u64,
        team: &str,
        game: &str,
        date: (i32, u32, u32),
        minutes: f64,
    ) -> GameLogRow {
        GameLogRow {
            player_id,
            player_name: format!("Player {player_id}"),
            team: team.to_string(),
            game_id: game.to_string(),
            game_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            season: 2024,
            wl: "W".to_string(),
            minutes,
            fgm: 5.0,
            fga: 10.0,
            fg3m: 1.0,
            fg3a: 3.0,
            ftm: 2.0,
            fta: 2.0,
            oreb: 1.0,
            reb: 5.0,
            ast: 3.0,
            stl: 1.0,
            blk: 0.0,
            tov: 2.0,
            pf: 2.0,
            pts: 13.0,
        }
    }

    #[test]
    fn team_possessions_double_count_turnovers() {
        let logs = vec![
            log(1, "AAA", "g1", (2023, 11, 1), 40.0),
            log(2, "AAA", "g1", (2023, 11, 1), 200.0),
        ];
        let totals = team_game_totals(&logs);
        let t = totals[&("AAA".to_string(), "g1".to_string())];
        // fga 20 + tov 4 + 0.44 * tov 4 - oreb 2
        assert!((t.poss - (20.0 + 4.0 + 1.76 - 2.0)).abs() < 1e-12);
        assert_eq!(t.minutes, 240.0);
    }

    #[test]
    fn player_possessions_follow_minutes_share() {
        let team = TeamGameTotals {
            poss: 100.0,
            minutes: 240.0,
        };
        assert!((player_possessions(48.0, team) - 100.0).abs() < 1e-12);
        assert!((player_possessions(24.0, team) - 50.0).abs() < 1e-12);
        assert_eq!(player_possessions(10.0, TeamGameTotals::default()), 0.0);
    }

    #[test]
    fn most_recent_team_breaks_date_ties_by_game_id() {
        let logs = vec![
            log(1, "AAA", "g1", (2024, 1, 10), 30.0),
            log(1, "CCC", "g3", (2024, 2, 1), 30.0),
            log(1, "BBB", "g2", (2024, 2, 1), 30.0),
        ];
        let mut games = TeamGamesTable::new();
        for team in ["AAA", "BBB", "CCC"] {
            games.insert((team.to_string(), 2024), 10);
        }
        let totals = aggregate_player_seasons(&logs, &games).unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].team, "CCC");
        assert_eq!(totals[0].games, 3);
        assert!((totals[0].games_frac - 0.3).abs() < 1e-12);
    }

    #[test]
    fn missing_team_games_is_an_error() {
        let logs = vec![log(1, "AAA", "g1", (2024, 1, 10), 30.0)];
        let err = aggregate_player_seasons(&logs, &TeamGamesTable::new()).unwrap_err();
        assert!(err.to_string().contains("AAA"));
    }

    #[test]
    fn zero_possession_rows_are_dropped_before_division() {
        let mut report = FeatureReport::default();
        let totals = vec![PlayerSeasonTotals {
            player_id: 9,
            player_name: "Bench".to_string(),
            team: "AAA".to_string(),
            season: 2024,
            games: 1,
            wins: 0,
            minutes: 0.0,
            available_minutes: 48.0,
            poss: 0.0,
            sums: [0.0; COUNTING_STAT_COUNT],
            games_frac: 0.1,
        }];
        let rows = per_100(totals, &mut report);
        assert!(rows.is_empty());
        assert_eq!(report.zero_possession, vec!["Bench (2024)".to_string()]);
    }

    #[test]
    fn eligibility_thresholds_are_strict() {
        let mut row = PlayerSeasonRecord {
            player_id: 1,
            player_name: "x".into(),
            team: "AAA".into(),
            season: 2024,
            games: 10,
            games_frac: 0.5,
            minutes_frac: 0.4,
            win_pct: 0.5,
            minutes: 300.0,
            poss: 600.0,
            rates: [1.0; COUNTING_STAT_COUNT],
            share: 0.0,
        };
        let t = EligibilityThresholds::default();
        assert!(!is_eligible(&row, t));
        row.minutes_frac = 0.41;
        assert!(is_eligible(&row, t));
        row.games_frac = 0.3;
        assert!(!is_eligible(&row, t));
    }
}
