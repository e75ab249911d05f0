#![allow(dead_code)]

use std::path::Path;

use chrono::{Days, NaiveDate};

use allnba_share::game_log::GameLogRow;
use allnba_share::labels::VoteShareRow;

pub const TEAMS: [&str; 6] = ["ATL", "BOS", "CHI", "DEN", "LAL", "MIA"];
pub const STARTERS: usize = 5;
pub const GAMES_PER_TEAM: u32 = 20;
pub const BENCH_GAMES: u32 = 3;

pub fn player_count() -> usize {
    TEAMS.len() * STARTERS
}

/// Starter `idx` plays for `TEAMS[idx % 6]`; lower index means a better player.
pub fn quality(idx: usize, season: i32) -> f64 {
    let jitter = ((idx * 7 + season as usize) % 5) as f64 * 0.004;
    1.0 - idx as f64 / player_count() as f64 - jitter
}

fn stat_line(idx: usize, q: f64, game: u32) -> [f64; 14] {
    let p = idx as f64;
    let w = ((game as usize * 13 + idx * 7) % 11) as f64 / 10.0;
    let fga = 8.0 + 14.0 * q + w;
    let fgm = fga * (0.42 + 0.1 * q);
    let fg3a = 2.0 + 5.0 * (1.0 - q) + 0.5 * w;
    let fg3m = fg3a * 0.35;
    let fta = 2.0 + 8.0 * q;
    let ftm = fta * 0.78;
    let oreb = 0.5 + (idx % 3) as f64 * 0.5 + 0.2 * w;
    let reb = oreb + 3.0 + 4.0 * q + (idx % 4) as f64;
    let ast = 1.0 + 3.0 * q * ((idx % 2) + 1) as f64 + 0.3 * w;
    let stl = 0.5 + q + 0.1 * (idx % 5) as f64;
    let blk = 0.2 + 0.1 * (idx % 7) as f64 + 0.5 * q;
    let tov = 1.0 + 2.0 * q + 0.1 * w;
    let pf = 2.0 + 0.1 * (p % 6.0);
    let pts = 2.0 * fgm + fg3m + ftm;
    [fgm, fga, fg3m, fg3a, ftm, fta, oreb, reb, ast, stl, blk, tov, pf, pts]
}

fn row(
    idx: usize,
    name: String,
    team_idx: usize,
    season: i32,
    game: u32,
    minutes: f64,
    stats: [f64; 14],
) -> GameLogRow {
    let opened = NaiveDate::from_ymd_opt(season - 1, 10, 20).unwrap();
    let won = if game % 3 == 0 {
        team_idx % 2 == 1
    } else {
        team_idx % 2 == 0
    };
    let [fgm, fga, fg3m, fg3a, ftm, fta, oreb, reb, ast, stl, blk, tov, pf, pts] = stats;
    GameLogRow {
        player_id: idx as u64 + 1,
        player_name: name,
        team: TEAMS[team_idx].to_string(),
        game_id: format!("{season}-{game:02}-{}", team_idx / 2),
        game_date: opened.checked_add_days(Days::new(u64::from(game) * 2)).unwrap(),
        season,
        wl: if won { "W" } else { "L" }.to_string(),
        minutes,
        fgm,
        fga,
        fg3m,
        fg3a,
        ftm,
        fta,
        oreb,
        reb,
        ast,
        stl,
        blk,
        tov,
        pf,
        pts,
    }
}

pub fn starter_name(idx: usize) -> String {
    format!("Player {idx:02}")
}

/// Thirty starters who play every game plus one bench player per team who
/// appears in only three.
pub fn synthetic_logs(seasons: &[i32]) -> Vec<GameLogRow> {
    let mut out = Vec::new();
    for &season in seasons {
        for game in 0..GAMES_PER_TEAM {
            for idx in 0..player_count() {
                let q = quality(idx, season);
                let stats = stat_line(idx, q, game);
                let team_idx = idx % TEAMS.len();
                out.push(row(idx, starter_name(idx), team_idx, season, game, 40.0, stats));
            }
            if game < BENCH_GAMES {
                for team_idx in 0..TEAMS.len() {
                    let idx = player_count() + team_idx;
                    let stats = stat_line(idx, 0.05, game);
                    let name = format!("Bench {team_idx}");
                    out.push(row(idx, name, team_idx, season, game, 40.0, stats));
                }
            }
        }
    }
    out
}

/// Fifteen vote-getters per season whose shares add up to 9.
pub fn synthetic_labels(season: i32) -> Vec<VoteShareRow> {
    (0..15)
        .map(|idx| VoteShareRow {
            player: format!("{}*", starter_name(idx)),
            season,
            share: match idx / 5 {
                0 => 0.98,
                1 => 0.6,
                _ => 0.22,
            },
        })
        .collect()
}

pub fn write_logs_csv(path: &Path, logs: &[GameLogRow]) {
    let mut wtr = csv::Writer::from_path(path).unwrap();
    for row in logs {
        wtr.serialize(row).unwrap();
    }
    wtr.flush().unwrap();
}

pub fn write_labels_csv(path: &Path, labels: &[VoteShareRow]) {
    let mut wtr = csv::Writer::from_path(path).unwrap();
    for row in labels {
        wtr.serialize(row).unwrap();
    }
    wtr.flush().unwrap();
}
