use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use allnba_share::config::PipelineConfig;
use allnba_share::features::build_feature_table;
use allnba_share::game_log::load_game_logs;
use allnba_share::labels::{join_labels, load_vote_shares, season_label_totals};
use allnba_share::pipeline::{load_aliases, load_team_games_or_derive};
use allnba_share::reconstruct::LEAGUE_SHARE_TOTAL;

/// Checks vote-share labels against the game logs without fitting anything.
#[derive(Debug, Parser)]
#[command(name = "label_audit", long_about = None)]
struct AuditArgs {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Player game logs, CSV or Parquet
    #[arg(long)]
    game_logs: Option<PathBuf>,
    /// Vote share table
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Name alias table
    #[arg(long)]
    aliases: Option<PathBuf>,
    /// Games per team-season; derived from the logs when omitted
    #[arg(long)]
    team_games: Option<PathBuf>,
}

impl AuditArgs {
    fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(path) = &self.game_logs {
            cfg.paths.game_logs = path.clone();
        }
        if let Some(path) = &self.labels {
            cfg.paths.labels = path.clone();
        }
        if let Some(path) = &self.aliases {
            cfg.paths.aliases = Some(path.clone());
        }
        if let Some(path) = &self.team_games {
            cfg.paths.team_games = Some(path.clone());
        }
    }
}

fn main() -> Result<ExitCode> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = AuditArgs::parse();
    let mut cfg = PipelineConfig::load(args.config.as_deref())?;
    args.apply(&mut cfg);

    let labels = load_vote_shares(&cfg.paths.labels)?;
    let aliases = load_aliases(&cfg)?;
    let logs = load_game_logs(&cfg.paths.game_logs)?;
    let team_games = load_team_games_or_derive(&cfg, &logs)?;
    let (mut rows, features) = build_feature_table(&logs, &team_games, cfg.thresholds())
        .context("build feature table for audit")?;

    println!("Label audit");
    println!("Labels: {} ({} rows)", cfg.paths.labels.display(), labels.len());
    println!("Aliases: {}", aliases.len());
    println!(
        "Player-seasons: {} eligible of {} ({} without possessions)",
        features.eligible,
        features.player_seasons,
        features.zero_possession.len()
    );

    let mut off_total = 0usize;
    for (season, total) in season_label_totals(&labels) {
        let flag = if (total - LEAGUE_SHARE_TOTAL).abs() > cfg.label_total_tolerance {
            off_total += 1;
            "  <-- off"
        } else {
            ""
        };
        println!("season {season}: share total {total:.3}{flag}");
    }

    let report = join_labels(&mut rows, &features.filtered, &labels, &aliases);
    println!("Matched: {}/{}", report.matched, labels.len());
    if !report.misses.is_empty() {
        println!("Misses: {}", report.misses.len());
        for miss in &report.misses {
            println!("   - {miss}");
        }
    }
    if !report.ineligible.is_empty() {
        println!("Ineligible vote-getters: {}", report.ineligible.len());
        for name in &report.ineligible {
            println!("   - {name}");
        }
    }
    if !report.ambiguous.is_empty() {
        println!("Ambiguous: {}", report.ambiguous.len());
        for (key, count) in &report.ambiguous {
            println!("   - {key}: {count} player-seasons");
        }
    }
    if off_total > 0 {
        println!("Seasons off the league total: {off_total}");
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
