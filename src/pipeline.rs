use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::config::PipelineConfig;
use crate::features::{FeatureReport, PlayerSeasonRecord, build_feature_table};
use crate::game_log::{GameLogRow, TeamGamesTable, derive_team_games, load_game_logs, load_team_games};
use crate::labels::{
    AliasTable, JoinReport, UnavailableList, VoteShareRow, check_label_totals, join_labels,
    load_vote_shares,
};
use crate::model::{TwoStageModel, fit_two_stage};
use crate::reconstruct::{
    LEAGUE_SHARE_TOTAL, PredictionRow, TeamShare, combine, rescale_to_target, team_totals,
};
use crate::report;
use crate::standardize::{indicator_cohort, magnitude_cohort, standardize_cohort};

/// Eligible player-seasons with labels attached.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub rows: Vec<PlayerSeasonRecord>,
    pub features: FeatureReport,
    pub join: JoinReport,
    pub target_season: i32,
}

#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub season: i32,
    pub rows: Vec<PredictionRow>,
    pub teams: Vec<TeamShare>,
}

pub fn load_aliases(cfg: &PipelineConfig) -> Result<AliasTable> {
    match &cfg.paths.aliases {
        Some(path) => AliasTable::load(path),
        None => Ok(AliasTable::default()),
    }
}

pub fn load_unavailable(cfg: &PipelineConfig, aliases: &AliasTable) -> Result<UnavailableList> {
    match &cfg.paths.unavailable {
        Some(path) => UnavailableList::load(path, aliases),
        None => Ok(UnavailableList::default()),
    }
}

pub fn load_team_games_or_derive(cfg: &PipelineConfig, logs: &[GameLogRow]) -> Result<TeamGamesTable> {
    match &cfg.paths.team_games {
        Some(path) => load_team_games(path),
        None => {
            let table = derive_team_games(logs);
            tracing::info!(team_seasons = table.len(), "derived team game counts from logs");
            Ok(table)
        }
    }
}

/// Loads every input named in `cfg` and builds the labeled feature table.
pub fn prepare(cfg: &PipelineConfig) -> Result<PreparedData> {
    let logs = load_game_logs(&cfg.paths.game_logs)?;
    let team_games = load_team_games_or_derive(cfg, &logs)?;
    let labels = load_vote_shares(&cfg.paths.labels)?;
    let aliases = load_aliases(cfg)?;
    prepare_from(&logs, &team_games, &labels, &aliases, cfg)
}

pub fn prepare_from(
    logs: &[GameLogRow],
    team_games: &TeamGamesTable,
    labels: &[VoteShareRow],
    aliases: &AliasTable,
    cfg: &PipelineConfig,
) -> Result<PreparedData> {
    let (mut rows, features) = build_feature_table(logs, team_games, cfg.thresholds())?;
    let target_season = match cfg.target_season {
        Some(season) => season,
        None => rows
            .iter()
            .map(|r| r.season)
            .max()
            .ok_or_else(|| anyhow!("no eligible player-seasons in the game logs"))?,
    };

    check_label_totals(labels, LEAGUE_SHARE_TOTAL, cfg.label_total_tolerance);
    let join = join_labels(&mut rows, &features.filtered, labels, aliases);
    let join = if cfg.strict_join {
        join.into_result().context("join vote shares onto player-seasons")?
    } else {
        for miss in &join.misses {
            tracing::warn!(label = %miss, "vote share row matched no player-season");
        }
        join
    };

    Ok(PreparedData {
        rows,
        features,
        join,
        target_season,
    })
}

/// Builds both training cohorts from seasons other than the target and fits.
pub fn fit(data: &PreparedData, cfg: &PipelineConfig) -> Result<TwoStageModel> {
    let magnitude = magnitude_cohort(&data.rows, data.target_season);
    let indicator = indicator_cohort(&data.rows, data.target_season);
    tracing::info!(
        target_season = data.target_season,
        magnitude_rows = magnitude.len(),
        indicator_rows = indicator.len(),
        "training cohorts"
    );

    let magnitude = standardize_cohort(&magnitude, "magnitude")?;
    let indicator = standardize_cohort(&indicator, "indicator")?;
    fit_two_stage(
        &magnitude.records,
        &indicator.records,
        &cfg.fit_options(data.target_season),
    )
}

/// Scores every season with stored coefficients and rescales to the league total.
pub fn predict(
    model: &TwoStageModel,
    data: &PreparedData,
    unavailable: &UnavailableList,
    cfg: &PipelineConfig,
) -> Result<PredictionOutput> {
    if model.target_season != data.target_season {
        tracing::warn!(
            model_season = model.target_season,
            data_season = data.target_season,
            "model was fit for a different target season; using the model's"
        );
    }
    let season = model.target_season;
    let population = standardize_cohort(&data.rows, "prediction")?;
    let combined = combine(model, &population.records);
    let rows = rescale_to_target(&combined, LEAGUE_SHARE_TOTAL, cfg.rescale_iterations);
    let teams = team_totals(&rows, season, unavailable);
    if teams.is_empty() {
        tracing::warn!(season, "no prediction rows for the target season");
    }
    Ok(PredictionOutput { season, rows, teams })
}

pub fn write_outputs(out: &PredictionOutput, cfg: &PipelineConfig) -> Result<()> {
    let predictions = cfg.paths.predictions_path();
    let teams = cfg.paths.team_shares_path();
    report::write_predictions_csv(&predictions, &out.rows)?;
    report::write_team_shares_csv(&teams, &out.teams)?;
    tracing::info!(
        predictions = %predictions.display(),
        teams = %teams.display(),
        rows = out.rows.len(),
        "wrote prediction outputs"
    );
    Ok(())
}

pub fn run_fit(cfg: &PipelineConfig) -> Result<TwoStageModel> {
    let data = prepare(cfg)?;
    let model = fit(&data, cfg)?;
    let path = cfg.paths.model_path();
    model.save(&path)?;
    tracing::info!(path = %path.display(), "saved model artifact");
    Ok(model)
}

pub fn run_predict(cfg: &PipelineConfig) -> Result<PredictionOutput> {
    let model = TwoStageModel::load(&cfg.paths.model_path())?;
    let data = prepare(cfg)?;
    let aliases = load_aliases(cfg)?;
    let unavailable = load_unavailable(cfg, &aliases)?;
    let out = predict(&model, &data, &unavailable, cfg)?;
    write_outputs(&out, cfg)?;
    Ok(out)
}

/// Fit, save and predict in one pass, optionally writing an xlsx report.
pub fn run(cfg: &PipelineConfig, xlsx: Option<&Path>) -> Result<PredictionOutput> {
    let data = prepare(cfg)?;
    let model = fit(&data, cfg)?;
    model.save(&cfg.paths.model_path())?;

    let aliases = load_aliases(cfg)?;
    let unavailable = load_unavailable(cfg, &aliases)?;
    let out = predict(&model, &data, &unavailable, cfg)?;
    write_outputs(&out, cfg)?;

    if let Some(path) = xlsx {
        let summary = report::write_workbook(path, &model, &out.rows, &out.teams)?;
        tracing::info!(
            path = %path.display(),
            predictions = summary.predictions,
            teams = summary.teams,
            coefficients = summary.coefficients,
            "wrote report workbook"
        );
    }
    Ok(out)
}
