use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use allnba_share::config::PipelineConfig;
use allnba_share::features::{EligibilityThresholds, build_feature_table};
use allnba_share::game_log::derive_team_games;
use allnba_share::labels::AliasTable;
use allnba_share::pipeline;
use allnba_share::reconstruct::{LEAGUE_SHARE_TOTAL, RESCALE_ITERATIONS, combine, rescale_to_target};
use allnba_share::standardize::standardize_cohort;

#[path = "../tests/common/mod.rs"]
mod common;

const SEASONS: [i32; 4] = [2021, 2022, 2023, 2024];

fn config() -> PipelineConfig {
    PipelineConfig {
        target_season: Some(2024),
        ..PipelineConfig::default()
    }
}

fn prepared() -> pipeline::PreparedData {
    let logs = common::synthetic_logs(&SEASONS);
    let team_games = derive_team_games(&logs);
    let labels = SEASONS[..3]
        .iter()
        .flat_map(|&s| common::synthetic_labels(s))
        .collect::<Vec<_>>();
    pipeline::prepare_from(&logs, &team_games, &labels, &AliasTable::default(), &config())
        .expect("synthetic data should prepare")
}

fn bench_feature_table(c: &mut Criterion) {
    let logs = common::synthetic_logs(&SEASONS);
    let team_games = derive_team_games(&logs);
    c.bench_function("feature_table", |b| {
        b.iter(|| {
            let (rows, _) = build_feature_table(
                black_box(&logs),
                &team_games,
                EligibilityThresholds::default(),
            )
            .unwrap();
            black_box(rows.len());
        })
    });
}

fn bench_two_stage_fit(c: &mut Criterion) {
    let data = prepared();
    let cfg = config();
    c.bench_function("two_stage_fit", |b| {
        b.iter(|| {
            let model = pipeline::fit(black_box(&data), &cfg).unwrap();
            black_box(model.magnitude.intercept);
        })
    });
}

fn bench_rescale(c: &mut Criterion) {
    let data = prepared();
    let model = pipeline::fit(&data, &config()).unwrap();
    let population = standardize_cohort(&data.rows, "prediction").unwrap();
    let rows = combine(&model, &population.records);
    c.bench_function("rescale_to_target", |b| {
        b.iter(|| {
            let out = rescale_to_target(black_box(&rows), LEAGUE_SHARE_TOTAL, RESCALE_ITERATIONS);
            black_box(out.len());
        })
    });
}

criterion_group!(perf, bench_feature_table, bench_two_stage_fit, bench_rescale);
criterion_main!(perf);
