use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::evaluation::{
    ClassifierMetrics, RegressionMetrics, evaluate_classifier, evaluate_regression,
};
use crate::game_log::COUNTING_STATS;
use crate::regression::{
    LinearCoefficients, LogisticFit, TrainingSplit, fit_least_squares, fit_logistic, sigmoid,
    train_test_split,
};
use crate::standardize::StandardizedRecord;

pub const ARTIFACT_VERSION: u32 = 1;

/// Keeps the magnitude transform finite at share 0 and share 1.
pub const SHARE_OFFSET: f64 = 0.001;

const MIN_COHORT_ROWS: usize = 4;

pub const PARTICIPATION_FEATURES: [&str; 3] = ["games_frac", "minutes_frac", "win_pct"];

/// Predictor columns in the order the coefficients are stored.
pub fn predictor_names() -> Vec<String> {
    COUNTING_STATS
        .iter()
        .map(|c| format!("z_{c}"))
        .chain(PARTICIPATION_FEATURES.iter().map(|c| c.to_string()))
        .collect()
}

pub fn predictors(row: &StandardizedRecord) -> Vec<f64> {
    let mut x = row.z.to_vec();
    x.extend([row.games_frac, row.minutes_frac, row.win_pct]);
    x
}

/// `ln((S - 0.001) / (1.001 - S))`; `None` where the log is undefined.
pub fn share_to_logit(share: f64) -> Option<f64> {
    let v = ((share - SHARE_OFFSET) / (1.0 + SHARE_OFFSET - share)).ln();
    v.is_finite().then_some(v)
}

/// `exp(y) / (1 + exp(y))`; lands `SHARE_OFFSET` below the share fed to
/// `share_to_logit`.
pub fn logit_to_share(y: f64) -> f64 {
    sigmoid(y)
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub target_season: i32,
    pub test_fraction: f64,
    pub magnitude_seed: u64,
    pub indicator_seed: u64,
    pub logistic_l2: f64,
    pub overfit_margin: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub magnitude_train: RegressionMetrics,
    pub magnitude_test: RegressionMetrics,
    pub indicator_train: ClassifierMetrics,
    pub indicator_test: ClassifierMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePrediction {
    pub p_vote: f64,
    pub magnitude: f64,
}

impl StagePrediction {
    pub fn expected_share(&self) -> f64 {
        self.p_vote * self.magnitude
    }
}

/// Fitted magnitude and indicator stages. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoStageModel {
    pub version: u32,
    pub generated_at: String,
    pub target_season: i32,
    pub predictors: Vec<String>,
    pub magnitude: LinearCoefficients,
    pub indicator: LogisticFit,
    #[serde(default)]
    pub evaluation: ModelEvaluation,
}

impl TwoStageModel {
    pub fn predict(&self, row: &StandardizedRecord) -> StagePrediction {
        let x = predictors(row);
        StagePrediction {
            p_vote: self.indicator.predict_proba(&x),
            magnitude: logit_to_share(self.magnitude.predict(&x)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(self).context("serialize model artifact")?;
        fs::write(&tmp, raw).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let model: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse model artifact {}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(anyhow!(
                "model artifact version {} (expected {})",
                self.version,
                ARTIFACT_VERSION
            ));
        }
        let expected = predictor_names();
        if self.predictors != expected {
            return Err(anyhow!(
                "model predictors {:?} do not match this build's {:?}",
                self.predictors,
                expected
            ));
        }
        let k = expected.len();
        if self.magnitude.slopes.len() != k || self.indicator.coefficients.slopes.len() != k {
            return Err(anyhow!("model coefficient count does not match {k} predictors"));
        }
        Ok(())
    }
}

fn require_rows(cohort: &'static str, rows: usize) -> Result<()> {
    if rows < MIN_COHORT_ROWS {
        return Err(PipelineError::EmptyCohort {
            cohort,
            rows,
            needed: MIN_COHORT_ROWS,
        }
        .into());
    }
    Ok(())
}

struct MagnitudeFit {
    coefficients: LinearCoefficients,
    train: RegressionMetrics,
    test: RegressionMetrics,
}

/// Linear fit of the transformed share on vote-getters.
fn fit_magnitude(rows: &[StandardizedRecord], opts: &FitOptions) -> Result<MagnitudeFit> {
    let mut x = Vec::with_capacity(rows.len());
    let mut y = Vec::with_capacity(rows.len());
    let mut share = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(t) = share_to_logit(row.share) else {
            tracing::warn!(
                player = %row.player_name,
                season = row.season,
                share = row.share,
                "share too small for the magnitude transform; skipped"
            );
            continue;
        };
        x.push(predictors(row));
        y.push(t);
        share.push(row.share);
    }
    require_rows("magnitude", x.len())?;

    let TrainingSplit { train, test } =
        train_test_split(x.len(), opts.test_fraction, opts.magnitude_seed);
    let pick = |idx: &[usize], v: &[f64]| idx.iter().map(|&i| v[i]).collect::<Vec<_>>();
    let train_x = train.iter().map(|&i| x[i].clone()).collect::<Vec<_>>();
    let coefficients = fit_least_squares(&train_x, &pick(&train, &y))?;

    let score = |idx: &[usize]| {
        let predicted = idx
            .iter()
            .map(|&i| logit_to_share(coefficients.predict(&x[i])))
            .collect::<Vec<_>>();
        evaluate_regression(&predicted, &pick(idx, &share))
    };
    let train_metrics = score(&train);
    let test_metrics = score(&test);
    Ok(MagnitudeFit {
        coefficients,
        train: train_metrics,
        test: test_metrics,
    })
}

struct IndicatorFit {
    fit: LogisticFit,
    train: ClassifierMetrics,
    test: ClassifierMetrics,
}

/// Logistic fit of "received any vote" on the full eligible population.
fn fit_indicator(rows: &[StandardizedRecord], opts: &FitOptions) -> Result<IndicatorFit> {
    require_rows("indicator", rows.len())?;
    let x = rows.iter().map(predictors).collect::<Vec<_>>();
    let y = rows.iter().map(StandardizedRecord::has_vote).collect::<Vec<_>>();

    let TrainingSplit { train, test } =
        train_test_split(rows.len(), opts.test_fraction, opts.indicator_seed);
    let train_x = train.iter().map(|&i| x[i].clone()).collect::<Vec<_>>();
    let train_y = train.iter().map(|&i| y[i]).collect::<Vec<_>>();
    let fit = fit_logistic(&train_x, &train_y, opts.logistic_l2)?;

    let score = |idx: &[usize]| {
        let probs = idx
            .iter()
            .map(|&i| fit.predict_proba(&x[i]))
            .collect::<Vec<_>>();
        let labels = idx.iter().map(|&i| y[i]).collect::<Vec<_>>();
        evaluate_classifier(&probs, &labels)
    };
    let train_metrics = score(&train);
    let test_metrics = score(&test);
    Ok(IndicatorFit {
        fit,
        train: train_metrics,
        test: test_metrics,
    })
}

/// Fits both stages on their own cohorts and splits.
pub fn fit_two_stage(
    magnitude_rows: &[StandardizedRecord],
    indicator_rows: &[StandardizedRecord],
    opts: &FitOptions,
) -> Result<TwoStageModel> {
    for row in magnitude_rows.iter().chain(indicator_rows) {
        if row.season == opts.target_season {
            return Err(anyhow!(
                "training cohort contains target season {} ({})",
                opts.target_season,
                row.player_name
            ));
        }
    }

    let magnitude = fit_magnitude(magnitude_rows, opts).context("fit magnitude stage")?;
    let indicator = fit_indicator(indicator_rows, opts).context("fit indicator stage")?;

    let evaluation = ModelEvaluation {
        magnitude_train: magnitude.train,
        magnitude_test: magnitude.test,
        indicator_train: indicator.train,
        indicator_test: indicator.test,
    };
    log_evaluation(&evaluation, opts.overfit_margin);

    Ok(TwoStageModel {
        version: ARTIFACT_VERSION,
        generated_at: chrono::Utc::now().to_rfc3339(),
        target_season: opts.target_season,
        predictors: predictor_names(),
        magnitude: magnitude.coefficients,
        indicator: indicator.fit,
        evaluation,
    })
}

fn log_evaluation(eval: &ModelEvaluation, overfit_margin: f64) {
    tracing::info!(
        train_rows = eval.magnitude_train.samples,
        test_rows = eval.magnitude_test.samples,
        r2_train = eval.magnitude_train.r2,
        r2_test = eval.magnitude_test.r2,
        "magnitude stage fit"
    );
    tracing::info!(
        train_rows = eval.indicator_train.samples,
        test_rows = eval.indicator_test.samples,
        auc_train = ?eval.indicator_train.auc,
        auc_test = ?eval.indicator_test.auc,
        log_loss_test = eval.indicator_test.log_loss,
        "indicator stage fit"
    );

    if eval.magnitude_test.r2 < eval.magnitude_train.r2 - overfit_margin {
        tracing::warn!(
            r2_train = eval.magnitude_train.r2,
            r2_test = eval.magnitude_test.r2,
            "magnitude stage scores worse out of sample"
        );
    }
    if let (Some(train), Some(test)) = (eval.indicator_train.auc, eval.indicator_test.auc) {
        if test < train - overfit_margin {
            tracing::warn!(
                auc_train = train,
                auc_test = test,
                "indicator stage scores worse out of sample"
            );
        }
    }
}
