use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

const MAX_NEWTON_ITERS: usize = 100;
const NEWTON_TOL: f64 = 1e-9;
const LINE_SEARCH_STEPS: usize = 20;
const LL_SLACK: f64 = 1e-12;
/// Singular values below this fraction of the largest are dropped.
const SVD_REL_EPS: f64 = 1e-10;

/// Disjoint train/test row indices covering every row once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Seeded random partition; the test side gets `ceil(n * test_fraction)` rows.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> TrainingSplit {
    let mut idx = (0..n).collect::<Vec<_>>();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);

    let mut n_test = ((n as f64) * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    if n >= 2 {
        n_test = n_test.clamp(1, n - 1);
    } else {
        n_test = 0;
    }
    let mut test = idx.split_off(n - n_test);
    let mut train = idx;
    train.sort_unstable();
    test.sort_unstable();
    TrainingSplit { train, test }
}

/// Intercept plus one slope per predictor column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCoefficients {
    pub intercept: f64,
    pub slopes: Vec<f64>,
}

impl LinearCoefficients {
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .slopes
                .iter()
                .zip(x)
                .map(|(b, v)| b * v)
                .sum::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticFit {
    pub coefficients: LinearCoefficients,
    pub iterations: usize,
    pub converged: bool,
}

impl LogisticFit {
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.coefficients.predict(x))
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

fn design_matrix(x: &[Vec<f64>]) -> DMatrix<f64> {
    let cols = x.first().map(|r| r.len()).unwrap_or(0) + 1;
    DMatrix::from_fn(x.len(), cols, |i, j| if j == 0 { 1.0 } else { x[i][j - 1] })
}

fn split_coefficients(beta: &DVector<f64>) -> LinearCoefficients {
    LinearCoefficients {
        intercept: beta[0],
        slopes: beta.iter().skip(1).copied().collect(),
    }
}

/// Ordinary least squares via SVD, so collinear predictors get the
/// minimum-norm solution instead of failing.
pub fn fit_least_squares(x: &[Vec<f64>], y: &[f64]) -> Result<LinearCoefficients> {
    if x.len() < 2 || x.len() != y.len() {
        return Err(PipelineError::SingularFit {
            model: "magnitude",
            reason: format!("{} rows for {} targets", x.len(), y.len()),
        }
        .into());
    }
    let a = design_matrix(x);
    let b = DVector::from_column_slice(y);
    let svd = a.svd(true, true);
    let eps = svd.singular_values.max() * SVD_REL_EPS;
    let beta = svd.solve(&b, eps).map_err(|reason| PipelineError::SingularFit {
        model: "magnitude",
        reason: reason.to_string(),
    })?;
    Ok(split_coefficients(&beta))
}

fn penalized_log_likelihood(a: &DMatrix<f64>, y: &[bool], beta: &DVector<f64>, l2: f64) -> f64 {
    let eta = a * beta;
    let mut ll = 0.0;
    for (e, &label) in eta.iter().zip(y) {
        ll -= if label { softplus(-e) } else { softplus(*e) };
    }
    let penalty = beta.iter().skip(1).map(|b| b * b).sum::<f64>();
    ll - 0.5 * l2 * penalty
}

/// Logistic regression by Newton/IRLS with an L2 penalty on the slopes.
pub fn fit_logistic(x: &[Vec<f64>], y: &[bool], l2: f64) -> Result<LogisticFit> {
    let positives = y.iter().filter(|v| **v).count();
    if x.len() != y.len() || positives == 0 || positives == y.len() {
        return Err(PipelineError::SingularFit {
            model: "indicator",
            reason: format!("need both classes, got {positives} positive of {}", y.len()),
        }
        .into());
    }

    let a = design_matrix(x);
    let k = a.ncols();
    let mut beta = DVector::<f64>::zeros(k);
    let mut ll = penalized_log_likelihood(&a, y, &beta, l2);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..MAX_NEWTON_ITERS {
        iterations = iter + 1;
        let eta = &a * &beta;
        let p = eta.map(sigmoid);
        let resid = DVector::from_iterator(
            y.len(),
            y.iter().zip(p.iter()).map(|(&t, pi)| f64::from(u8::from(t)) - pi),
        );

        let mut weighted = a.clone();
        for (i, mut row) in weighted.row_iter_mut().enumerate() {
            row *= p[i] * (1.0 - p[i]);
        }
        let mut info = a.transpose() * weighted;
        let mut grad = a.transpose() * resid;
        for j in 1..k {
            info[(j, j)] += l2;
            grad[j] -= l2 * beta[j];
        }

        if grad.norm() < NEWTON_TOL {
            converged = true;
            break;
        }

        let delta = match info.clone().lu().solve(&grad) {
            Some(d) => d,
            None => {
                let mut ridged = info;
                for j in 0..k {
                    ridged[(j, j)] += l2.max(1e-6) * 10.0;
                }
                match ridged.lu().solve(&grad) {
                    Some(d) => d,
                    None => {
                        return Err(PipelineError::SingularFit {
                            model: "indicator",
                            reason: "information matrix is singular".to_string(),
                        }
                        .into());
                    }
                }
            }
        };

        let mut step = 1.0;
        let mut accepted = false;
        for _ in 0..LINE_SEARCH_STEPS {
            let candidate = &beta + step * &delta;
            let cand_ll = penalized_log_likelihood(&a, y, &candidate, l2);
            // Rounding noise near the optimum must not reject a full step.
            if cand_ll >= ll - LL_SLACK * ll.abs().max(1.0) {
                beta = candidate;
                ll = cand_ll;
                accepted = true;
                break;
            }
            step *= 0.5;
        }
        if !accepted {
            converged = grad.norm() < NEWTON_TOL.sqrt();
            break;
        }
        if step * delta.norm() < NEWTON_TOL {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(iterations, "logistic fit stopped before convergence");
    }
    Ok(LogisticFit {
        coefficients: split_coefficients(&beta),
        iterations,
        converged,
    })
}
