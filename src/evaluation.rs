use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub r2: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMetrics {
    pub samples: usize,
    #[serde(default)]
    pub auc: Option<f64>,
    pub brier: f64,
    pub log_loss: f64,
}

/// Coefficient of determination; 0 when `actual` has no spread.
pub fn r_squared(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot = actual.iter().map(|a| (a - mean).powi(2)).sum::<f64>();
    if ss_tot <= 0.0 {
        return 0.0;
    }
    let ss_res = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (a - p).powi(2))
        .sum::<f64>();
    1.0 - ss_res / ss_tot
}

pub fn evaluate_regression(predicted: &[f64], actual: &[f64]) -> RegressionMetrics {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return RegressionMetrics::default();
    }
    let n = predicted.len() as f64;
    let mse = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (a - p).powi(2))
        .sum::<f64>()
        / n;
    RegressionMetrics {
        samples: predicted.len(),
        r2: r_squared(predicted, actual),
        rmse: mse.sqrt(),
    }
}

/// Area under the ROC curve via the rank-sum statistic, ties sharing the
/// average rank. `None` unless both classes are present.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    if scores.len() != labels.len() {
        return None;
    }
    let n_pos = labels.iter().filter(|l| **l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; positions i..=j share their average.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos_f = n_pos as f64;
    Some((rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}

pub fn evaluate_classifier(probs: &[f64], labels: &[bool]) -> ClassifierMetrics {
    if probs.is_empty() || probs.len() != labels.len() {
        return ClassifierMetrics::default();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    for (&p, &label) in probs.iter().zip(labels) {
        let y = if label { 1.0 } else { 0.0 };
        brier_sum += (p - y).powi(2);
        let actual_prob = (if label { p } else { 1.0 - p }).clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();
    }

    let n = probs.len() as f64;
    ClassifierMetrics {
        samples: probs.len(),
        auc: roc_auc(probs, labels),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
    }
}
