//! Weighted evaluation metrics for regression and classification scores.

const PROB_EPS: f64 = 1e-15;

/// Weighted mean squared error (`l2`).
pub fn weighted_l2(y: &[f64], pred: &[f64], weight: &[f64]) -> f64 {
    weighted_mean(y.iter().zip(pred).zip(weight).map(|((&t, &p), &w)| {
        let diff = t - p;
        (diff * diff, w)
    }))
}

/// Weighted binary log loss; `prob` holds `P(y = 1)`.
pub fn binary_logloss(y: &[f64], prob: &[f64], weight: &[f64]) -> f64 {
    weighted_mean(y.iter().zip(prob).zip(weight).map(|((&t, &p), &w)| {
        let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
        let loss = if t > 0.5 { -p.ln() } else { -(1.0 - p).ln() };
        (loss, w)
    }))
}

/// Weighted multi-class log loss; `y` holds class indices and `probs` one row per record.
pub fn multi_logloss(y: &[f64], probs: &[Vec<f64>], weight: &[f64]) -> f64 {
    weighted_mean(y.iter().zip(probs).zip(weight).map(|((&t, row), &w)| {
        let p = row
            .get(t as usize)
            .copied()
            .unwrap_or(0.0)
            .clamp(PROB_EPS, 1.0);
        (-p.ln(), w)
    }))
}

/// Weighted mean of `target`; `None` when the total weight is not positive.
pub fn weighted_mean_target(y: &[f64], weight: &[f64]) -> Option<f64> {
    let total: f64 = weight.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    Some(y.iter().zip(weight).map(|(&t, &w)| t * w).sum::<f64>() / total)
}

fn weighted_mean(items: impl Iterator<Item = (f64, f64)>) -> f64 {
    let mut sum = 0.0f64;
    let mut total = 0.0f64;
    for (value, w) in items {
        sum += value * w;
        total += w;
    }
    if total == 0.0 { 0.0 } else { sum / total }
}
