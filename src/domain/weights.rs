//! Inverse-correlation position weights.
//!
//! For `n >= 2` symbols with usable return series:
//!
//! 1. all series are truncated to their common most-recent length `m`
//! 2. `rho_ij` is the Pearson correlation of the truncated returns
//! 3. `avg_i = mean(|rho_ij|)` over `j != i`
//! 4. `raw_i = 1 / (1 + avg_i)`, then `w_i = raw_i / sum(raw)`
//!
//! Equal weights are returned when `m < 2` or any truncated series has zero
//! variance. A single symbol always gets weight 1.

use std::collections::BTreeMap;

const VARIANCE_EPSILON: f64 = 1e-18;

/// Simple percentage returns of the last `lookback` closes.
pub fn returns_from_closes(closes: &[f64], lookback: usize) -> Vec<f64> {
    let start = closes.len().saturating_sub(lookback.saturating_add(1));
    closes[start..]
        .windows(2)
        .filter_map(|pair| {
            let (prev, curr) = (pair[0], pair[1]);
            (prev != 0.0).then(|| (curr - prev) / prev)
        })
        .filter(|r| r.is_finite())
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Pearson correlation; `None` when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma) * (x - ma);
        vb += (y - mb) * (y - mb);
    }
    if va <= VARIANCE_EPSILON || vb <= VARIANCE_EPSILON {
        return None;
    }
    Some((cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0))
}

fn equal_weights(symbols: impl Iterator<Item = String>) -> BTreeMap<String, f64> {
    let symbols: Vec<String> = symbols.collect();
    let w = 1.0 / symbols.len() as f64;
    symbols.into_iter().map(|s| (s, w)).collect()
}

pub fn compute_correlation_weights(
    returns_by_symbol: &BTreeMap<String, Vec<f64>>,
) -> BTreeMap<String, f64> {
    match returns_by_symbol.len() {
        0 => return BTreeMap::new(),
        1 => return returns_by_symbol.keys().map(|k| (k.clone(), 1.0)).collect(),
        _ => {}
    }

    let common = returns_by_symbol.values().map(Vec::len).min().unwrap_or(0);
    if common < 2 {
        return equal_weights(returns_by_symbol.keys().cloned());
    }

    let truncated: Vec<(&String, &[f64])> = returns_by_symbol
        .iter()
        .map(|(symbol, rets)| (symbol, &rets[rets.len() - common..]))
        .collect();

    if truncated
        .iter()
        .any(|(_, rets)| variance(rets) <= VARIANCE_EPSILON)
    {
        return equal_weights(returns_by_symbol.keys().cloned());
    }

    let n = truncated.len();
    let mut abs_corr_sum = vec![0.0; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let rho = pearson(truncated[i].1, truncated[j].1).unwrap_or(0.0).abs();
            abs_corr_sum[i] += rho;
            abs_corr_sum[j] += rho;
        }
    }

    let raw: Vec<f64> = abs_corr_sum
        .iter()
        .map(|sum| 1.0 / (1.0 + sum / (n - 1) as f64))
        .collect();
    let total: f64 = raw.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return equal_weights(returns_by_symbol.keys().cloned());
    }

    truncated
        .iter()
        .zip(raw)
        .map(|((symbol, _), r)| ((*symbol).clone(), r / total))
        .collect()
}
