//! Seasonal-trend decomposition by LOESS.
//!
//! A direct implementation of the Cleveland et al. (1990) procedure: repeated
//! cycle-subseries smoothing, a low-pass filter, and trend smoothing, with an
//! outer loop of bisquare robustness weights. Every smoother here is a local
//! linear fit with tricube weights.

use anyhow::{bail, Result};

/// Smoother spans and iteration counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StlParams {
    pub period: usize,
    pub seasonal: usize,
    pub trend: usize,
    pub low_pass: usize,
    pub inner: usize,
    pub outer: usize,
}

impl StlParams {
    /// Robust settings for a series with the given period: seasonal span 7,
    /// trend and low-pass spans derived from the period the usual way, two
    /// inner passes and fifteen robustness iterations.
    pub fn robust(period: usize) -> Self {
        let seasonal = 7;
        let trend = next_odd(
            (1.5 * period as f64 / (1.0 - 1.5 / seasonal as f64)).ceil() as usize,
        );
        let low_pass = next_odd(period + 1);
        Self {
            period,
            seasonal,
            trend,
            low_pass,
            inner: 2,
            outer: 15,
        }
    }
}

fn next_odd(x: usize) -> usize {
    if x % 2 == 0 {
        x + 1
    } else {
        x
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub resid: Vec<f64>,
}

/// Decomposes `y` into trend, seasonal and remainder.
///
/// Needs at least two full periods of finite values.
pub fn decompose(y: &[f64], params: &StlParams) -> Result<Decomposition> {
    let n = y.len();
    let np = params.period;
    if np < 2 {
        bail!("STL period must be at least 2, got {}", np);
    }
    if n < 2 * np {
        bail!("STL needs at least {} observations, got {}", 2 * np, n);
    }
    if params.seasonal < 3 || params.trend < 3 || params.low_pass < 3 {
        bail!("STL smoother spans must be at least 3: {:?}", params);
    }
    if y.iter().any(|v| !v.is_finite()) {
        bail!("STL input contains non-finite values");
    }

    let mut trend = vec![0.0; n];
    let mut seasonal = vec![0.0; n];

    inner_loop(y, params, None, &mut trend, &mut seasonal);
    for _ in 0..params.outer {
        let fit: Vec<f64> = trend.iter().zip(&seasonal).map(|(t, s)| t + s).collect();
        let weights = robustness_weights(y, &fit);
        inner_loop(y, params, Some(&weights), &mut trend, &mut seasonal);
    }

    let resid = y
        .iter()
        .zip(trend.iter().zip(&seasonal))
        .map(|(v, (t, s))| v - t - s)
        .collect();
    Ok(Decomposition {
        trend,
        seasonal,
        resid,
    })
}

fn inner_loop(
    y: &[f64],
    params: &StlParams,
    weights: Option<&[f64]>,
    trend: &mut [f64],
    seasonal: &mut [f64],
) {
    let n = y.len();
    let np = params.period;

    for _ in 0..params.inner {
        let detrended: Vec<f64> = y.iter().zip(trend.iter()).map(|(v, t)| v - t).collect();
        let cycle = cycle_subseries(&detrended, np, params.seasonal, weights);

        let low = moving_average(&cycle, np);
        let low = moving_average(&low, np);
        let low = moving_average(&low, 3);
        let low = loess(&low, params.low_pass, None);

        for i in 0..n {
            seasonal[i] = cycle[np + i] - low[i];
        }
        let deseasonalized: Vec<f64> = y.iter().zip(seasonal.iter()).map(|(v, s)| v - s).collect();
        let smoothed = loess(&deseasonalized, params.trend, weights);
        trend.copy_from_slice(&smoothed);
    }
}

/// Smooths each cycle-subseries and extends it by one period on both ends.
/// The result has `n + 2 * np` values; index `np + i` lines up with `y[i]`.
fn cycle_subseries(y: &[f64], np: usize, span: usize, weights: Option<&[f64]>) -> Vec<f64> {
    let n = y.len();
    let mut out = vec![0.0; n + 2 * np];

    for j in 0..np {
        let sub: Vec<f64> = y.iter().skip(j).step_by(np).copied().collect();
        let sub_w: Option<Vec<f64>> =
            weights.map(|w| w.iter().skip(j).step_by(np).copied().collect());
        let m = sub.len();
        if m == 0 {
            continue;
        }

        let smoothed = loess(&sub, span, sub_w.as_deref());

        let right = span.min(m);
        let before = local_fit(&sub, sub_w.as_deref(), 0.0, 1, right, span).unwrap_or(smoothed[0]);
        let left = if span >= m { 1 } else { m - span + 1 };
        let after = local_fit(&sub, sub_w.as_deref(), (m + 1) as f64, left, m, span)
            .unwrap_or(smoothed[m - 1]);

        out[j] = before;
        for (k, v) in smoothed.iter().enumerate() {
            out[j + (k + 1) * np] = *v;
        }
        out[j + (m + 1) * np] = after;
    }
    out
}

/// LOESS evaluated at every point `1..=n` of `y`.
fn loess(y: &[f64], span: usize, weights: Option<&[f64]>) -> Vec<f64> {
    let n = y.len();
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }
    let half = (span + 1) / 2;

    for (idx, slot) in out.iter_mut().enumerate() {
        let i = idx + 1;
        let (left, right) = if span >= n {
            (1, n)
        } else if i < half {
            (1, span)
        } else if i >= n - half + 1 {
            (n - span + 1, n)
        } else {
            (i - half + 1, span + i - half)
        };
        *slot = local_fit(y, weights, i as f64, left, right, span).unwrap_or(y[idx]);
    }
    out
}

/// Weighted local linear fit at position `x` (1-based) over `left..=right`.
/// Returns `None` when every weight in the neighbourhood is zero.
fn local_fit(
    y: &[f64],
    weights: Option<&[f64]>,
    x: f64,
    left: usize,
    right: usize,
    span: usize,
) -> Option<f64> {
    let n = y.len();
    let range = n as f64 - 1.0;
    let mut h = (x - left as f64).max(right as f64 - x);
    if span > n {
        h += ((span - n) / 2) as f64;
    }
    let h9 = 0.999 * h;
    let h1 = 0.001 * h;

    let mut w = vec![0.0; right - left + 1];
    let mut total = 0.0;
    for (slot, j) in w.iter_mut().zip(left..=right) {
        let r = (j as f64 - x).abs();
        if r <= h9 {
            let mut wj = if r <= h1 {
                1.0
            } else {
                (1.0 - (r / h).powi(3)).powi(3)
            };
            if let Some(rw) = weights {
                wj *= rw[j - 1];
            }
            *slot = wj;
            total += wj;
        }
    }
    if total <= 0.0 {
        return None;
    }
    for wj in w.iter_mut() {
        *wj /= total;
    }

    if h > 0.0 {
        let center: f64 = w.iter().zip(left..=right).map(|(wj, j)| wj * j as f64).sum();
        let spread: f64 = w
            .iter()
            .zip(left..=right)
            .map(|(wj, j)| wj * (j as f64 - center).powi(2))
            .sum();
        if spread.sqrt() > 0.001 * range {
            let slope = (x - center) / spread;
            for (wj, j) in w.iter_mut().zip(left..=right) {
                *wj *= slope * (j as f64 - center) + 1.0;
            }
        }
    }

    Some(w.iter().zip(&y[left - 1..right]).map(|(wj, v)| wj * v).sum())
}

fn moving_average(x: &[f64], len: usize) -> Vec<f64> {
    if len == 0 || x.len() < len {
        return Vec::new();
    }
    x.windows(len)
        .map(|w| w.iter().sum::<f64>() / len as f64)
        .collect()
}

/// Bisquare weights on `|y - fit|` scaled by six median absolute residuals.
fn robustness_weights(y: &[f64], fit: &[f64]) -> Vec<f64> {
    let r: Vec<f64> = y.iter().zip(fit).map(|(v, f)| (v - f).abs()).collect();
    let mut sorted = r.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    let h = 6.0 * median;

    // An exact fit leaves only rounding noise; weighting on it would zero out
    // most of the series.
    let scale = y.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())).max(1.0);
    if h <= 1e-9 * scale {
        return vec![1.0; y.len()];
    }

    let c9 = 0.999 * h;
    let c1 = 0.001 * h;
    r.iter()
        .map(|&ri| {
            if ri <= c1 {
                1.0
            } else if ri <= c9 {
                (1.0 - (ri / h).powi(2)).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}
