//! Online statistics shared by the anomaly detector.
//!
//! Hand-rolled rather than pulled from a stats crate: these are small
//! enough to keep in-tree and tuned to the detector's exact needs.

/// Running mean/variance via Welford's online algorithm.
#[derive(Debug, Clone, Default)]
pub struct WelfordStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Z-score of `x` against the current running mean/stddev, or `None`
    /// when the standard deviation is zero (no spread to score against).
    pub fn z_score(&self, x: f64) -> Option<f64> {
        let sigma = self.stddev();
        if sigma > 0.0 {
            Some((x - self.mean).abs() / sigma)
        } else {
            None
        }
    }
}

/// Quartile/IQR estimator refreshed from a snapshot of recent samples
/// every N samples.
#[derive(Debug, Clone, Default)]
pub struct QuartileStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    samples_since_refresh: u64,
}

impl QuartileStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }

    /// Refresh quartiles from a window of samples. Returns `true` if it
    /// actually recomputed, `false` if fewer than `refresh_every` new
    /// samples have accumulated since the last refresh.
    pub fn maybe_refresh(&mut self, window: &[f64], refresh_every: u64) -> bool {
        self.samples_since_refresh += 1;
        if self.samples_since_refresh < refresh_every || window.is_empty() {
            return false;
        }
        self.samples_since_refresh = 0;
        let mut sorted = window.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        self.q1 = percentile(&sorted, 0.25);
        self.median = percentile(&sorted, 0.5);
        self.q3 = percentile(&sorted, 0.75);
        true
    }

    /// IQR anomaly test: `x < Q1 - 1.5*IQR` or `x > Q3 + 1.5*IQR`.
    pub fn is_anomalous(&self, x: f64) -> bool {
        let iqr = self.iqr();
        x < self.q1 - 1.5 * iqr || x > self.q3 + 1.5 * iqr
    }
}

/// Linear-interpolated percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Exponential moving average update: `new = alpha * sample + (1 - alpha) * prev`.
pub fn ema_update(prev: f64, sample: f64, alpha: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * prev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_naive_mean_and_variance() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut w = WelfordStats::new();
        for x in xs {
            w.update(x);
        }
        assert!((w.mean() - 5.0).abs() < 1e-9);
        // sample variance of this set is 4.571428...
        assert!((w.variance() - 4.571428571428571).abs() < 1e-6);
    }

    #[test]
    fn z_score_none_when_sigma_zero() {
        let mut w = WelfordStats::new();
        w.update(5.0);
        w.update(5.0);
        assert_eq!(w.z_score(100.0), None);
    }

    #[test]
    fn quartiles_and_iqr() {
        let mut q = QuartileStats::new();
        let window: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert!(q.maybe_refresh(&window, 1));
        assert!(q.iqr() > 0.0);
        assert!(!q.is_anomalous(5.0));
        assert!(q.is_anomalous(1000.0));
    }

    #[test]
    fn ema_moves_toward_sample() {
        let updated = ema_update(0.5, 1.0, 0.1);
        assert!((updated - 0.55).abs() < 1e-9);
    }
}
