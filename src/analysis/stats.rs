//! Descriptive statistics over speed and latency samples.

use serde::Serialize;

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Middle order statistic; the average of the two central values for even
/// counts.
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn min(samples: &[f64]) -> f64 {
    samples.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

pub fn max(samples: &[f64]) -> f64 {
    samples.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

/// Population variance.
pub fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let avg = mean(samples);
    samples.iter().map(|&x| (x - avg).powi(2)).sum::<f64>() / samples.len() as f64
}

/// Three-point centered moving average. Endpoints are kept as-is.
pub fn smooth(samples: &[f64]) -> Vec<f64> {
    if samples.len() < 3 {
        return samples.to_vec();
    }
    let last = samples.len() - 1;
    (0..samples.len())
        .map(|i| {
            if i == 0 || i == last {
                samples[i]
            } else {
                (samples[i - 1] + samples[i] + samples[i + 1]) / 3.0
            }
        })
        .collect()
}

/// Standard deviation as a percentage of the mean. `None` when the mean is
/// not positive.
pub fn coefficient_of_variation(variance: f64, mean: f64) -> Option<f64> {
    if mean > 0.0 && variance >= 0.0 {
        Some(variance.sqrt() / mean * 100.0)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub variance: f64,
}

pub fn summarize(samples: &[f64]) -> Summary {
    Summary {
        mean: mean(samples),
        median: median(samples),
        min: min(samples),
        max: max(samples),
        variance: variance(samples),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_all_zero() {
        assert_eq!(summarize(&[]), Summary::default());
        assert!(smooth(&[]).is_empty());
    }

    #[test]
    fn median_interpolates_even_counts() {
        assert_eq!(median(&[4.0, 1.0, 3.0]), 3.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn variance_is_population_variance() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&samples), 5.0);
        assert_eq!(variance(&samples), 4.0);
    }

    #[test]
    fn summary_of_speed_samples() {
        let summary = summarize(&[90.0, 110.0, 100.0, 80.0]);
        assert_eq!(summary.mean, 95.0);
        assert_eq!(summary.median, 95.0);
        assert_eq!(summary.min, 80.0);
        assert_eq!(summary.max, 110.0);
        assert_eq!(summary.variance, 125.0);
    }

    #[test]
    fn smoothing_keeps_length_and_endpoints() {
        let samples = [10.0, 40.0, 10.0, 40.0, 10.0];
        let smoothed = smooth(&samples);
        assert_eq!(smoothed.len(), samples.len());
        assert_eq!(smoothed[0], 10.0);
        assert_eq!(smoothed[4], 10.0);
        assert_eq!(smoothed[1], 20.0);
        assert_eq!(smoothed[2], 30.0);
    }

    #[test]
    fn repeated_smoothing_converges_without_oscillating() {
        let samples = vec![5.0, 95.0, 10.0, 88.0, 12.0, 90.0, 8.0, 70.0];
        let mut current = samples.clone();
        let mut prev_spread = max(&samples) - min(&samples);

        for _ in 0..50 {
            let next = smooth(&current);
            assert_eq!(next[0], samples[0]);
            assert_eq!(next[samples.len() - 1], samples[samples.len() - 1]);

            let spread = max(&next) - min(&next);
            assert!(spread <= prev_spread + 1e-9);
            prev_spread = spread;
            current = next;
        }

        let delta: f64 = smooth(&current)
            .iter()
            .zip(&current)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(delta < 1.0, "still moving by {delta}");
    }

    #[test]
    fn cv_requires_positive_mean() {
        assert_eq!(coefficient_of_variation(4.0, 80.0), Some(2.5));
        assert_eq!(coefficient_of_variation(4.0, 0.0), None);
        assert_eq!(coefficient_of_variation(4.0, -1.0), None);
    }
}
