//! Log-linear growth-rate estimator.
//!
//! Default `GrowthRateSource`: least-squares slope of `ln(OD)` against time
//! over the curve that just ended, in 1/h.

use evolver_traits::{Channel, GrowthRateSource, LogStore};
use tracing::debug;

use crate::records::{self, GrowthRateSample, OdSample};

/// Fewest usable samples for a fit.
pub const MIN_FIT_SAMPLES: usize = 3;

/// Slope of the least-squares line through `points` (x, y).
pub fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return None;
    }
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for &(x, y) in points {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    slope.is_finite().then_some(slope)
}

#[derive(Debug, Clone)]
pub struct LogLinearGrowth {
    max_samples: usize,
}

impl Default for LogLinearGrowth {
    fn default() -> Self {
        Self { max_samples: 500 }
    }
}

impl LogLinearGrowth {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(MIN_FIT_SAMPLES),
        }
    }

    /// Rate over the samples in `[start, end]`, ignoring non-positive ODs.
    pub fn fit(samples: &[OdSample], start: f64, end: f64) -> Option<f64> {
        let points: Vec<(f64, f64)> = samples
            .iter()
            .filter(|s| s.time >= start && s.time <= end && s.od > 0.0 && s.od.is_finite())
            .map(|s| (s.time, s.od.ln()))
            .collect();
        if points.len() < MIN_FIT_SAMPLES {
            return None;
        }
        least_squares_slope(&points)
    }
}

impl GrowthRateSource for LogLinearGrowth {
    fn curve_completed(
        &mut self,
        store: &mut dyn LogStore,
        vessel: usize,
        start: f64,
        end: f64,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>> {
        let samples: Vec<OdSample> = records::read_tail(&*store, vessel, Channel::Od, self.max_samples)?;
        let Some(rate) = Self::fit(&samples, start, end) else {
            debug!(vessel, start, end, "too few samples to fit growth curve");
            return Ok(None);
        };
        records::append(
            store,
            vessel,
            Channel::GrowthRate,
            &GrowthRateSample { time: end, rate },
        )?;
        Ok(Some(rate))
    }
}
