//! The CEM sampling distribution.
//!
//! A Gaussian over flattened action sequences (`H * A`, step-major) that is
//! sampled, clipped to the action bounds, and refit from elites once per
//! CEM iteration.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use vismpc_env::ActionSequence;

use crate::config::{CovarianceStructure, PlannerConfig};
use crate::error::SampleError;

/// Jitter attempts before sampling gives up on a non-positive-definite
/// covariance.
const MAX_JITTER_ATTEMPTS: usize = 6;

/// Mean and covariance of the action-sequence Gaussian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingDistribution {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    horizon: usize,
    action_dim: usize,
}

impl SamplingDistribution {
    /// Zero mean, diagonal covariance from the per-group initial std-devs.
    pub fn initial(config: &PlannerConfig) -> Self {
        let std = config.initial_std_per_dim();
        let n = config.flat_dim();
        let variances = DVector::from_fn(n, |i, _| std[i % config.action_dim].powi(2));
        Self {
            mean: DVector::zeros(n),
            covariance: DMatrix::from_diagonal(&variances),
            horizon: config.horizon,
            action_dim: config.action_dim,
        }
    }

    /// Warm start from a previous posterior, shifted forward by one step.
    ///
    /// Steps `1..H` of the previous mean/covariance become steps `0..H-1`.
    /// The freed last step gets zero mean and the initial variances, with
    /// no correlation to the rest.
    pub fn warm_started(previous: &SamplingDistribution, config: &PlannerConfig) -> Self {
        let mut next = Self::initial(config);
        if previous.horizon != next.horizon || previous.action_dim != next.action_dim {
            tracing::warn!("previous posterior shape differs from config, ignoring warm start");
            return next;
        }

        let a = next.action_dim;
        let kept = (next.horizon - 1) * a;
        if kept == 0 {
            return next;
        }

        next.mean
            .rows_mut(0, kept)
            .copy_from(&previous.mean.rows(a, kept));
        next.covariance
            .view_mut((0, 0), (kept, kept))
            .copy_from(&previous.covariance.view((a, a), (kept, kept)));
        next
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Draws `count` sequences and clips each action dimension to
    /// `[low, high]`.
    ///
    /// The covariance is factored once; if it has lost positive
    /// definiteness, increasing diagonal jitter (starting at `jitter`) is
    /// added before giving up.
    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        count: usize,
        low: &[f64],
        high: &[f64],
        jitter: f64,
    ) -> Result<Vec<ActionSequence>, SampleError> {
        let n = self.mean.len();
        let factor = self.cholesky_factor(jitter)?;

        let samples = (0..count)
            .map(|_| {
                let z = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));
                let mut x = &self.mean + &factor * z;
                for (i, v) in x.iter_mut().enumerate() {
                    let d = i % self.action_dim;
                    *v = v.clamp(low[d], high[d]);
                }
                ActionSequence::from_flat(self.horizon, self.action_dim, &x)
            })
            .collect();

        Ok(samples)
    }

    fn cholesky_factor(&self, jitter: f64) -> Result<DMatrix<f64>, SampleError> {
        if let Some(chol) = self.covariance.clone().cholesky() {
            return Ok(chol.l());
        }

        let n = self.mean.len();
        let mut eps = jitter;
        for _ in 0..MAX_JITTER_ATTEMPTS {
            let regularized = &self.covariance + DMatrix::identity(n, n) * eps;
            if let Some(chol) = regularized.cholesky() {
                tracing::debug!(jitter = eps, "covariance regularized for sampling");
                return Ok(chol.l());
            }
            eps *= 10.0;
        }
        Err(SampleError::NotPositiveDefinite {
            attempts: MAX_JITTER_ATTEMPTS,
        })
    }

    /// Refits mean and covariance to the elite set.
    ///
    /// The covariance is the (biased) elite sample covariance, masked to
    /// the configured block structure, with its diagonal floored at
    /// `min_variance` so it never collapses to zero.
    pub fn refit(
        &mut self,
        elites: &[&ActionSequence],
        structure: CovarianceStructure,
        group_of_dim: &[usize],
        min_variance: f64,
    ) {
        if elites.is_empty() {
            return;
        }
        let n = self.mean.len();
        let count = elites.len() as f64;
        let flats: Vec<DVector<f64>> = elites.iter().map(|e| e.to_flat()).collect();

        let mut mean = DVector::zeros(n);
        for x in &flats {
            mean += x;
        }
        mean /= count;

        let mut covariance = DMatrix::zeros(n, n);
        for x in &flats {
            let d = x - &mean;
            covariance += &d * d.transpose();
        }
        covariance /= count;

        let a = self.action_dim;
        let block = |i: usize| -> usize {
            match structure {
                CovarianceStructure::Full => 0,
                CovarianceStructure::PerTimestep => i / a,
                CovarianceStructure::PerGroup => group_of_dim[i % a],
            }
        };
        for r in 0..n {
            for c in 0..n {
                if block(r) != block(c) {
                    covariance[(r, c)] = 0.0;
                }
            }
            if covariance[(r, r)] < min_variance {
                covariance[(r, r)] = min_variance;
            }
        }

        self.mean = mean;
        self.covariance = covariance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn small_config() -> PlannerConfig {
        PlannerConfig {
            horizon: 3,
            action_dim: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_distribution() {
        let config = small_config();
        let dist = SamplingDistribution::initial(&config);

        assert_eq!(dist.mean().len(), 12);
        assert_relative_eq!(dist.covariance()[(0, 0)], 0.05 * 0.05);
        assert_relative_eq!(dist.covariance()[(6, 6)], 0.02 * 0.02);
        assert_relative_eq!(dist.covariance()[(0, 1)], 0.0);
    }

    #[test]
    fn test_samples_respect_bounds() {
        let config = small_config();
        let dist = SamplingDistribution::initial(&config);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let samples = dist
            .sample(&mut rng, 500, &config.action_low, &config.action_high, 1e-6)
            .unwrap();

        assert_eq!(samples.len(), 500);
        for seq in &samples {
            for t in 0..seq.horizon() {
                let a = seq.action(t);
                for d in 0..4 {
                    assert!(a[d] >= config.action_low[d] && a[d] <= config.action_high[d]);
                }
            }
        }
    }

    #[test]
    fn test_sampling_is_seeded() {
        let config = small_config();
        let dist = SamplingDistribution::initial(&config);

        let a = dist
            .sample(&mut ChaCha8Rng::seed_from_u64(3), 4, &config.action_low, &config.action_high, 1e-6)
            .unwrap();
        let b = dist
            .sample(&mut ChaCha8Rng::seed_from_u64(3), 4, &config.action_low, &config.action_high, 1e-6)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_elites_collapse_to_floor() {
        let config = small_config();
        let mut dist = SamplingDistribution::initial(&config);
        let point = ActionSequence::from_flat(3, 4, &DVector::from_fn(12, |i, _| i as f64 * 0.001));
        let elites = vec![&point; 15];

        dist.refit(&elites, CovarianceStructure::Full, &config.group_of_dim(), 1e-6);

        assert_relative_eq!(dist.mean(), &point.to_flat(), epsilon = 1e-12);
        for r in 0..12 {
            for c in 0..12 {
                let expected = if r == c { 1e-6 } else { 0.0 };
                assert_relative_eq!(dist.covariance()[(r, c)], expected, epsilon = 1e-15);
            }
        }

        // Still sampleable after collapse.
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(dist
            .sample(&mut rng, 2, &config.action_low, &config.action_high, 1e-6)
            .is_ok());
    }

    #[test]
    fn test_indefinite_covariance_is_a_typed_error() {
        let config = small_config();
        let mut dist = SamplingDistribution::initial(&config);
        dist.covariance[(0, 0)] = -1.0;
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        let err = dist
            .sample(&mut rng, 2, &config.action_low, &config.action_high, 1e-6)
            .unwrap_err();

        assert!(matches!(
            err,
            SampleError::NotPositiveDefinite {
                attempts: MAX_JITTER_ATTEMPTS
            }
        ));
    }

    #[test]
    fn test_per_timestep_refit_decouples_steps() {
        let config = PlannerConfig {
            horizon: 2,
            action_dim: 1,
            action_groups: vec![crate::config::ActionGroup {
                name: "x".to_string(),
                dims: vec![0],
                initial_std: 0.1,
            }],
            action_low: vec![-1.0],
            action_high: vec![1.0],
            ..Default::default()
        };
        let mut dist = SamplingDistribution::initial(&config);
        let a = ActionSequence::from_flat(2, 1, &DVector::from_vec(vec![1.0, 1.0]));
        let b = ActionSequence::from_flat(2, 1, &DVector::from_vec(vec![-1.0, -1.0]));

        dist.refit(&[&a, &b], CovarianceStructure::Full, &[0], 1e-6);
        assert_relative_eq!(dist.covariance()[(0, 1)], 1.0);

        dist.refit(&[&a, &b], CovarianceStructure::PerTimestep, &[0], 1e-6);
        assert_relative_eq!(dist.covariance()[(0, 1)], 0.0);
        assert_relative_eq!(dist.covariance()[(1, 1)], 1.0);
    }

    #[test]
    fn test_per_group_refit_decouples_groups() {
        let config = small_config();
        let mut dist = SamplingDistribution::initial(&config);
        let a = ActionSequence::from_flat(3, 4, &DVector::from_element(12, 0.01));
        let b = ActionSequence::from_flat(3, 4, &DVector::from_element(12, -0.01));

        dist.refit(&[&a, &b], CovarianceStructure::PerGroup, &config.group_of_dim(), 1e-9);

        // dims 0 and 1 share the translation group, across timesteps too
        assert_relative_eq!(dist.covariance()[(0, 5)], 1e-4, epsilon = 1e-12);
        // dim 0 (translation) vs dim 2 (lift)
        assert_relative_eq!(dist.covariance()[(0, 2)], 0.0);
    }

    #[test]
    fn test_warm_start_shifts_by_one_step() {
        let config = small_config();
        let mut previous = SamplingDistribution::initial(&config);
        let elite = ActionSequence::from_flat(3, 4, &DVector::from_fn(12, |i, _| i as f64 * 0.001));
        previous.refit(&[&elite], CovarianceStructure::Full, &config.group_of_dim(), 1e-6);

        let next = SamplingDistribution::warm_started(&previous, &config);

        for i in 0..8 {
            assert_relative_eq!(next.mean()[i], previous.mean()[i + 4]);
        }
        for i in 8..12 {
            assert_relative_eq!(next.mean()[i], 0.0);
        }
        assert_relative_eq!(next.covariance()[(0, 0)], 1e-6);
        assert_relative_eq!(next.covariance()[(8, 8)], 0.05 * 0.05);
    }
}
