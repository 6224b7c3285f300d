//! Per-iteration request parameter generation.
//!
//! Strategies are stateless; each virtual user passes its own RNG, so one
//! workload instance is shared by every VU without synchronization.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::RangeInclusive;

use crate::error::ConfigError;

/// What one iteration should request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestParams {
    /// Caller identity, sent as a header by scenarios that need one.
    pub user_id: Option<u64>,
    /// The resource being requested (coupon or product id).
    pub target_id: u64,
}

pub trait Workload: Debug + Send + Sync {
    fn next(&self, vu_id: u64, rng: &mut dyn RngCore) -> RequestParams;
}

/// Inclusive id range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    pub fn new(start: u64, end: u64) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidValue {
                field: "id range",
                reason: format!("start {} is greater than end {}", start, end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn as_range(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }

    pub fn contains(&self, id: u64) -> bool {
        self.as_range().contains(&id)
    }
}

/// Fixed target with a per-VU identity plus random jitter.
///
/// `user_id = (vu_id % base_modulo) + 1 + uniform(0..=jitter_max) * multiplier`.
/// Identities repeat across iterations on purpose so the target's duplicate
/// detection gets exercised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformJitter {
    pub target_id: u64,
    pub base_modulo: u64,
    pub jitter_max: u64,
    pub multiplier: u64,
}

impl UniformJitter {
    pub fn new(target_id: u64) -> Self {
        Self {
            target_id,
            base_modulo: 10_000,
            jitter_max: 10,
            multiplier: 10_000,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_modulo == 0 {
            return Err(ConfigError::InvalidValue {
                field: "base_modulo",
                reason: "must be greater than zero".to_string(),
            });
        }
        // largest id: (base_modulo - 1) + 1 + jitter_max * multiplier
        let largest = self
            .jitter_max
            .checked_mul(self.multiplier)
            .and_then(|spread| spread.checked_add(self.base_modulo));
        if largest.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "user_id",
                reason: format!(
                    "base_modulo {} + jitter_max {} * multiplier {} overflows a u64 user id",
                    self.base_modulo, self.jitter_max, self.multiplier
                ),
            });
        }
        Ok(())
    }
}

impl Workload for UniformJitter {
    fn next(&self, vu_id: u64, rng: &mut dyn RngCore) -> RequestParams {
        let jitter = rng.gen_range(0..=self.jitter_max);
        let user_id = (vu_id % self.base_modulo.max(1))
            .saturating_add(1)
            .saturating_add(jitter.saturating_mul(self.multiplier));
        RequestParams {
            user_id: Some(user_id),
            target_id: self.target_id,
        }
    }
}

/// Skewed target selection: a small hot set receives most of the traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Pareto {
    pub hot: IdRange,
    pub cold: IdRange,
    pub hot_probability: f64,
}

impl Default for Pareto {
    fn default() -> Self {
        Self {
            hot: IdRange { start: 1, end: 20 },
            cold: IdRange { start: 21, end: 100 },
            hot_probability: 0.8,
        }
    }
}

impl Pareto {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.hot_probability) {
            return Err(ConfigError::InvalidValue {
                field: "hot_probability",
                reason: format!("{} is outside 0..=1", self.hot_probability),
            });
        }
        IdRange::new(self.hot.start, self.hot.end)?;
        IdRange::new(self.cold.start, self.cold.end)?;
        Ok(())
    }
}

impl Workload for Pareto {
    fn next(&self, _vu_id: u64, rng: &mut dyn RngCore) -> RequestParams {
        let range = if rng.gen::<f64>() < self.hot_probability {
            self.hot
        } else {
            self.cold
        };
        RequestParams {
            user_id: None,
            target_id: rng.gen_range(range.as_range()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pareto_hot_fraction() {
        let pareto = Pareto::default();
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 10_000;
        let mut hot = 0;
        for _ in 0..draws {
            let params = pareto.next(1, &mut rng);
            assert!((1..=100).contains(&params.target_id));
            if pareto.hot.contains(params.target_id) {
                hot += 1;
            }
        }
        let fraction = hot as f64 / draws as f64;
        assert!(
            (0.78..=0.82).contains(&fraction),
            "hot fraction {} outside 0.8 +/- 0.02",
            fraction
        );
    }

    #[test]
    fn test_pareto_extremes() {
        let mut rng = StdRng::seed_from_u64(7);
        let all_hot = Pareto {
            hot_probability: 1.0,
            ..Pareto::default()
        };
        let all_cold = Pareto {
            hot_probability: 0.0,
            ..Pareto::default()
        };
        for _ in 0..1000 {
            assert!(all_hot.next(0, &mut rng).target_id <= 20);
            assert!(all_cold.next(0, &mut rng).target_id >= 21);
        }
    }

    #[test]
    fn test_uniform_jitter_formula() {
        let workload = UniformJitter::new(1);
        let mut rng = StdRng::seed_from_u64(3);
        for vu in [0u64, 1, 9_999, 10_000, 123_456] {
            let params = workload.next(vu, &mut rng);
            let user_id = params.user_id.unwrap();
            let base = vu % 10_000 + 1;
            assert_eq!((user_id - base) % 10_000, 0);
            assert!((user_id - base) / 10_000 <= 10);
            assert_eq!(params.target_id, 1);
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let workload = UniformJitter::new(5);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for vu in 0..100 {
            assert_eq!(workload.next(vu, &mut a), workload.next(vu, &mut b));
        }
    }

    #[test]
    fn test_validation() {
        assert!(IdRange::new(5, 1).is_err());
        let bad = Pareto {
            hot_probability: 1.5,
            ..Pareto::default()
        };
        assert!(bad.validate().is_err());
        let mut jitter = UniformJitter::new(1);
        jitter.base_modulo = 0;
        assert!(jitter.validate().is_err());
    }

    #[test]
    fn test_user_id_overflow_rejected() {
        let mut jitter = UniformJitter::new(1);
        jitter.multiplier = u64::MAX;
        assert!(matches!(
            jitter.validate(),
            Err(ConfigError::InvalidValue { field: "user_id", .. })
        ));

        jitter.jitter_max = 1;
        jitter.multiplier = u64::MAX - 10_000;
        assert!(jitter.validate().is_ok());
        jitter.multiplier += 1;
        assert!(jitter.validate().is_err());

        // an unvalidated workload saturates instead of panicking
        let unchecked = UniformJitter {
            target_id: 1,
            base_modulo: 10,
            jitter_max: 10,
            multiplier: u64::MAX,
        };
        let mut rng = StdRng::seed_from_u64(11);
        for vu in 0..50 {
            assert!(unchecked.next(vu, &mut rng).user_id.is_some());
        }
    }
}
