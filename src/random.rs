//! Stochastic inputs to the simulation: arrival and parking-duration delay
//! distributions, plus the Bernoulli entry decision.
//!
//! All draws go through a [`Sampler`] holding a single PRNG seeded once per
//! session, so concurrent handler tasks share one stream and a pinned seed
//! reproduces a whole run.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// A parametric delay distribution over positive durations.
///
/// The wire format is a flat object with a `type` tag, e.g.
/// `{"type": "exponential", "lambda": 0.5}`. Parameters irrelevant to the
/// selected type are ignored; missing ones default to zero and are caught
/// by [`DelayDistribution::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelayDistribution {
    Exponential {
        #[serde(default)]
        lambda: f64,
    },
    Normal {
        #[serde(default)]
        mean: f64,
        #[serde(default)]
        std_dev: f64,
    },
    Uniform {
        #[serde(default)]
        min_delay: f64,
        #[serde(default)]
        max_delay: f64,
    },
    Discrete {
        #[serde(default)]
        discrete_time: f64,
    },
    /// Any unrecognized tag. Rejected by validation; if sampled anyway it
    /// behaves like a zero-length discrete delay, which is what the
    /// zero-valued fallback amounts to.
    #[serde(other)]
    Unknown,
}

/// Errors from validating distribution parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("lambda must be between 0.1 and 1, got {0}")]
    Lambda(f64),

    #[error("mean must be between 2 and 15, got {0}")]
    Mean(f64),

    #[error("std_dev must be between 0.1 and 15, got {0}")]
    StdDev(f64),

    #[error("min_delay and max_delay must be between 2 and 15, got {min} and {max}")]
    UniformRange { min: f64, max: f64 },

    #[error("min_delay {min} must not exceed max_delay {max}")]
    UniformOrder { min: f64, max: f64 },

    #[error("discrete_time must be positive, got {0}")]
    DiscreteTime(f64),

    #[error("unknown distribution type")]
    UnknownType,

    #[error("parking_prob must be between 0 and 1, got {0}")]
    ParkingProb(f64),
}

impl DelayDistribution {
    /// Check the parameters of the selected distribution against their
    /// documented ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            DelayDistribution::Exponential { lambda } => {
                if !(0.1..=1.0).contains(&lambda) {
                    return Err(ConfigError::Lambda(lambda));
                }
            }
            DelayDistribution::Normal { mean, std_dev } => {
                if !(2.0..=15.0).contains(&mean) {
                    return Err(ConfigError::Mean(mean));
                }
                if !(0.1..=15.0).contains(&std_dev) {
                    return Err(ConfigError::StdDev(std_dev));
                }
            }
            DelayDistribution::Uniform {
                min_delay,
                max_delay,
            } => {
                if !(2.0..=15.0).contains(&min_delay) || !(2.0..=15.0).contains(&max_delay) {
                    return Err(ConfigError::UniformRange {
                        min: min_delay,
                        max: max_delay,
                    });
                }
                if min_delay > max_delay {
                    return Err(ConfigError::UniformOrder {
                        min: min_delay,
                        max: max_delay,
                    });
                }
            }
            DelayDistribution::Discrete { discrete_time } => {
                if discrete_time <= 0.0 {
                    return Err(ConfigError::DiscreteTime(discrete_time));
                }
            }
            DelayDistribution::Unknown => return Err(ConfigError::UnknownType),
        }
        Ok(())
    }
}

/// Arrival process configuration: the inter-arrival delay distribution plus
/// the probability that an arriving car attempts to enter the lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalConfig {
    #[serde(flatten)]
    pub distribution: DelayDistribution,
    pub parking_prob: f64,
}

impl ArrivalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.distribution.validate()?;
        if !(0.0..=1.0).contains(&self.parking_prob) {
            return Err(ConfigError::ParkingProb(self.parking_prob));
        }
        Ok(())
    }
}

/// Parking-duration configuration: how long an admitted car stays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingTimeConfig {
    #[serde(flatten)]
    pub distribution: DelayDistribution,
}

impl ParkingTimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.distribution.validate()
    }
}

/// Session-wide random source. One PRNG, seeded once, shared by every
/// concurrent handler through an internal mutex.
pub struct Sampler {
    rng: Mutex<SmallRng>,
}

impl Sampler {
    /// Seeded sampler for reproducible runs; unseeded draws entropy from
    /// the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draw one delay from the given distribution.
    pub fn delay(&self, distribution: &DelayDistribution) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        let seconds = match *distribution {
            DelayDistribution::Exponential { lambda } => match Exp::new(lambda) {
                Ok(exp) => exp.sample(&mut *rng),
                Err(_) => 0.0,
            },
            DelayDistribution::Normal { mean, std_dev } => match Normal::new(mean, std_dev) {
                Ok(normal) => normal.sample(&mut *rng).abs(),
                Err(_) => mean.abs(),
            },
            DelayDistribution::Uniform {
                min_delay,
                max_delay,
            } => min_delay + (max_delay - min_delay) * rng.random::<f64>(),
            DelayDistribution::Discrete { discrete_time } => discrete_time,
            DelayDistribution::Unknown => 0.0,
        };

        Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Bernoulli entry decision: does an arriving car attempt to park?
    pub fn entry_granted(&self, parking_prob: f64) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random::<f64>() < parking_prob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_flat_tagged_configs() {
        let arrival: ArrivalConfig =
            serde_json::from_str(r#"{"type":"exponential","lambda":0.5,"parking_prob":1.0}"#)
                .unwrap();
        assert_eq!(
            arrival.distribution,
            DelayDistribution::Exponential { lambda: 0.5 }
        );
        assert_eq!(arrival.parking_prob, 1.0);

        let parking: ParkingTimeConfig =
            serde_json::from_str(r#"{"type":"uniform","min_delay":2,"max_delay":4}"#).unwrap();
        assert_eq!(
            parking.distribution,
            DelayDistribution::Uniform {
                min_delay: 2.0,
                max_delay: 4.0
            }
        );
    }

    #[test]
    fn unknown_type_deserializes_and_fails_validation() {
        let cfg: ParkingTimeConfig =
            serde_json::from_str(r#"{"type":"poisson","lambda":0.5}"#).unwrap();
        assert_eq!(cfg.distribution, DelayDistribution::Unknown);
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownType)));
    }

    #[test]
    fn missing_parameters_fail_validation() {
        let cfg: ParkingTimeConfig = serde_json::from_str(r#"{"type":"normal"}"#).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Mean(_))));

        let cfg: ParkingTimeConfig = serde_json::from_str(r#"{"type":"discrete"}"#).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::DiscreteTime(_))));
    }

    #[test]
    fn uniform_order_is_enforced() {
        let cfg = DelayDistribution::Uniform {
            min_delay: 10.0,
            max_delay: 3.0,
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UniformOrder { .. })
        ));
    }

    #[test]
    fn parking_prob_range_is_enforced() {
        let arrival = ArrivalConfig {
            distribution: DelayDistribution::Discrete { discrete_time: 2.0 },
            parking_prob: 1.5,
        };
        assert!(matches!(
            arrival.validate(),
            Err(ConfigError::ParkingProb(_))
        ));
    }

    #[test]
    fn discrete_delay_is_exact() {
        let sampler = Sampler::new(Some(1));
        let delay = sampler.delay(&DelayDistribution::Discrete { discrete_time: 2.5 });
        assert_eq!(delay, Duration::from_secs_f64(2.5));
    }

    #[test]
    fn uniform_delay_stays_in_bounds() {
        let sampler = Sampler::new(Some(7));
        let dist = DelayDistribution::Uniform {
            min_delay: 2.0,
            max_delay: 4.0,
        };
        for _ in 0..1000 {
            let delay = sampler.delay(&dist).as_secs_f64();
            assert!((2.0..4.0).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[test]
    fn uniform_delay_handles_degenerate_range() {
        let sampler = Sampler::new(Some(7));
        let dist = DelayDistribution::Uniform {
            min_delay: 3.0,
            max_delay: 3.0,
        };
        assert_eq!(sampler.delay(&dist), Duration::from_secs_f64(3.0));
    }

    #[test]
    fn exponential_and_normal_delays_are_nonnegative() {
        let sampler = Sampler::new(Some(42));
        let exp = DelayDistribution::Exponential { lambda: 0.5 };
        let normal = DelayDistribution::Normal {
            mean: 2.0,
            std_dev: 15.0,
        };
        for _ in 0..1000 {
            assert!(sampler.delay(&exp) >= Duration::ZERO);
            assert!(sampler.delay(&normal) >= Duration::ZERO);
        }
    }

    #[test]
    fn seeded_sampler_is_reproducible() {
        let dist = DelayDistribution::Exponential { lambda: 0.3 };
        let a: Vec<Duration> = {
            let sampler = Sampler::new(Some(99));
            (0..32).map(|_| sampler.delay(&dist)).collect()
        };
        let b: Vec<Duration> = {
            let sampler = Sampler::new(Some(99));
            (0..32).map(|_| sampler.delay(&dist)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn entry_decision_follows_probability_extremes() {
        let sampler = Sampler::new(Some(5));
        for _ in 0..100 {
            assert!(sampler.entry_granted(1.0));
            assert!(!sampler.entry_granted(0.0));
        }
    }
}
