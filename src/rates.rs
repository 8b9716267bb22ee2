//! Rate functions of the birth-death-immigration model.

use serde::{Deserialize, Serialize};

/// Per-capita mortality induced by host grooming.
///
/// Every policy returns a rate per parasite; [`EventRates::new`] multiplies it
/// by the current population to obtain the population-level death rate.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DeathPolicy {
    /// No grooming.
    None,

    /// Programmed grooming: a fixed number `g` of parasites removed per unit time.
    Programmed {
        g: f64,
        /// Value returned on an empty host.
        #[serde(default)]
        at_zero: f64,
    },

    /// Stimulus-driven grooming with saturation fraction `per_g`.
    Stimulus { d0: f64, dmax: f64, per_g: f64 },

    /// Costly grooming, a Gaussian bump of height `max` centred on `center`.
    Costly { max: f64, center: f64, sigma: f64 },
}

impl DeathPolicy {
    /// Evaluate the per-capita death rate at population `x`.
    pub fn per_capita(&self, x: u64) -> f64 {
        let x = x as f64;
        match *self {
            DeathPolicy::None => 0.0,
            DeathPolicy::Programmed { g, at_zero } => {
                if x == 0.0 {
                    return at_zero;
                }
                (g / x).min(1.0)
            }
            DeathPolicy::Stimulus { d0, dmax, per_g } => {
                if x == 0.0 {
                    return d0;
                }
                // Half-saturation scales with the population itself.
                let k = x * (1.0 - per_g) / per_g;
                d0 + dmax * x / (k + x)
            }
            DeathPolicy::Costly { max, center, sigma } => {
                max * (-(x - center).powi(2) / (2.0 * sigma.powi(2))).exp()
            }
        }
    }

    /// Short name of the policy, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            DeathPolicy::None => "none",
            DeathPolicy::Programmed { .. } => "programmed",
            DeathPolicy::Stimulus { .. } => "stimulus",
            DeathPolicy::Costly { .. } => "costly",
        }
    }
}

/// Birth rate with an Allee effect: `b0 * x * x / (theta + x)`.
pub fn birth_rate(x: u64, b0: f64, theta: f64) -> f64 {
    if x == 0 {
        return 0.0;
    }
    let x = x as f64;
    b0 * x * x / (theta + x)
}

/// Population-level rates of each event class.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct EventRates {
    pub death: f64,
    pub birth: f64,
    pub immigration: f64,
}

impl EventRates {
    /// Combine the scenario rate functions at population `x`.
    pub fn new(x: u64, b0: f64, theta: f64, death: &DeathPolicy, iota: f64) -> Self {
        Self {
            death: death.per_capita(x) * x as f64,
            birth: birth_rate(x, b0, theta),
            immigration: iota,
        }
    }

    pub fn total(&self) -> f64 {
        self.death + self.birth + self.immigration
    }

    /// Weights in event-kind order (death, birth, immigration).
    pub fn weights(&self) -> [f64; 3] {
        [self.death, self.birth, self.immigration]
    }
}

/// Source of transition rates for the event engine.
pub trait RateModel {
    /// Rates of all event classes at population `x`.
    fn rates(&self, x: u64) -> EventRates;

    /// Number of parasites added by one immigration event.
    fn immigration_size(&self) -> u64 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_vanishes_on_empty_host() {
        assert_eq!(birth_rate(0, 2.0, 5.0), 0.0);
        assert_eq!(birth_rate(0, 2.0, 0.0), 0.0);
    }

    #[test]
    fn birth_allee_penalty() {
        // Half the unpenalized rate when x == theta.
        assert!((birth_rate(10, 0.5, 10.0) - 2.5).abs() < 1e-12);
        // Approaches b0 * x at high density.
        let x = 1_000_000;
        let ratio = birth_rate(x, 0.5, 10.0) / (0.5 * x as f64);
        assert!((ratio - 1.0).abs() < 1e-4);
        // No penalty without threshold.
        assert_eq!(birth_rate(7, 0.5, 0.0), 3.5);
    }

    #[test]
    fn programmed_at_zero_is_finite() {
        let policy = DeathPolicy::Programmed {
            g: 3.0,
            at_zero: 0.0,
        };
        let rate = policy.per_capita(0);
        assert!(rate.is_finite());
        assert_eq!(rate, 0.0);

        let policy = DeathPolicy::Programmed {
            g: 3.0,
            at_zero: 0.25,
        };
        assert_eq!(policy.per_capita(0), 0.25);
        assert_eq!(EventRates::new(0, 1.0, 1.0, &policy, 0.0).death, 0.0);
    }

    #[test]
    fn programmed_caps_per_capita_rate() {
        let policy = DeathPolicy::Programmed {
            g: 3.0,
            at_zero: 0.0,
        };
        assert_eq!(policy.per_capita(1), 1.0);
        assert_eq!(policy.per_capita(3), 1.0);
        assert!((policy.per_capita(6) - 0.5).abs() < 1e-12);
        // Population-level rate is min(x, g).
        assert!((EventRates::new(6, 0.0, 0.0, &policy, 0.0).death - 3.0).abs() < 1e-12);
        assert!((EventRates::new(2, 0.0, 0.0, &policy, 0.0).death - 2.0).abs() < 1e-12);
    }

    #[test]
    fn stimulus_saturation_depends_on_population() {
        let policy = DeathPolicy::Stimulus {
            d0: 0.1,
            dmax: 0.8,
            per_g: 0.25,
        };
        // With k = x (1 - perG) / perG the saturating term equals perG for any x > 0.
        for x in [1, 5, 100, 10_000] {
            assert!((policy.per_capita(x) - (0.1 + 0.8 * 0.25)).abs() < 1e-12);
        }
        assert_eq!(policy.per_capita(0), 0.1);
        assert_eq!(EventRates::new(0, 0.0, 0.0, &policy, 0.0).death, 0.0);
    }

    #[test]
    fn costly_peaks_at_center() {
        let policy = DeathPolicy::Costly {
            max: 0.9,
            center: 50.0,
            sigma: 10.0,
        };
        assert!((policy.per_capita(50) - 0.9).abs() < 1e-12);
        assert!(policy.per_capita(40) < policy.per_capita(50));
        assert!(policy.per_capita(60) < policy.per_capita(50));
        assert!(policy.per_capita(0) < 1e-4);
        assert!(policy.per_capita(200) < 1e-40);
    }

    #[test]
    fn rates_are_finite_everywhere() {
        let policies = [
            DeathPolicy::None,
            DeathPolicy::Programmed {
                g: 2.0,
                at_zero: 0.0,
            },
            DeathPolicy::Stimulus {
                d0: 0.0,
                dmax: 1.0,
                per_g: 0.5,
            },
            DeathPolicy::Costly {
                max: 1.0,
                center: 3.0,
                sigma: 1.0,
            },
        ];
        for policy in &policies {
            for x in 0..50 {
                let rates = EventRates::new(x, 0.7, 0.0, policy, 0.3);
                for w in rates.weights() {
                    assert!(w.is_finite() && w >= 0.0, "{policy:?} at {x}: {rates:?}");
                }
            }
        }
    }
}
