use crate::rates::{DeathPolicy, EventRates, RateModel};
use crate::sampler::MAX_SNAPSHOTS;
use crate::stats::MissingPolicy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub run: RunConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Table of scenarios to simulate.
    #[serde(rename = "scenario")]
    pub scenarios: Vec<Scenario>,
}

/// Batch parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of independent repetitions per scenario.
    pub n_reps: usize,
    /// Base seed of all random number streams (drawn from the OS if absent).
    pub seed: Option<u64>,
}

/// Post-processing parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Length of one snapshot period.
    pub unit_len: f64,
    /// Percentage interval of each trajectory kept after burn-in.
    pub range_percent: [f64; 2],
    /// Fraction of largest values whose share of the total is reported.
    pub top_fraction: f64,
    pub missing: MissingPolicy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            unit_len: 1.0,
            range_percent: [26.0, 100.0],
            top_fraction: 0.2,
            missing: MissingPolicy::Reject,
        }
    }
}

/// Rate-function parameters of one scenario.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    /// Birth coefficient.
    pub b0: f64,
    /// Allee threshold.
    pub theta: f64,

    pub death: DeathPolicy,

    /// Immigration rate.
    pub iota: f64,
    /// Parasites added per immigration event.
    #[serde(default = "default_iota_size")]
    pub iota_size: u64,

    pub init_pop: u64,

    pub max_time: f64,
    /// Event budget of each run.
    #[serde(default = "default_max_events")]
    pub max_events: u64,
}

fn default_iota_size() -> u64 {
    1
}

fn default_max_events() -> u64 {
    1_000_000
}

impl RateModel for Scenario {
    fn rates(&self, x: u64) -> EventRates {
        EventRates::new(x, self.b0, self.theta, &self.death, self.iota)
    }

    fn immigration_size(&self) -> u64 {
        self.iota_size
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.run.n_reps, 1..1_000_000).context("invalid number of repetitions")?;

        self.sampling
            .validate()
            .context("invalid sampling parameters")?;

        if self.scenarios.is_empty() {
            bail!("at least one scenario must be given");
        }
        for (i_scn, scn) in self.scenarios.iter().enumerate() {
            scn.validate()
                .with_context(|| format!("invalid scenario {i_scn} ({:?})", scn.name))?;

            let n_units = scn.max_time / self.sampling.unit_len;
            if n_units > MAX_SNAPSHOTS as f64 {
                bail!(
                    "scenario {i_scn} ({:?}) spans {n_units:e} snapshot periods, more than {MAX_SNAPSHOTS}",
                    scn.name
                );
            }
        }

        Ok(())
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        check_num(self.unit_len, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid snapshot unit length")?;
        check_range_percent(self.range_percent).context("invalid retained range")?;
        check_num(self.top_fraction, f64::MIN_POSITIVE..=1.0).context("invalid top fraction")?;
        Ok(())
    }
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("name must not be empty");
        }

        check_num(self.b0, 0.0..f64::INFINITY).context("invalid birth coefficient")?;
        check_num(self.theta, 0.0..f64::INFINITY).context("invalid Allee threshold")?;
        check_death(&self.death).context("invalid death policy")?;
        check_num(self.iota, 0.0..f64::INFINITY).context("invalid immigration rate")?;
        check_num(self.iota_size, 1..).context("invalid immigration size")?;

        check_num(self.max_time, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid maximum time")?;
        check_num(self.max_events, 1..).context("invalid maximum number of events")?;

        Ok(())
    }
}

fn check_death(death: &DeathPolicy) -> Result<()> {
    let non_neg = 0.0..f64::INFINITY;
    match *death {
        DeathPolicy::None => {}
        DeathPolicy::Programmed { g, at_zero } => {
            check_num(g, non_neg.clone()).context("invalid grooming threshold")?;
            check_num(at_zero, non_neg).context("invalid rate on an empty host")?;
        }
        DeathPolicy::Stimulus { d0, dmax, per_g } => {
            check_num(d0, non_neg.clone()).context("invalid base death rate")?;
            check_num(dmax, non_neg).context("invalid maximum death rate")?;
            if !(per_g > 0.0 && per_g < 1.0) {
                bail!("saturation fraction must be in the open range (0, 1), but is {per_g:?}");
            }
        }
        DeathPolicy::Costly { max, center, sigma } => {
            check_num(max, non_neg.clone()).context("invalid maximum death rate")?;
            check_num(center, non_neg).context("invalid center")?;
            check_num(sigma, f64::MIN_POSITIVE..f64::INFINITY).context("invalid width")?;
        }
    }
    Ok(())
}

/// Check a `[lo, hi]` percentage interval.
pub fn check_range_percent(range: [f64; 2]) -> Result<()> {
    let [lo, hi] = range;
    check_num(lo, 0.0..=100.0).context("invalid lower bound")?;
    check_num(hi, 0.0..=100.0).context("invalid upper bound")?;
    if lo > hi {
        bail!("lower bound {lo} must not exceed upper bound {hi}");
    }
    Ok(())
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
