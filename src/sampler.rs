//! Regular end-of-period snapshots of event trajectories.

use crate::config::check_range_percent;
use crate::model::Trajectory;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Largest number of periods a single trajectory may be sampled over.
pub const MAX_SNAPSHOTS: u64 = 10_000_000;

/// Population observed at the end of one period.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Snapshot {
    /// One-based period index; the period ends at `unit * unit_len`.
    pub unit: u64,
    pub time: f64,
    pub population: u64,
}

/// Snapshots of a trajectory taken every `unit_len` time units.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SnapshotSample {
    pub unit_len: f64,
    /// Time window the snapshots were taken from.
    pub start: f64,
    pub end: f64,
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotSample {
    /// Sample `traj` at the end of every complete period of length `unit_len`.
    ///
    /// Each snapshot holds the population after the last event at or before
    /// the end of its period.
    ///
    /// # Errors
    /// Returns an error if `unit_len` is not finite and positive, or if the
    /// trajectory spans more than [`MAX_SNAPSHOTS`] periods.
    pub fn from_trajectory(traj: &Trajectory, unit_len: f64) -> Result<Self> {
        if !(unit_len.is_finite() && unit_len > 0.0) {
            bail!("unit length must be finite and positive, but is {unit_len}");
        }

        let n_units = (traj.end_time / unit_len).floor();
        if !(n_units.is_finite() && n_units <= MAX_SNAPSHOTS as f64) {
            bail!(
                "trajectory spans {n_units:e} periods of length {unit_len}, more than {MAX_SNAPSHOTS}"
            );
        }
        let n_units = n_units.max(0.0) as u64;

        let snapshots = (1..=n_units)
            .map(|unit| {
                let time = unit as f64 * unit_len;
                Snapshot {
                    unit,
                    time,
                    population: traj.population_at(time),
                }
            })
            .collect();

        Ok(Self {
            unit_len,
            start: 0.0,
            end: traj.end_time,
            snapshots,
        })
    }

    /// Keep only the snapshots whose position within the time window, in
    /// percent, lies in `range_percent`.
    ///
    /// `[26.0, 100.0]` discards the first 26% of the window as burn-in.
    pub fn retain_range(&mut self, range_percent: [f64; 2]) -> Result<()> {
        check_range_percent(range_percent).context("invalid retained range")?;
        let [lo, hi] = range_percent;

        let span = self.end - self.start;
        if span <= 0.0 {
            self.snapshots.clear();
            return Ok(());
        }

        let (start, end) = (self.start, self.end);
        self.snapshots.retain(|snap| {
            let position = 100.0 * (snap.time - start) / span;
            position >= lo && position <= hi
        });
        self.start = start + span * lo / 100.0;
        self.end = start + span * hi / 100.0;

        Ok(())
    }

    pub fn populations(&self) -> Vec<u64> {
        self.snapshots.iter().map(|snap| snap.population).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }
}
