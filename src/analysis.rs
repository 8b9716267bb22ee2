use crate::config::{SamplingConfig, Scenario};
use crate::model::{Termination, Trajectory};
use crate::runner::{RunOutcome, RunRecord};
use crate::sampler::SnapshotSample;
use crate::stats::{Accumulator, AccumulatorReport, Aggregate};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Statistics of one run's retained snapshots.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub scenario: String,
    pub scenario_idx: usize,
    pub rep_idx: usize,
    pub termination: Option<Termination>,
    /// Population at the end of the run.
    pub final_pop: Option<u64>,
    pub aggregate: Option<Aggregate>,
    /// Why no aggregate could be computed.
    pub error: Option<String>,
}

/// Counts of each termination reason.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct TerminationCounts {
    pub max_time_reached: usize,
    pub zero_total_rate: usize,
    pub max_events_reached: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Cross-run summary of one scenario.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub scenario_idx: usize,
    pub death_policy: String,
    pub n_runs: usize,
    pub terminations: TerminationCounts,
    /// Fraction of completed runs that end with no parasites.
    pub extinction_prob: f64,
    /// Across-run statistics of the per-run snapshot mean and Gini.
    pub mean: AccumulatorReport,
    pub gini: AccumulatorReport,
    /// Final burdens of all runs taken as a sample of hosts.
    pub hosts: Option<Aggregate>,
}

/// Complete analysis of a batch.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Results {
    pub runs: Vec<RunResult>,
    pub summaries: Vec<ScenarioSummary>,
}

/// Turns run records into per-run and per-scenario statistics.
pub struct Analyzer {
    sampling: SamplingConfig,
}

impl Analyzer {
    pub fn new(sampling: SamplingConfig) -> Self {
        Self { sampling }
    }

    /// Sample, trim and aggregate one trajectory.
    pub fn analyze_trajectory(&self, traj: &Trajectory) -> Result<Aggregate> {
        let mut sample = SnapshotSample::from_trajectory(traj, self.sampling.unit_len)
            .context("failed to sample trajectory")?;
        sample
            .retain_range(self.sampling.range_percent)
            .context("failed to remove burn-in")?;

        let vals: Vec<f64> = sample
            .populations()
            .into_iter()
            .map(|pop| pop as f64)
            .collect();
        Aggregate::from_values(&vals, self.sampling.missing, self.sampling.top_fraction)
            .context("failed to aggregate snapshots")
    }

    /// Analyze one record; failures end up in [`RunResult::error`].
    pub fn analyze_record(&self, scenario: &Scenario, rec: &RunRecord) -> RunResult {
        let mut res = RunResult {
            scenario: scenario.name.clone(),
            scenario_idx: rec.scenario_idx,
            rep_idx: rec.rep_idx,
            termination: None,
            final_pop: None,
            aggregate: None,
            error: None,
        };
        match &rec.outcome {
            RunOutcome::Completed(traj) => {
                res.termination = Some(traj.termination);
                res.final_pop = Some(traj.final_pop());
                match self.analyze_trajectory(traj) {
                    Ok(aggregate) => res.aggregate = Some(aggregate),
                    Err(error) => res.error = Some(format!("{error:#}")),
                }
            }
            RunOutcome::Failed { error } => res.error = Some(error.clone()),
        }
        res
    }

    /// Analyze all records of a batch.
    pub fn analyze(&self, scenarios: &[Scenario], records: &[RunRecord]) -> Result<Results> {
        let mut runs = Vec::with_capacity(records.len());
        for rec in records {
            let scenario_idx = rec.scenario_idx;
            let scn = scenarios
                .get(scenario_idx)
                .with_context(|| format!("record refers to unknown scenario {scenario_idx}"))?;
            runs.push(self.analyze_record(scn, rec));
        }

        let summaries = scenarios
            .iter()
            .enumerate()
            .map(|(scenario_idx, scn)| {
                let scn_runs: Vec<&RunResult> = runs
                    .iter()
                    .filter(|res| res.scenario_idx == scenario_idx)
                    .collect();
                self.summarize(scenario_idx, scn, &scn_runs)
            })
            .collect();

        Ok(Results { runs, summaries })
    }

    fn summarize(
        &self,
        scenario_idx: usize,
        scn: &Scenario,
        runs: &[&RunResult],
    ) -> ScenarioSummary {
        let mut terminations = TerminationCounts::default();
        let mut mean_acc = Accumulator::new();
        let mut gini_acc = Accumulator::new();
        let mut final_pops = Vec::with_capacity(runs.len());

        for res in runs {
            match res.termination {
                Some(Termination::MaxTimeReached) => terminations.max_time_reached += 1,
                Some(Termination::ZeroTotalRate) => terminations.zero_total_rate += 1,
                Some(Termination::MaxEventsReached) => terminations.max_events_reached += 1,
                Some(Termination::Cancelled) => terminations.cancelled += 1,
                None => terminations.failed += 1,
            }
            if let Some(final_pop) = res.final_pop {
                final_pops.push(final_pop);
            }
            if let Some(aggregate) = &res.aggregate {
                mean_acc.add(aggregate.mean);
                if let Some(gini) = aggregate.gini {
                    gini_acc.add(gini);
                }
            }
        }

        let n_extinct = final_pops.iter().filter(|&&pop| pop == 0).count();
        let extinction_prob = if final_pops.is_empty() {
            f64::NAN
        } else {
            n_extinct as f64 / final_pops.len() as f64
        };

        let hosts = match Aggregate::from_counts(&final_pops, self.sampling.top_fraction) {
            Ok(hosts) => Some(hosts),
            Err(error) => {
                log::warn!("no host aggregate for {:?}: {error:#}", scn.name);
                None
            }
        };

        ScenarioSummary {
            scenario: scn.name.clone(),
            scenario_idx,
            death_policy: scn.death.name().to_string(),
            n_runs: runs.len(),
            terminations,
            extinction_prob,
            mean: mean_acc.report(),
            gini: gini_acc.report(),
            hosts,
        }
    }
}
